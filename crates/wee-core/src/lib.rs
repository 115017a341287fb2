// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Foundational types shared by the Wee lexer, compiler and VM.
//!
//! This crate has no knowledge of tokens, bytecode or values. It only
//! carries the line-number bookkeeping and error-formatting conventions
//! that the other crates build on, so a `CompileError` and a
//! `RuntimeError` can both be reported through the same code path.

mod error;

pub use error::WeeError;

/// Source line number, 1-based.
///
/// Wee has no column tracking; every diagnostic in the language is
/// reported at line granularity, matching the lexer's line counter.
pub type Line = u32;
