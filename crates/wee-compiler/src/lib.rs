// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # Wee compiler
//!
//! Single-pass bytecode compiler for the Wee language: tokens in (via
//! `wee-lexer`), a top-level `ObjFunction` (defined by `wee-vm`) out. There
//! is no intermediate AST — each grammar production is parsed and lowered
//! into bytecode in the same step, the way clox's compiler works.
//!
//! String and nested-function constants are allocated directly on the
//! caller's [`wee_vm::heap::Heap`], since they need to live in the same
//! heap the eventual [`wee_vm::Vm`] runs against.

mod compiler;
mod error;

pub use compiler::compile;
pub use error::CompileError;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
