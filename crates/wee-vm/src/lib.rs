// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # Wee VM
//!
//! Stack-based bytecode interpreter for the Wee language.
//!
//! This crate provides:
//! - The `Value` representation (nil, bool, number, heap reference)
//! - The heap object model (strings, functions, closures, classes, instances)
//! - A precise mark-sweep garbage collector threaded through a single
//!   intrusive object list
//! - `Table`, the open-addressed hash table used for globals, interning,
//!   methods and instance fields
//! - `Chunk`, the per-function bytecode buffer
//! - `Vm`, the call-frame-based dispatch loop
//!
//! `wee-compiler` is the only expected producer of `Chunk`s; this crate has
//! no notion of source text or tokens.

pub mod bytecode;
pub mod heap;
pub mod table;
pub mod value;
pub mod vm;

pub use bytecode::{Chunk, OpCode};
pub use heap::Heap;
pub use table::Table;
pub use value::{Value, object};
pub use vm::{InterpretResult, RuntimeError, TraceFrame, Vm};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
