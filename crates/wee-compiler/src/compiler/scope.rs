// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Per-function compile state: locals, upvalues and the surrounding class
//! context, one [`FunctionScope`] per function currently being compiled.

use wee_vm::Chunk;
use wee_vm::object::Obj;
use core::ptr::NonNull;

/// What kind of function body a [`FunctionScope`] is compiling, since each
/// kind reserves slot 0 differently and constrains `return`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    /// The implicit top-level function wrapping a whole program.
    Script,
    /// A plain `fun` declaration or anonymous function.
    Function,
    /// A class method other than `init`.
    Method,
    /// A class's `init` method; `return;` is allowed but `return value;` is not.
    Initializer,
}

/// A local variable slot. `depth == -1` marks the window between a local
/// being declared and its initializer finishing, during which the name
/// can't resolve to itself.
pub(crate) struct Local {
    pub name: String,
    pub depth: i32,
    pub is_captured: bool,
}

/// One entry of a function's upvalue list: either a direct capture of a
/// local slot in the enclosing function, or a re-export of one of the
/// enclosing function's own upvalues.
pub(crate) struct UpvalueDesc {
    pub index: u8,
    pub is_local: bool,
}

/// Maximum locals or upvalues a single function can declare — bounded by
/// the one-byte operand that addresses them in bytecode.
pub(crate) const MAX_LOCALS: usize = 256;

/// Compile-time state for one function body. `wee-compiler` keeps a stack
/// of these (in `Compiler::scopes`) rather than linking them through
/// parent pointers, which sidesteps the self-referential struct problem a
/// literal port of clox's `current->enclosing` chain would run into.
pub(crate) struct FunctionScope {
    pub kind: FunctionKind,
    pub name: Option<NonNull<Obj>>,
    pub arity: u8,
    pub chunk: Chunk,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueDesc>,
    pub scope_depth: i32,
}

impl FunctionScope {
    pub(crate) fn new(kind: FunctionKind, name: Option<NonNull<Obj>>) -> Self {
        // Slot 0 is reserved for the callee: the receiver in a method or
        // constructor (resolvable as `self`), otherwise an inaccessible
        // placeholder matching the closure itself.
        let slot0_name = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "self",
            FunctionKind::Script | FunctionKind::Function => "",
        };
        Self {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: slot0_name.to_string(),
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Tracks whether the class body currently being compiled declared a
/// superclass, so `super` expressions can be rejected outside that context.
pub(crate) struct ClassScope {
    pub has_superclass: bool,
}
