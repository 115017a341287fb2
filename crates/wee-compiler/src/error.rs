// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Compile-time diagnostics.
//!
//! Mirrors `wee_vm::vm::RuntimeError`'s shape: one `thiserror` variant per
//! diagnostic, a bare `Display` message (the CLI prepends `[line N]` itself
//! via [`wee_core::WeeError`]), and no payload beyond what's needed to word
//! the message.

use wee_core::Line;

/// A single compile-time diagnostic, already bound to the token that
/// triggered it.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Error {at}: {message}")]
    Syntax { line: Line, at: String, message: String },

    #[error("Error {at}: Can't read local variable in its own initializer.")]
    SelfInitializingLocal { line: Line, at: String },

    #[error("Error {at}: Already a variable with this name in this scope.")]
    DuplicateLocal { line: Line, at: String },

    #[error("Error {at}: Too many local variables in function.")]
    TooManyLocals { line: Line, at: String },

    #[error("Error {at}: Too many closure variables in function.")]
    TooManyUpvalues { line: Line, at: String },

    #[error("Error {at}: Too many constants in one chunk.")]
    TooManyConstants { line: Line, at: String },

    #[error("Error {at}: Can't have more than 255 parameters.")]
    TooManyParameters { line: Line, at: String },

    #[error("Error {at}: Can't have more than 255 arguments.")]
    TooManyArguments { line: Line, at: String },

    #[error("Error {at}: Loop body too large.")]
    JumpTooFar { line: Line, at: String },

    #[error("Error {at}: Invalid assignment target.")]
    InvalidAssignmentTarget { line: Line, at: String },

    #[error("Error {at}: Can't return a value from an initializer.")]
    ConstructorReturnsValue { line: Line, at: String },

    #[error("Error {at}: Can't use 'self' outside of a class.")]
    SelfOutsideClass { line: Line, at: String },

    #[error("Error {at}: Can't use 'super' outside of a class.")]
    SuperOutsideClass { line: Line, at: String },

    #[error("Error {at}: Can't use 'super' in a class with no superclass.")]
    SuperWithNoSuperclass { line: Line, at: String },

    #[error("Error {at}: A class can't inherit from itself.")]
    SelfInheritance { line: Line, at: String },
}

impl wee_core::WeeError for CompileError {
    fn line(&self) -> Line {
        match self {
            Self::Syntax { line, .. }
            | Self::SelfInitializingLocal { line, .. }
            | Self::DuplicateLocal { line, .. }
            | Self::TooManyLocals { line, .. }
            | Self::TooManyUpvalues { line, .. }
            | Self::TooManyConstants { line, .. }
            | Self::TooManyParameters { line, .. }
            | Self::TooManyArguments { line, .. }
            | Self::JumpTooFar { line, .. }
            | Self::InvalidAssignmentTarget { line, .. }
            | Self::ConstructorReturnsValue { line, .. }
            | Self::SelfOutsideClass { line, .. }
            | Self::SuperOutsideClass { line, .. }
            | Self::SuperWithNoSuperclass { line, .. }
            | Self::SelfInheritance { line, .. } => *line,
        }
    }
}
