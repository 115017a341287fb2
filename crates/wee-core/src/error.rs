// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared error-reporting contract.

use crate::Line;

/// Common surface for the two error kinds the interpreter produces:
/// `CompileError` and `RuntimeError`.
///
/// The CLI driver formats either the same way (`[line N] message`)
/// without needing to match on the concrete type.
pub trait WeeError: core::fmt::Display {
    /// The source line the error is attributed to.
    fn line(&self) -> Line;
}
