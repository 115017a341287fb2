// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Class declarations and method bodies.
//!
//! A class compiles to: `CLASS` + `DEFINE_GLOBAL`, an optional `INHERIT`
//! block that opens a scope holding a synthetic `super` local, then one
//! `METHOD` per member compiled against the class sitting on top of the
//! stack, and a final `POP` once the body closes.

use super::Compiler;
use super::scope::{ClassScope, FunctionKind};
use wee_lexer::TokenKind;
use wee_vm::bytecode::OpCode;

impl<'src, 'heap> Compiler<'src, 'heap> {
    pub(super) fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_const = self.identifier_constant(class_name);
        self.declare_variable();
        self.emit_bytes(OpCode::Class as u8, name_const);
        self.define_variable(name_const);

        self.classes.push(ClassScope { has_superclass: false });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous;
            if superclass_name.lexeme == class_name.lexeme {
                self.error("A class can't inherit from itself.");
            }
            self.named_variable(superclass_name.lexeme, superclass_name.line, false);

            self.begin_scope();
            self.add_local("super".to_string());
            self.define_variable(0);

            self.named_variable(class_name.lexeme, class_name.line, false);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().expect("just pushed").has_superclass = true;
        }

        self.named_variable(class_name.lexeme, class_name.line, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.classes.last().expect("just pushed").has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_token = self.previous;
        let name_const = self.identifier_constant(name_token);
        let kind = if name_token.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_bytes(OpCode::Method as u8, name_const);
    }
}
