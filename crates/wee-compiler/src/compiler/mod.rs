// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Single-pass compiler: tokens in, a top-level `ObjFunction` out, with no
//! intermediate AST. Every declaration and statement is parsed and, in the
//! same pass, lowered directly into the [`Chunk`] of whichever
//! [`FunctionScope`] is current.

mod class;
#[cfg(test)]
mod compiler_test;
mod expr;
mod precedence;
mod scope;

use crate::error::CompileError;
use scope::{ClassScope, FunctionKind, FunctionScope, Local, MAX_LOCALS, UpvalueDesc};
use wee_core::Line;
use wee_lexer::{Lexer, Token, TokenKind};
use wee_vm::bytecode::OpCode;
use wee_vm::heap::Heap;
use wee_vm::object::{Obj, ObjFunction};
use wee_vm::value::Value;
use core::ptr::NonNull;

/// Compile `source` into a top-level script function, allocated on `heap`.
///
/// `heap` is taken by mutable reference (rather than created here) because
/// the resulting function's string and nested-function constants must live
/// in the same heap the eventual [`wee_vm::Vm`] runs against.
///
/// # Errors
///
/// Returns every diagnostic collected during the pass — parsing continues
/// past the first error (panic-mode recovery, synchronizing at the next
/// statement boundary) so one compile can report more than one mistake.
pub fn compile(source: &str, heap: &mut Heap) -> Result<NonNull<Obj>, Vec<CompileError>> {
    Compiler::new(source, heap).run()
}

/// Driver for one compile pass: the token stream plus a stack of
/// [`FunctionScope`]s, one per function currently nested inside the point
/// being parsed (the top of the stack is always the function whose body is
/// presently under construction).
struct Compiler<'src, 'heap> {
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: &'heap mut Heap,
    scopes: Vec<FunctionScope>,
    classes: Vec<ClassScope>,
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    fn new(source: &'src str, heap: &'heap mut Heap) -> Self {
        let lexer = Lexer::new(source);
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
        };
        let mut compiler = Self {
            lexer,
            previous: placeholder,
            current: placeholder,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            scopes: vec![FunctionScope::new(FunctionKind::Script, None)],
            classes: Vec::new(),
        };
        // `current` still holds the placeholder; this fills it with the
        // first real token (skipping past any leading error tokens).
        compiler.advance();
        compiler
    }

    fn run(mut self) -> Result<NonNull<Obj>, Vec<CompileError>> {
        while !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.emit_return();

        if self.had_error {
            return Err(self.errors);
        }

        let scope = self.scopes.pop().expect("script scope is never popped early");
        tracing::trace!(bytes = scope.chunk.len(), "compiler: finished script");
        let function = ObjFunction {
            arity: scope.arity,
            upvalue_count: 0,
            chunk: scope.chunk,
            name: scope.name,
        };
        Ok(self.heap.alloc_function(function))
    }

    // -- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            if let TokenKind::Error(message) = self.current.kind {
                self.error_at_current(message);
                continue;
            }
            break;
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &'static str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Let
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // -- diagnostics --------------------------------------------------------

    fn describe(token: &Token<'src>) -> String {
        if token.kind == TokenKind::Eof {
            "at end".to_string()
        } else {
            format!("at '{}'", token.lexeme)
        }
    }

    fn push_error(&mut self, err: CompileError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(err);
    }

    fn error_at(&mut self, token: Token<'src>, message: impl Into<String>) {
        let at = Self::describe(&token);
        self.push_error(CompileError::Syntax {
            line: token.line,
            at,
            message: message.into(),
        });
    }

    fn error_at_current(&mut self, message: impl Into<String>) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: impl Into<String>) {
        self.error_at(self.previous, message);
    }

    // -- scope / function-stack helpers --------------------------------------

    fn current_scope(&self) -> &FunctionScope {
        self.scopes.last().expect("at least the script scope is always present")
    }

    fn current_scope_mut(&mut self) -> &mut FunctionScope {
        self.scopes.last_mut().expect("at least the script scope is always present")
    }

    fn scope_depth(&self) -> i32 {
        self.current_scope().scope_depth
    }

    fn begin_scope(&mut self) {
        self.current_scope_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_scope_mut().scope_depth -= 1;
        let depth = self.scope_depth();
        loop {
            let last_depth = self.current_scope().locals.last().map(|l| l.depth);
            match last_depth {
                Some(d) if d > depth => {
                    let captured = self.current_scope_mut().locals.pop().expect("just checked").is_captured;
                    if captured {
                        self.emit_op(OpCode::CloseUpvalue);
                    } else {
                        self.emit_op(OpCode::Pop);
                    }
                }
                _ => break,
            }
        }
    }

    // -- variables ----------------------------------------------------------

    fn identifier_constant(&mut self, token: Token<'src>) -> u8 {
        let name = self.heap.intern_string(token.lexeme);
        self.make_constant(Value::Obj(name))
    }

    fn add_local(&mut self, name: String) {
        if self.current_scope().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_scope_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.scope_depth() == 0 {
            return;
        }
        let depth = self.scope_depth();
        let name = self.previous.lexeme.to_string();
        let mut duplicate = false;
        for local in self.current_scope().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &'static str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.scope_depth() > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn mark_initialized(&mut self) {
        if self.scope_depth() == 0 {
            return;
        }
        let depth = self.scope_depth();
        self.current_scope_mut()
            .locals
            .last_mut()
            .expect("mark_initialized is only called right after add_local")
            .depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.scope_depth() > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal as u8, global);
    }

    fn resolve_local(&mut self, scope_idx: usize, name: &str) -> Option<u8> {
        let pos = self.scopes[scope_idx].locals.iter().rposition(|l| l.name == name)?;
        if self.scopes[scope_idx].locals[pos].depth == -1 {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(u8::try_from(pos).expect("locals are bounded by MAX_LOCALS"))
    }

    fn resolve_upvalue(&mut self, scope_idx: usize, name: &str) -> Option<u8> {
        if scope_idx == 0 {
            return None;
        }
        let parent_idx = scope_idx - 1;
        if let Some(local_slot) = self.resolve_local(parent_idx, name) {
            self.scopes[parent_idx].locals[local_slot as usize].is_captured = true;
            return Some(self.add_upvalue(scope_idx, local_slot, true));
        }
        if let Some(up_slot) = self.resolve_upvalue(parent_idx, name) {
            return Some(self.add_upvalue(scope_idx, up_slot, false));
        }
        None
    }

    fn add_upvalue(&mut self, scope_idx: usize, index: u8, is_local: bool) -> u8 {
        if let Some(pos) = self.scopes[scope_idx]
            .upvalues
            .iter()
            .position(|u| u.index == index && u.is_local == is_local)
        {
            return u8::try_from(pos).expect("upvalues are bounded by MAX_LOCALS");
        }
        if self.scopes[scope_idx].upvalues.len() >= MAX_LOCALS {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.scopes[scope_idx].upvalues.push(UpvalueDesc { index, is_local });
        u8::try_from(self.scopes[scope_idx].upvalues.len() - 1).expect("just bounded above")
    }

    fn named_variable(&mut self, name: &str, line: Line, can_assign: bool) {
        let scope_idx = self.scopes.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(scope_idx, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(idx) = self.resolve_upvalue(scope_idx, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, idx)
        } else {
            let interned = self.heap.intern_string(name);
            let idx = self.make_constant(Value::Obj(interned));
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_byte_at(set_op as u8, line);
            self.emit_byte_at(arg, line);
        } else {
            self.emit_byte_at(get_op as u8, line);
            self.emit_byte_at(arg, line);
        }
    }

    // -- bytecode emission ----------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.emit_byte_at(byte, line);
    }

    fn emit_byte_at(&mut self, byte: u8, line: Line) {
        self.current_scope_mut().chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_scope_mut().chunk.add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_bytes(OpCode::Load as u8, idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.current_scope().chunk.len() - 2
    }

    fn patch_jump(&mut self, at: usize) {
        let len = self.current_scope().chunk.len();
        let distance = len - at - 2;
        let Ok(distance) = u16::try_from(distance) else {
            self.error("Loop body too large.");
            return;
        };
        self.current_scope_mut().chunk.patch_u16(at, distance);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::JumpBack);
        let offset = self.current_scope().chunk.len() + 2 - loop_start;
        let Ok(offset) = u16::try_from(offset) else {
            self.error("Loop body too large.");
            return;
        };
        let [hi, lo] = offset.to_be_bytes();
        self.emit_byte(hi);
        self.emit_byte(lo);
    }

    fn emit_return(&mut self) {
        if self.current_scope().kind == FunctionKind::Initializer {
            self.emit_bytes(OpCode::GetLocal as u8, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    // -- declarations ---------------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn let_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = if kind == FunctionKind::Script {
            None
        } else {
            Some(self.heap.intern_string(self.previous.lexeme))
        };
        self.scopes.push(FunctionScope::new(kind, name));

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.current_scope().arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.current_scope_mut().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();
        let scope = self.scopes.pop().expect("function() always pushes a scope");
        tracing::trace!(
            name = scope.name.is_some(),
            arity = scope.arity,
            bytes = scope.chunk.len(),
            "compiler: finished function"
        );

        let upvalue_count = u8::try_from(scope.upvalues.len()).expect("bounded by MAX_LOCALS");
        let function_obj = ObjFunction {
            arity: scope.arity,
            upvalue_count,
            chunk: scope.chunk,
            name: scope.name,
        };
        let function_ptr = self.heap.alloc_function(function_obj);
        let const_idx = self.make_constant(Value::Obj(function_ptr));
        self.emit_bytes(OpCode::Closure as u8, const_idx);
        for up in scope.upvalues {
            self.emit_byte(u8::from(up.is_local));
            self.emit_byte(up.index);
        }
    }

    // -- statements -----------------------------------------------------------

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_scope().chunk.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.matches(TokenKind::Semicolon) {
            // no initializer clause
        } else if self.matches(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_scope().chunk.len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_scope().chunk.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
            return;
        }
        if self.current_scope().kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit_op(OpCode::Return);
    }
}
