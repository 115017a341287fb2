// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode disassembler for debugging.
//!
//! Produces the instruction listing spec.md's `--trace`/disassemble mode
//! writes to standard output: one line per instruction, offset-prefixed,
//! operands resolved against the constant pool where useful.

use crate::bytecode::{Chunk, OpCode};
use std::fmt::Write as _;

/// Disassemble an entire chunk, optionally labeled (e.g. with the
/// function's name) in a header line.
#[must_use]
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

/// Disassemble the single instruction at `offset`, appending its line to
/// `out` and returning the offset of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{offset:04} ");
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.line_at(offset));
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_u8(byte) else {
        let _ = writeln!(out, "unknown opcode {byte}");
        return offset + 1;
    };

    match op {
        OpCode::Nil
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::Equal
        | OpCode::Greater
        | OpCode::Less
        | OpCode::Add
        | OpCode::Subtract
        | OpCode::Multiply
        | OpCode::Divide
        | OpCode::Not
        | OpCode::Negate
        | OpCode::Print
        | OpCode::CloseUpvalue
        | OpCode::Return
        | OpCode::Inherit => {
            let _ = writeln!(out, "{op:?}");
            offset + 1
        }
        OpCode::Load | OpCode::GetGlobal | OpCode::SetGlobal | OpCode::DefineGlobal | OpCode::Class | OpCode::Method => {
            let index = chunk.code[offset + 1];
            let _ = writeln!(out, "{op:?} {index:>4} '{}'", chunk.constants[index as usize]);
            offset + 2
        }
        OpCode::GetProperty | OpCode::SetProperty | OpCode::GetSuper => {
            let index = chunk.code[offset + 1];
            let _ = writeln!(out, "{op:?} {index:>4} '{}'", chunk.constants[index as usize]);
            offset + 2
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue | OpCode::Call => {
            let operand = chunk.code[offset + 1];
            let _ = writeln!(out, "{op:?} {operand:>4}");
            offset + 2
        }
        OpCode::Jump | OpCode::JumpIfTrue | OpCode::JumpIfFalse => {
            let jump = chunk.read_u16(offset + 1);
            let _ = writeln!(out, "{op:?} {offset:>4} -> {}", offset + 3 + jump as usize);
            offset + 3
        }
        OpCode::JumpBack => {
            let jump = chunk.read_u16(offset + 1);
            let _ = writeln!(out, "{op:?} {offset:>4} -> {}", (offset + 3).saturating_sub(jump as usize));
            offset + 3
        }
        OpCode::Invoke | OpCode::SuperInvoke => {
            let index = chunk.code[offset + 1];
            let argc = chunk.code[offset + 2];
            let _ = writeln!(
                out,
                "{op:?} ({argc} args) {index:>4} '{}'",
                chunk.constants[index as usize]
            );
            offset + 3
        }
        OpCode::Closure => {
            let index = chunk.code[offset + 1];
            let _ = writeln!(out, "{op:?} {index:>4} '{}'", chunk.constants[index as usize]);
            let mut next = offset + 2;
            let upvalue_count = match &chunk.constants[index as usize] {
                crate::value::Value::Obj(ptr) => {
                    // SAFETY: CLOSURE's constant is always a reachable Function.
                    match &unsafe { ptr.as_ref() }.data {
                        crate::value::object::ObjData::Function(f) => f.upvalue_count,
                        _ => 0,
                    }
                }
                _ => 0,
            };
            for _ in 0..upvalue_count {
                let is_local = chunk.code[next];
                let idx = chunk.code[next + 1];
                let kind = if is_local != 0 { "local" } else { "upvalue" };
                let _ = writeln!(out, "{:04}    |                     {kind} {idx}", next);
                next += 2;
            }
            next
        }
    }
}
