// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode virtual machine for Wee.
//!
//! The VM owns the operand stack, the call-frame stack, the globals table,
//! the open-upvalue list and the heap. It has no notion of source text or
//! tokens — `wee-compiler` hands it a top-level `ObjFunction` and the VM
//! wraps it in a `Closure`, installs the initial frame, and dispatches.


pub mod disassemble;

use crate::bytecode::OpCode;
use crate::heap::Heap;
use crate::table::Table;
use crate::value::Value;
use crate::value::object::{Obj, ObjData, ObjUpvalue};
use core::ptr::NonNull;
use wee_core::Line;

/// Upper bound on nested calls. Also bounds the operand stack, which can
/// hold at most `FRAMES_MAX * 256` values (one 256-slot window per frame).
const FRAMES_MAX: usize = 64;

/// One activation record. `slots_base` is the index into `Vm::stack` of
/// slot 0 — the callee itself (or `self` for a bound method), followed by
/// the arguments and then the frame's locals.
struct CallFrame {
    closure: NonNull<Obj>,
    ip: usize,
    slots_base: usize,
}

/// A single entry of the stack trace attached to a [`RuntimeError`].
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub name: String,
    pub line: Line,
}

/// Runtime error raised while executing bytecode.
///
/// Every variant carries enough detail to format spec-mandated wording; the
/// frame-by-frame trace is assembled by the VM at the point of failure,
/// before the stack is reset.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Operand must be a number.")]
    NotANumber { line: Line, trace: Vec<TraceFrame> },

    #[error("Operands must be two numbers or two strings.")]
    BadAddOperands { line: Line, trace: Vec<TraceFrame> },

    #[error("Operands must be numbers.")]
    BadNumericOperands { line: Line, trace: Vec<TraceFrame> },

    #[error("Can only call functions and classes.")]
    NotCallable { line: Line, trace: Vec<TraceFrame> },

    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch {
        expected: u8,
        got: u8,
        line: Line,
        trace: Vec<TraceFrame>,
    },

    #[error("Stack overflow.")]
    StackOverflow { line: Line, trace: Vec<TraceFrame> },

    #[error("Undefined variable '{name}'.")]
    UndefinedGlobal {
        name: String,
        line: Line,
        trace: Vec<TraceFrame>,
    },

    #[error("Only instances have properties.")]
    NotAnInstance { line: Line, trace: Vec<TraceFrame> },

    #[error("Undefined property '{name}'.")]
    UndefinedProperty {
        name: String,
        line: Line,
        trace: Vec<TraceFrame>,
    },

    #[error("Undefined method '{name}'.")]
    UndefinedMethod {
        name: String,
        line: Line,
        trace: Vec<TraceFrame>,
    },

    #[error("Superclass must be a class.")]
    SuperclassNotAClass { line: Line, trace: Vec<TraceFrame> },

    #[error("Corrupt bytecode: {reason}.")]
    Corrupt { reason: &'static str },
}

impl wee_core::WeeError for RuntimeError {
    fn line(&self) -> Line {
        match self {
            Self::NotANumber { line, .. }
            | Self::BadAddOperands { line, .. }
            | Self::BadNumericOperands { line, .. }
            | Self::NotCallable { line, .. }
            | Self::ArityMismatch { line, .. }
            | Self::StackOverflow { line, .. }
            | Self::UndefinedGlobal { line, .. }
            | Self::NotAnInstance { line, .. }
            | Self::UndefinedProperty { line, .. }
            | Self::UndefinedMethod { line, .. }
            | Self::SuperclassNotAClass { line, .. } => *line,
            Self::Corrupt { .. } => 0,
        }
    }
}

impl RuntimeError {
    /// The frame-by-frame stack trace attached at the point of failure, if
    /// any (absent for `Corrupt`, which signals a compiler/VM bug rather
    /// than a user-visible script error).
    #[must_use]
    pub fn trace(&self) -> &[TraceFrame] {
        match self {
            Self::NotANumber { trace, .. }
            | Self::BadAddOperands { trace, .. }
            | Self::BadNumericOperands { trace, .. }
            | Self::NotCallable { trace, .. }
            | Self::ArityMismatch { trace, .. }
            | Self::StackOverflow { trace, .. }
            | Self::UndefinedGlobal { trace, .. }
            | Self::NotAnInstance { trace, .. }
            | Self::UndefinedProperty { trace, .. }
            | Self::UndefinedMethod { trace, .. }
            | Self::SuperclassNotAClass { trace, .. } => trace,
            Self::Corrupt { .. } => &[],
        }
    }
}

/// Outcome of a top-level `interpret` call, mirroring spec.md's `INTERPRET_OK`
/// / `INTERPRET_RUNTIME_ERROR` split (compile errors never reach this type —
/// they're reported by `wee-compiler` before a `Vm` is ever invoked).
pub enum InterpretResult {
    Ok(Value),
    RuntimeError(RuntimeError),
}

/// Stack-based bytecode interpreter.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    heap: Heap,
    open_upvalues: Vec<NonNull<Obj>>,
    init_string: NonNull<Obj>,
    /// Enables the instruction-by-instruction trace in spec.md §4.5.
    pub trace_execution: bool,
}

impl Vm {
    /// Build a VM on top of `heap`. The heap is taken by value rather than
    /// created here because `wee-compiler` needs to intern string constants
    /// and allocate nested `Function` objects into the same heap *before*
    /// a `Vm` exists to run them.
    #[must_use]
    pub fn new(mut heap: Heap) -> Self {
        let init_string = heap.intern_string("init");
        let mut vm = Self {
            stack: Vec::with_capacity(FRAMES_MAX * 256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            heap,
            open_upvalues: Vec::new(),
            init_string,
            trace_execution: false,
        };
        vm.define_native("clock", 0, native_clock);
        vm
    }

    #[must_use]
    pub fn gc_stress(mut self, enabled: bool) -> Self {
        self.heap.gc_stress = enabled;
        self
    }

    /// Register a native function under `name` in the globals table.
    pub fn define_native(&mut self, name: &'static str, arity: u8, function: crate::value::object::NativeFn) {
        let native = self.heap.alloc_native(name, arity, function);
        let name_obj = self.heap.intern_string(name);
        self.globals.set(name_obj, Value::Obj(native));
    }

    #[must_use]
    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Run `function` (the top-level compiled script) to completion.
    pub fn interpret(&mut self, function: NonNull<Obj>) -> InterpretResult {
        let closure = self.heap.alloc_closure(function, 0);
        self.push(Value::Obj(closure));
        if let Err(err) = self.call_value(Value::Obj(closure), 0) {
            self.stack.clear();
            self.frames.clear();
            self.open_upvalues.clear();
            return InterpretResult::RuntimeError(err);
        }
        match self.run() {
            Ok(value) => InterpretResult::Ok(value),
            Err(err) => {
                self.stack.clear();
                self.frames.clear();
                self.open_upvalues.clear();
                InterpretResult::RuntimeError(err)
            }
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("compiler never emits a pop past an empty stack")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("run() always has an active frame")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run() always has an active frame")
    }

    fn closure_ref(ptr: NonNull<Obj>) -> &'static ObjClosure {
        // SAFETY: every `CallFrame::closure` was produced by `Heap::alloc_closure`
        // and stays reachable (rooted by the frame stack) for the frame's lifetime.
        let ObjData::Closure(c) = &unsafe { ptr.as_ref() }.data else {
            unreachable!("CallFrame::closure always points at a Closure")
        };
        c
    }

    fn current_chunk_len(&self) -> usize {
        let closure = Self::closure_ref(self.current_frame().closure);
        // SAFETY: a Closure's function outlives the Closure.
        let ObjData::Function(f) = &unsafe { closure.function.as_ref() }.data else {
            unreachable!("Closure::function always points at a Function")
        };
        f.chunk.len()
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.current_frame_mut();
        let ip = frame.ip;
        frame.ip += 1;
        let closure = Self::closure_ref(frame.closure);
        // SAFETY: see `current_chunk_len`.
        let ObjData::Function(f) = &unsafe { closure.function.as_ref() }.data else {
            unreachable!()
        };
        f.chunk.code[ip]
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self, index: u8) -> Value {
        let closure = Self::closure_ref(self.current_frame().closure);
        // SAFETY: see `current_chunk_len`.
        let ObjData::Function(f) = &unsafe { closure.function.as_ref() }.data else {
            unreachable!()
        };
        f.chunk.constants[index as usize]
    }

    fn read_string_constant(&mut self, byte: u8) -> NonNull<Obj> {
        self.read_constant(byte)
            .as_obj()
            .expect("string constants always decode to Value::Obj")
    }

    fn current_line(&self) -> Line {
        let frame = self.current_frame();
        let closure = Self::closure_ref(frame.closure);
        // SAFETY: see `current_chunk_len`.
        let ObjData::Function(f) = &unsafe { closure.function.as_ref() }.data else {
            unreachable!()
        };
        // ip already points past the opcode byte; back up one for its line.
        f.chunk.line_at(frame.ip.saturating_sub(1))
    }

    /// Build the frame-by-frame trace spec.md requires on every runtime
    /// error, innermost frame first.
    fn stack_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let closure = Self::closure_ref(frame.closure);
                // SAFETY: see `current_chunk_len`.
                let ObjData::Function(f) = &(unsafe { closure.function.as_ref() }).data else {
                    unreachable!()
                };
                let name = f.name.map_or_else(
                    || "script".to_string(),
                    |n| {
                        // SAFETY: a Function's name is always an interned string.
                        let ObjData::String(s) = &unsafe { n.as_ref() }.data else {
                            unreachable!()
                        };
                        s.chars.to_string()
                    },
                );
                TraceFrame {
                    name,
                    line: f.chunk.line_at(frame.ip.saturating_sub(1)),
                }
            })
            .collect()
    }

    fn gc_maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let mut roots: Vec<Value> = self.stack.clone();
        roots.extend(self.frames.iter().map(|f| Value::Obj(f.closure)));
        roots.extend(self.open_upvalues.iter().map(|u| Value::Obj(*u)));
        roots.extend(self.globals.iter().flat_map(|(k, v)| [Value::Obj(k), v]));
        roots.push(Value::Obj(self.init_string));
        self.heap.collect(roots);
    }

    /// The main dispatch loop. Runs until the outermost frame returns, or a
    /// runtime error occurs.
    #[allow(clippy::too_many_lines)]
    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            if self.trace_execution {
                tracing::trace!(stack = ?self.stack, ip = self.current_frame().ip, "vm: step");
            }

            let byte = self.read_byte();
            let Some(op) = OpCode::from_u8(byte) else {
                return Err(RuntimeError::Corrupt {
                    reason: "invalid opcode",
                });
            };

            match op {
                OpCode::Load => {
                    let index = self.read_byte();
                    let value = self.read_constant(index);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => return Err(self.undefined_global(name)),
                    }
                }
                OpCode::SetGlobal => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    if self.globals.set(name, self.peek(0)) {
                        self.globals.remove(name);
                        return Err(self.undefined_global(name));
                    }
                }
                OpCode::DefineGlobal => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::GetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let closure = Self::closure_ref(self.current_frame().closure);
                    let upvalue = closure.upvalues[idx];
                    self.push(self.read_upvalue(upvalue));
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let closure = Self::closure_ref(self.current_frame().closure);
                    let upvalue = closure.upvalues[idx];
                    let value = self.peek(0);
                    self.write_upvalue(upvalue, value);
                }
                OpCode::GetProperty => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    self.get_property(name)?;
                }
                OpCode::SetProperty => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    self.set_property(name)?;
                }
                OpCode::GetSuper => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    let superclass = self.pop();
                    let receiver = self.pop();
                    self.bind_method(superclass, receiver, name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_numeric(|a, b| a - b)?,
                OpCode::Multiply => self.binary_numeric(|a, b| a * b)?,
                OpCode::Divide => self.binary_numeric(|a, b| a / b)?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(!value.is_truthy()));
                }
                OpCode::Negate => {
                    let value = self.peek(0);
                    match value.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => {
                            return Err(RuntimeError::NotANumber {
                                line: self.current_line(),
                                trace: self.stack_trace(),
                            });
                        }
                    }
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfTrue => {
                    let offset = self.read_u16();
                    if self.peek(0).is_truthy() {
                        self.current_frame_mut().ip += offset as usize;
                    }
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if !self.peek(0).is_truthy() {
                        self.current_frame_mut().ip += offset as usize;
                    }
                }
                OpCode::JumpBack => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    let argc = self.read_byte();
                    let superclass = self.pop();
                    self.invoke_from_class(superclass, name, argc)?;
                }
                OpCode::Closure => {
                    let index = self.read_byte();
                    let function = self
                        .read_constant(index)
                        .as_obj()
                        .expect("CLOSURE's constant is always a Function");
                    self.make_closure(function);
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let base = self.current_frame().slots_base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(result);
                    }
                    self.stack.truncate(base);
                    self.push(result);
                }
                OpCode::Class => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    self.gc_maybe_collect();
                    let class = self.heap.alloc_class(name);
                    self.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    let Some(super_ptr) = superclass.as_obj() else {
                        return Err(RuntimeError::SuperclassNotAClass {
                            line: self.current_line(),
                            trace: self.stack_trace(),
                        });
                    };
                    // SAFETY: obj is reachable as a live stack value.
                    let ObjData::Class(super_class) = &unsafe { super_ptr.as_ref() }.data else {
                        return Err(RuntimeError::SuperclassNotAClass {
                            line: self.current_line(),
                            trace: self.stack_trace(),
                        });
                    };
                    let super_methods: *const Table = &super_class.methods;
                    let sub = self.peek(0).as_obj().expect("INHERIT's subclass is always an Obj");
                    // SAFETY: sub is reachable as a live stack value and is a
                    // distinct allocation from super_ptr (a class never
                    // subclasses itself).
                    let ObjData::Class(sub_class) = &mut unsafe { &mut *sub.as_ptr() }.data else {
                        unreachable!("INHERIT's subclass operand is always a Class")
                    };
                    // SAFETY: super_methods still points at the live superclass
                    // methods table; it was not touched by the mutable borrow above.
                    sub_class.methods.copy_from(unsafe { &*super_methods });
                    self.pop();
                }
                OpCode::Method => {
                    let index = self.read_byte();
                    let name = self.read_string_constant(index);
                    self.define_method(name);
                }
            }
        }
    }

    fn undefined_global(&self, name: NonNull<Obj>) -> RuntimeError {
        // SAFETY: globals are always keyed by interned strings.
        let ObjData::String(s) = &unsafe { name.as_ref() }.data else {
            unreachable!()
        };
        RuntimeError::UndefinedGlobal {
            name: s.chars.to_string(),
            line: self.current_line(),
            trace: self.stack_trace(),
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(x + y));
                Ok(())
            }
            _ => {
                let (Some(sa), Some(sb)) = (a.as_str(), b.as_str()) else {
                    return Err(RuntimeError::BadAddOperands {
                        line: self.current_line(),
                        trace: self.stack_trace(),
                    });
                };
                let sa = sa.to_string();
                let sb = sb.to_string();
                self.gc_maybe_collect();
                let joined = self.heap.concat_strings(&sa, &sb);
                self.pop();
                self.pop();
                self.push(Value::Obj(joined));
                Ok(())
            }
        }
    }

    fn binary_numeric(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(op(x, y)));
                Ok(())
            }
            _ => Err(RuntimeError::BadNumericOperands {
                line: self.current_line(),
                trace: self.stack_trace(),
            }),
        }
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Bool(op(x, y)));
                Ok(())
            }
            _ => Err(RuntimeError::BadNumericOperands {
                line: self.current_line(),
                trace: self.stack_trace(),
            }),
        }
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        let Some(ptr) = callee.as_obj() else {
            return Err(RuntimeError::NotCallable {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        // SAFETY: `ptr` is reachable as a live stack value.
        match &unsafe { ptr.as_ref() }.data {
            ObjData::Closure(_) => self.call(ptr, argc),
            ObjData::Native(native) => {
                let base = self.stack.len() - argc as usize - 1;
                let result = (native.function)(&self.stack[base + 1..]);
                self.stack.truncate(base);
                self.push(result);
                Ok(())
            }
            ObjData::Class(_) => self.instantiate(ptr, argc),
            ObjData::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                let base = self.stack.len() - argc as usize - 1;
                self.stack[base] = receiver;
                self.call(method, argc)
            }
            _ => Err(RuntimeError::NotCallable {
                line: self.current_line(),
                trace: self.stack_trace(),
            }),
        }
    }

    fn call(&mut self, closure: NonNull<Obj>, argc: u8) -> Result<(), RuntimeError> {
        let function_ptr = Self::closure_ref(closure).function;
        // SAFETY: a Closure's function outlives the Closure.
        let ObjData::Function(f) = &unsafe { function_ptr.as_ref() }.data else {
            unreachable!()
        };
        if argc != f.arity {
            return Err(RuntimeError::ArityMismatch {
                expected: f.arity,
                got: argc,
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(RuntimeError::StackOverflow {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_base: self.stack.len() - argc as usize - 1,
        });
        Ok(())
    }

    fn instantiate(&mut self, class: NonNull<Obj>, argc: u8) -> Result<(), RuntimeError> {
        self.gc_maybe_collect();
        let instance = self.heap.alloc_instance(class);
        let base = self.stack.len() - argc as usize - 1;
        self.stack[base] = Value::Obj(instance);

        // SAFETY: class is reachable as a live stack value.
        let ObjData::Class(c) = &unsafe { class.as_ref() }.data else {
            unreachable!("instantiate is only called on Class callees")
        };
        match c.methods.get(self.init_string) {
            Some(init) => {
                let init_ptr = init.as_obj().expect("methods are always closures");
                self.call(init_ptr, argc)
            }
            None if argc == 0 => Ok(()),
            None => Err(RuntimeError::ArityMismatch {
                expected: 0,
                got: argc,
                line: self.current_line(),
                trace: self.stack_trace(),
            }),
        }
    }

    fn get_property(&mut self, name: NonNull<Obj>) -> Result<(), RuntimeError> {
        let receiver = self.peek(0);
        let Some(ptr) = receiver.as_obj() else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        // SAFETY: ptr is reachable as a live stack value.
        let ObjData::Instance(instance) = &unsafe { ptr.as_ref() }.data else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        if let Some(field) = instance.fields.get(name) {
            self.pop();
            self.push(field);
            return Ok(());
        }
        let class = instance.class;
        self.bind_method(Value::Obj(class), receiver, name)
    }

    fn set_property(&mut self, name: NonNull<Obj>) -> Result<(), RuntimeError> {
        let receiver = self.peek(1);
        let Some(ptr) = receiver.as_obj() else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        // SAFETY: ptr is reachable as a live stack value.
        let ObjData::Instance(instance) = &mut unsafe { &mut *ptr.as_ptr() }.data else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        let value = self.peek(0);
        instance.fields.set(name, value);
        let value = self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn bind_method(&mut self, class: Value, receiver: Value, name: NonNull<Obj>) -> Result<(), RuntimeError> {
        let class_ptr = class.as_obj().expect("bind_method's class is always an Obj");
        // SAFETY: class_ptr is reachable as a live stack value.
        let ObjData::Class(c) = &unsafe { class_ptr.as_ref() }.data else {
            unreachable!("bind_method is only called with a Class value")
        };
        let Some(method) = c.methods.get(name) else {
            // SAFETY: name is always an interned string.
            let ObjData::String(s) = &unsafe { name.as_ref() }.data else {
                unreachable!()
            };
            return Err(RuntimeError::UndefinedProperty {
                name: s.chars.to_string(),
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        let method_ptr = method.as_obj().expect("methods are always closures");
        self.gc_maybe_collect();
        let bound = self.heap.alloc_bound_method(receiver, method_ptr);
        self.push(Value::Obj(bound));
        Ok(())
    }

    fn invoke(&mut self, name: NonNull<Obj>, argc: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc as usize);
        let Some(ptr) = receiver.as_obj() else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        // SAFETY: ptr is reachable as a live stack value.
        let ObjData::Instance(instance) = &unsafe { ptr.as_ref() }.data else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        if let Some(field) = instance.fields.get(name) {
            let base = self.stack.len() - argc as usize - 1;
            self.stack[base] = field;
            return self.call_value(field, argc);
        }
        let class = instance.class;
        self.invoke_from_class(Value::Obj(class), name, argc)
    }

    fn invoke_from_class(&mut self, class: Value, name: NonNull<Obj>, argc: u8) -> Result<(), RuntimeError> {
        let class_ptr = class.as_obj().expect("invoke_from_class's class is always an Obj");
        // SAFETY: class_ptr is reachable as a live stack value.
        let ObjData::Class(c) = &unsafe { class_ptr.as_ref() }.data else {
            unreachable!("invoke_from_class is only called with a Class value")
        };
        let Some(method) = c.methods.get(name) else {
            // SAFETY: name is always an interned string.
            let ObjData::String(s) = &unsafe { name.as_ref() }.data else {
                unreachable!()
            };
            return Err(RuntimeError::UndefinedMethod {
                name: s.chars.to_string(),
                line: self.current_line(),
                trace: self.stack_trace(),
            });
        };
        let method_ptr = method.as_obj().expect("methods are always closures");
        self.call(method_ptr, argc)
    }

    fn make_closure(&mut self, function: NonNull<Obj>) {
        // SAFETY: function is reachable as a live constant-pool value.
        let ObjData::Function(f) = &unsafe { function.as_ref() }.data else {
            unreachable!("CLOSURE's operand always names a Function constant")
        };
        let count = f.upvalue_count as usize;
        self.gc_maybe_collect();
        let closure = self.heap.alloc_closure(function, count);
        for _ in 0..count {
            let is_local = self.read_byte();
            let index = self.read_byte() as usize;
            let captured = if is_local != 0 {
                let base = self.current_frame().slots_base;
                self.capture_upvalue(base + index)
            } else {
                let parent = Self::closure_ref(self.current_frame().closure);
                parent.upvalues[index]
            };
            // SAFETY: closure was just allocated by alloc_closure above and
            // is not yet reachable from anywhere else.
            let ObjData::Closure(c) = &mut unsafe { &mut *closure.as_ptr() }.data else {
                unreachable!()
            };
            c.upvalues.push(captured);
        }
        self.push(Value::Obj(closure));
    }

    /// Find or create an open upvalue for `slot`, keeping `open_upvalues`
    /// sorted by descending slot index as spec.md's invariant requires.
    fn capture_upvalue(&mut self, slot: usize) -> NonNull<Obj> {
        let position = self
            .open_upvalues
            .iter()
            .position(|&ptr| match unsafe { &ptr.as_ref().data } {
                ObjData::Upvalue(ObjUpvalue::Open(s)) => *s <= slot,
                _ => unreachable!("open_upvalues only ever holds open Upvalues"),
            });

        if let Some(index) = position {
            let candidate = self.open_upvalues[index];
            // SAFETY: candidate is reachable from open_upvalues.
            if let ObjData::Upvalue(ObjUpvalue::Open(s)) = unsafe { &candidate.as_ref().data } {
                if *s == slot {
                    return candidate;
                }
            }
            let created = self.heap.alloc_upvalue(slot);
            self.open_upvalues.insert(index, created);
            created
        } else {
            let created = self.heap.alloc_upvalue(slot);
            self.open_upvalues.push(created);
            created
        }
    }

    fn close_upvalues(&mut self, min_slot: usize) {
        while let Some(&ptr) = self.open_upvalues.first() {
            // SAFETY: ptr is reachable from open_upvalues.
            let slot = match unsafe { &ptr.as_ref().data } {
                ObjData::Upvalue(ObjUpvalue::Open(s)) => *s,
                _ => unreachable!("open_upvalues only ever holds open Upvalues"),
            };
            if slot < min_slot {
                break;
            }
            self.open_upvalues.remove(0);
            let value = self.stack[slot];
            // SAFETY: ptr is uniquely owned by this Upvalue slot while open.
            let ObjData::Upvalue(up) = &mut unsafe { &mut *ptr.as_ptr() }.data else {
                unreachable!()
            };
            *up = ObjUpvalue::Closed(value);
        }
    }

    fn read_upvalue(&self, ptr: NonNull<Obj>) -> Value {
        // SAFETY: ptr is reachable from the current closure.
        match &unsafe { ptr.as_ref() }.data {
            ObjData::Upvalue(ObjUpvalue::Open(slot)) => self.stack[*slot],
            ObjData::Upvalue(ObjUpvalue::Closed(value)) => *value,
            _ => unreachable!("GET_UPVALUE always names an Upvalue"),
        }
    }

    fn write_upvalue(&mut self, ptr: NonNull<Obj>, value: Value) {
        // SAFETY: ptr is reachable from the current closure.
        match &mut unsafe { &mut *ptr.as_ptr() }.data {
            ObjData::Upvalue(ObjUpvalue::Open(slot)) => self.stack[*slot] = value,
            ObjData::Upvalue(ObjUpvalue::Closed(stored)) => *stored = value,
            _ => unreachable!("SET_UPVALUE always names an Upvalue"),
        }
    }

    fn define_method(&mut self, name: NonNull<Obj>) {
        let method = self.peek(0);
        let class_ptr = self
            .peek(1)
            .as_obj()
            .expect("METHOD's class operand is always an Obj");
        // SAFETY: class_ptr is reachable as a live stack value.
        let ObjData::Class(c) = &mut unsafe { &mut *class_ptr.as_ptr() }.data else {
            unreachable!("METHOD always targets a Class")
        };
        c.methods.set(name, method);
        self.pop();
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Heap::default())
    }
}

fn native_clock(_args: &[Value]) -> Value {
    let seconds = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64());
    Value::Number(seconds)
}
