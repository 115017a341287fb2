// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Precise mark-sweep garbage collector and object allocator.
//!
//! The heap owns every object ever allocated, threaded into one intrusive
//! list (`head`), plus the weak string intern table. It has no notion of a
//! call stack or call frames — it doesn't know what's alive on its own.
//! Callers (the VM, and the compiler while a function is mid-compile) are
//! responsible for handing it the current root set via [`Heap::collect`];
//! the heap only decides *when* to collect (`should_collect`) and does the
//! mark/trace/sweep mechanics once asked.

#[cfg(test)]
mod heap_test;

use crate::table::{self, Table};
use crate::value::Value;
use crate::value::object::{
    NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjData, ObjFunction, ObjHeader,
    ObjInstance, ObjNative, ObjString, ObjUpvalue,
};
use core::ptr::NonNull;

/// Initial GC trigger, matching spec.md's "some small constant" — small
/// enough that tests exercise real collections without needing thousands
/// of allocations first.
const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

pub struct Heap {
    head: Option<NonNull<Obj>>,
    bytes_allocated: usize,
    next_gc: usize,
    strings: Table,
    gray_stack: Vec<NonNull<Obj>>,
    /// Debug mode: collect before every growth allocation (spec.md §4.6).
    pub gc_stress: bool,
    stats: GcStats,
}

/// Running totals surfaced to `--gc-log` / `tracing::debug!` output.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub cycles: u64,
    pub objects_freed: u64,
    pub bytes_freed: usize,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: None,
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
            strings: Table::new(),
            gray_stack: Vec::new(),
            gc_stress: false,
            stats: GcStats::default(),
        }
    }

    #[must_use]
    pub const fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    #[must_use]
    pub const fn stats(&self) -> GcStats {
        self.stats
    }

    #[must_use]
    pub const fn should_collect(&self) -> bool {
        self.gc_stress || self.bytes_allocated > self.next_gc
    }

    fn push_front(&mut self, mut obj: Box<Obj>, size: usize) -> NonNull<Obj> {
        obj.header.next = self.head.take();
        let ptr = NonNull::from(Box::leak(obj));
        self.head = Some(ptr);
        self.bytes_allocated += size;
        ptr
    }

    fn header() -> ObjHeader {
        ObjHeader {
            marked: false,
            next: None,
        }
    }

    /// Intern `chars`: if an equal string already exists, its object is
    /// returned and no allocation happens; otherwise a new `ObjString` is
    /// allocated and registered in the intern table.
    pub fn intern_string(&mut self, chars: &str) -> NonNull<Obj> {
        let hash = table::hash_bytes(chars.as_bytes());
        if let Some(existing) = self.strings.find_string(chars, hash) {
            return existing;
        }

        let size = core::mem::size_of::<Obj>() + chars.len();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::String(ObjString {
                chars: chars.into(),
                hash,
            }),
        });
        let ptr = self.push_front(obj, size);
        self.strings.set(ptr, Value::Bool(true));
        ptr
    }

    /// Concatenate two strings and intern the result, per spec.md's ADD
    /// semantics for two Strings.
    #[must_use]
    pub fn concat_strings(&mut self, a: &str, b: &str) -> NonNull<Obj> {
        let mut joined = String::with_capacity(a.len() + b.len());
        joined.push_str(a);
        joined.push_str(b);
        self.intern_string(&joined)
    }

    pub fn alloc_function(&mut self, function: ObjFunction) -> NonNull<Obj> {
        let size = core::mem::size_of::<Obj>() + function.chunk.len();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::Function(function),
        });
        self.push_front(obj, size)
    }

    pub fn alloc_native(&mut self, name: &'static str, arity: u8, function: NativeFn) -> NonNull<Obj> {
        let size = core::mem::size_of::<Obj>();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::Native(ObjNative {
                name,
                arity,
                function,
            }),
        });
        self.push_front(obj, size)
    }

    pub fn alloc_closure(&mut self, function: NonNull<Obj>, upvalue_count: usize) -> NonNull<Obj> {
        let size = core::mem::size_of::<Obj>() + upvalue_count * core::mem::size_of::<NonNull<Obj>>();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::Closure(ObjClosure {
                function,
                upvalues: Vec::with_capacity(upvalue_count),
            }),
        });
        self.push_front(obj, size)
    }

    pub fn alloc_upvalue(&mut self, slot: usize) -> NonNull<Obj> {
        let size = core::mem::size_of::<Obj>();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::Upvalue(ObjUpvalue::Open(slot)),
        });
        self.push_front(obj, size)
    }

    pub fn alloc_class(&mut self, name: NonNull<Obj>) -> NonNull<Obj> {
        let size = core::mem::size_of::<Obj>();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::Class(ObjClass {
                name,
                methods: Table::new(),
            }),
        });
        self.push_front(obj, size)
    }

    pub fn alloc_instance(&mut self, class: NonNull<Obj>) -> NonNull<Obj> {
        let size = core::mem::size_of::<Obj>();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::Instance(ObjInstance {
                class,
                fields: Table::new(),
            }),
        });
        self.push_front(obj, size)
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: NonNull<Obj>) -> NonNull<Obj> {
        let size = core::mem::size_of::<Obj>();
        let obj = Box::new(Obj {
            header: Self::header(),
            data: ObjData::BoundMethod(ObjBoundMethod { receiver, method }),
        });
        self.push_front(obj, size)
    }

    /// Run one full mark-sweep cycle rooted at `roots`, regardless of
    /// `should_collect` — call sites that want the threshold/stress logic
    /// should check `should_collect` first.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) {
        let before = self.bytes_allocated;
        tracing::debug!(before, "gc: begin collection");

        for root in roots {
            self.mark_value(root);
        }
        self.trace_references();
        self.strings.retain_marked();
        let freed_objects = self.sweep();

        self.next_gc = self.bytes_allocated * 2;
        self.stats.cycles += 1;
        self.stats.objects_freed += freed_objects as u64;
        self.stats.bytes_freed += before.saturating_sub(self.bytes_allocated);

        tracing::debug!(
            after = self.bytes_allocated,
            freed_objects,
            next_gc = self.next_gc,
            "gc: end collection"
        );
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(ptr) = value {
            self.mark_object(ptr);
        }
    }

    pub fn mark_object(&mut self, ptr: NonNull<Obj>) {
        // SAFETY: every pointer reaching this function either came from a
        // live `Value`/root or from `blacken_object` walking a live object's
        // own references; both are only ever populated with still-live objects.
        let header = unsafe { &mut (*ptr.as_ptr()).header };
        if header.marked {
            return;
        }
        header.marked = true;
        tracing::trace!(?ptr, "gc: mark");
        self.gray_stack.push(ptr);
    }

    fn trace_references(&mut self) {
        while let Some(ptr) = self.gray_stack.pop() {
            self.blacken_object(ptr);
        }
    }

    fn blacken_object(&mut self, ptr: NonNull<Obj>) {
        // SAFETY: only ever called on objects already marked reachable.
        let data_ptr: *const ObjData = unsafe { &(*ptr.as_ptr()).data };
        // Read through a raw pointer so self can be mutably borrowed below
        // without a live shared borrow of the object overlapping it.
        match unsafe { &*data_ptr } {
            ObjData::String(_) | ObjData::Native(_) => {}
            ObjData::Upvalue(up) => {
                if let ObjUpvalue::Closed(value) = up {
                    self.mark_value(*value);
                }
            }
            ObjData::Function(function) => {
                if let Some(name) = function.name {
                    self.mark_object(name);
                }
                for constant in &function.chunk.constants {
                    self.mark_value(*constant);
                }
            }
            ObjData::Closure(closure) => {
                self.mark_object(closure.function);
                for upvalue in closure.upvalues.clone() {
                    self.mark_object(upvalue);
                }
            }
            ObjData::Class(class) => {
                self.mark_object(class.name);
                for (key, value) in class.methods.iter() {
                    self.mark_object(key);
                    self.mark_value(value);
                }
            }
            ObjData::Instance(instance) => {
                self.mark_object(instance.class);
                for (key, value) in instance.fields.iter() {
                    self.mark_object(key);
                    self.mark_value(value);
                }
            }
            ObjData::BoundMethod(bound) => {
                self.mark_value(bound.receiver);
                self.mark_object(bound.method);
            }
        }
    }

    /// Walk the intrusive object list, freeing every unmarked object and
    /// clearing the mark bit on every survivor. Returns the number of
    /// objects freed.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut current = self.head;
        let mut previous: Option<NonNull<Obj>> = None;

        while let Some(ptr) = current {
            // SAFETY: every pointer in this list was produced by `push_front`
            // and stays valid until this same loop frees it.
            let header = unsafe { &mut (*ptr.as_ptr()).header };
            let next = header.next;

            if header.marked {
                header.marked = false;
                previous = Some(ptr);
                current = next;
            } else {
                match previous {
                    Some(prev) => unsafe { (*prev.as_ptr()).header.next = next },
                    None => self.head = next,
                }
                // SAFETY: `ptr` is being removed from the list and has no
                // other owner; this is the sole place objects are freed.
                let obj = unsafe { Box::from_raw(ptr.as_ptr()) };
                self.bytes_allocated = self.bytes_allocated.saturating_sub(obj_size(&obj));
                drop(obj);
                freed += 1;
                current = next;
            }
        }

        freed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.head.take();
        while let Some(ptr) = current {
            // SAFETY: dropping the heap means nothing outside it can still
            // reference these objects.
            let obj = unsafe { Box::from_raw(ptr.as_ptr()) };
            current = obj.header.next;
            drop(obj);
        }
    }
}

fn obj_size(obj: &Obj) -> usize {
    let base = core::mem::size_of::<Obj>();
    base + match &obj.data {
        ObjData::String(s) => s.chars.len(),
        ObjData::Function(f) => f.chunk.len(),
        ObjData::Closure(c) => c.upvalues.len() * core::mem::size_of::<NonNull<Obj>>(),
        ObjData::Native(_)
        | ObjData::Upvalue(_)
        | ObjData::Class(_)
        | ObjData::Instance(_)
        | ObjData::BoundMethod(_) => 0,
    }
}
