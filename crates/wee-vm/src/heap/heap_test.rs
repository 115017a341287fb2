// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for allocation, interning and the mark-sweep collector.

#![allow(clippy::unwrap_used)]

use super::*;
use crate::value::object::ObjFunction;

#[test]
fn interning_the_same_content_returns_the_same_object() {
    let mut heap = Heap::new();
    let a = heap.intern_string("hello");
    let b = heap.intern_string("hello");
    assert_eq!(a, b);
}

#[test]
fn interning_distinct_content_returns_distinct_objects() {
    let mut heap = Heap::new();
    let a = heap.intern_string("hello");
    let b = heap.intern_string("world");
    assert_ne!(a, b);
}

#[test]
fn concat_interns_the_joined_result() {
    let mut heap = Heap::new();
    let joined = heap.concat_strings("foo", "bar");
    let expected = heap.intern_string("foobar");
    assert_eq!(joined, expected);
}

#[test]
fn collect_frees_unreachable_objects() {
    let mut heap = Heap::new();
    let kept = heap.intern_string("kept");
    let _dropped = heap.alloc_native("native", 0, |_| Value::Nil);

    let before = heap.stats().objects_freed;
    heap.collect([Value::Obj(kept)]);
    assert!(heap.stats().objects_freed > before);

    // The kept string and its intern-table entry both survive.
    assert_eq!(heap.intern_string("kept"), kept);
}

#[test]
fn collect_preserves_objects_reachable_through_a_closure() {
    let mut heap = Heap::new();
    let function = heap.alloc_function(ObjFunction {
        arity: 0,
        upvalue_count: 1,
        chunk: crate::bytecode::Chunk::new(),
        name: None,
    });
    let closure = heap.alloc_closure(function, 1);
    let upvalue = heap.alloc_upvalue(0);

    heap.collect([Value::Obj(closure), Value::Obj(upvalue)]);

    // SAFETY: test asserts the objects are still alive; reading their
    // headers after collect is exactly what's under test.
    unsafe {
        assert!(!closure.as_ref().header.marked);
        assert!(!function.as_ref().header.marked);
    }
}

#[test]
fn collect_prunes_the_intern_table_for_unmarked_strings() {
    let mut heap = Heap::new();
    let doomed = heap.intern_string("doomed");
    heap.collect([]);
    // A fresh intern_string call must allocate a new object rather than
    // finding `doomed` still registered.
    let reinterned = heap.intern_string("doomed");
    assert_ne!(doomed, reinterned);
}

#[test]
fn next_gc_doubles_live_bytes_after_a_collection() {
    let mut heap = Heap::new();
    let kept = heap.intern_string("kept");
    heap.collect([Value::Obj(kept)]);
    assert_eq!(heap.next_gc, heap.bytes_allocated() * 2);
}

#[test]
fn gc_stress_forces_collection_on_every_check() {
    let mut heap = Heap::new();
    heap.gc_stress = true;
    assert!(heap.should_collect());
}

#[test]
fn drop_frees_every_remaining_object_without_leaking() {
    let mut heap = Heap::new();
    heap.intern_string("a");
    heap.intern_string("b");
    heap.alloc_native("n", 0, |_| Value::Nil);
    drop(heap);
}
