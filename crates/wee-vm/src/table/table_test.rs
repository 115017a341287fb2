// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the open-addressed hash table.

#![allow(clippy::unwrap_used)]

use super::*;
use crate::heap::Heap;

#[test]
fn set_and_get_round_trip() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let key = heap.intern_string("answer");
    assert!(table.set(key, Value::Number(42.0)));
    assert_eq!(table.get(key), Some(Value::Number(42.0)));
    assert_eq!(table.len(), 1);
}

#[test]
fn set_overwrites_without_growing_len() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let key = heap.intern_string("answer");
    table.set(key, Value::Number(1.0));
    assert!(!table.set(key, Value::Number(2.0)));
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(key), Some(Value::Number(2.0)));
}

#[test]
fn remove_then_get_returns_none_but_probe_still_finds_later_entries() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let a = heap.intern_string("a");
    let b = heap.intern_string("b");
    table.set(a, Value::Number(1.0));
    table.set(b, Value::Number(2.0));
    assert!(table.remove(a));
    assert_eq!(table.get(a), None);
    assert_eq!(table.get(b), Some(Value::Number(2.0)));
}

#[test]
fn grows_past_75_percent_load() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    for i in 0..16 {
        let key = heap.intern_string(&format!("key{i}"));
        table.set(key, Value::Number(f64::from(i)));
    }
    assert_eq!(table.len(), 16);
    for i in 0..16 {
        let key = heap.intern_string(&format!("key{i}"));
        assert_eq!(table.get(key), Some(Value::Number(f64::from(i))));
    }
}

#[test]
fn find_string_locates_unowned_candidate_by_content() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let key = heap.intern_string("hello");
    table.set(key, Value::Bool(true));
    let hash = hash_bytes(b"hello");
    assert_eq!(table.find_string("hello", hash), Some(key));
    assert_eq!(table.find_string("goodbye", hash_bytes(b"goodbye")), None);
}

#[test]
fn copy_from_clones_every_entry() {
    let mut heap = Heap::new();
    let mut source = Table::new();
    let mut dest = Table::new();
    let a = heap.intern_string("a");
    let b = heap.intern_string("b");
    source.set(a, Value::Number(1.0));
    source.set(b, Value::Number(2.0));

    dest.copy_from(&source);

    assert_eq!(dest.len(), 2);
    assert_eq!(dest.get(a), Some(Value::Number(1.0)));
    assert_eq!(dest.get(b), Some(Value::Number(2.0)));
}

#[test]
fn retain_marked_drops_unmarked_keys() {
    let mut heap = Heap::new();
    let mut table = Table::new();
    let kept = heap.intern_string("kept");
    let dropped = heap.intern_string("dropped");
    table.set(kept, Value::Bool(true));
    table.set(dropped, Value::Bool(true));

    heap.mark_object(kept);
    table.retain_marked();

    assert_eq!(table.len(), 1);
    assert_eq!(table.get(kept), Some(Value::Bool(true)));
    assert_eq!(table.get(dropped), None);
}
