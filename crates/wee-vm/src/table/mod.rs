// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Open-addressed, linear-probed hash table keyed by interned strings.
//!
//! Used for globals, class method tables, instance field tables, and the
//! heap's string intern table. Capacity is always a power of two so probing
//! can mask instead of mod; the table grows whenever it would cross 75%
//! load.

#[cfg(test)]
mod table_test;

use crate::value::Value;
use crate::value::object::{Obj, ObjData, fnv1a_hash};
use core::ptr::NonNull;

const MAX_LOAD: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
enum Slot {
    /// Never written to; probing stops here.
    Empty,
    /// Holds a live key/value pair.
    Occupied(NonNull<Obj>, Value),
    /// A key was removed from this slot; probing must continue past it.
    Tombstone,
}

/// Open-addressed hash table, keys are interned `ObjString` pointers.
pub struct Table {
    entries: Vec<Slot>,
    len: usize,
}

impl Table {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, key: NonNull<Obj>) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self.find_slot(key, key_hash(key));
        match self.entries[index] {
            Slot::Occupied(_, value) => Some(value),
            Slot::Empty | Slot::Tombstone => None,
        }
    }

    /// Insert or overwrite `key`'s value. Returns `true` if this created a
    /// brand-new entry (as opposed to overwriting one, or reusing a
    /// tombstone's slot without incrementing `len`'s *count of live keys
    /// vs. never-used slots* distinction that spec.md calls out).
    pub fn set(&mut self, key: NonNull<Obj>, value: Value) -> bool {
        if self.entries.is_empty() || self.load_factor_after_one_more() > MAX_LOAD {
            self.grow();
        }

        let hash = key_hash(key);
        let index = self.find_slot(key, hash);
        let is_new = !matches!(self.entries[index], Slot::Occupied(..));
        if is_new && !matches!(self.entries[index], Slot::Tombstone) {
            self.len += 1;
        }
        self.entries[index] = Slot::Occupied(key, value);
        is_new
    }

    /// Remove `key`, leaving a tombstone so later probes don't stop short.
    pub fn remove(&mut self, key: NonNull<Obj>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = self.find_slot(key, key_hash(key));
        if matches!(self.entries[index], Slot::Occupied(..)) {
            self.entries[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NonNull<Obj>, Value)> + '_ {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied(key, value) => Some((*key, *value)),
            _ => None,
        })
    }

    /// Copy every entry of `other` into `self`, overwriting on collision.
    /// Used by `INHERIT` to copy (not alias) a superclass's method table.
    pub fn copy_from(&mut self, other: &Self) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    /// Look up an already-allocated string by content, for the heap's
    /// interning path. `find_string` walks the same probe sequence as
    /// `get`/`set` but compares `(hash, length, bytes)` instead of pointer
    /// identity, since the candidate string isn't interned yet.
    #[must_use]
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<NonNull<Obj>> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            match self.entries[index] {
                Slot::Empty => return None,
                Slot::Occupied(key, _) => {
                    // SAFETY: table keys always point at live ObjString objects.
                    let ObjData::String(s) = &unsafe { key.as_ref() }.data else {
                        unreachable!("Table keys are always ObjString")
                    };
                    if s.hash == hash && &*s.chars == chars {
                        return Some(key);
                    }
                }
                Slot::Tombstone => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Drop every entry whose key is unmarked. Called by the GC after
    /// marking, right before sweep, so the intern table never keeps a
    /// dead string's slot alive.
    pub fn retain_marked(&mut self) {
        for slot in &mut self.entries {
            if let Slot::Occupied(key, _) = slot {
                // SAFETY: called only during GC, before sweep frees anything.
                if !unsafe { key.as_ref() }.header.marked {
                    *slot = Slot::Tombstone;
                    self.len -= 1;
                }
            }
        }
    }

    fn load_factor_after_one_more(&self) -> f64 {
        (self.len + 1) as f64 / self.entries.len() as f64
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.entries.len() * 2
        };

        let old_entries = core::mem::replace(&mut self.entries, vec![Slot::Empty; new_capacity]);
        self.len = 0;

        let mask = new_capacity - 1;
        for slot in old_entries {
            if let Slot::Occupied(key, value) = slot {
                let hash = key_hash(key);
                let mut index = (hash as usize) & mask;
                while matches!(self.entries[index], Slot::Occupied(..)) {
                    index = (index + 1) & mask;
                }
                self.entries[index] = Slot::Occupied(key, value);
                self.len += 1;
            }
        }
    }

    /// Walk the probe sequence for `key`, stopping at the first empty slot
    /// or the first occupied slot with a matching key. Remembers the first
    /// tombstone seen so `set` can reuse it.
    fn find_slot(&self, key: NonNull<Obj>, hash: u32) -> usize {
        let mask = self.entries.len() - 1;
        let mut index = (hash as usize) & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            match self.entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Occupied(k, _) if k == key => return index,
                Slot::Occupied(..) => {}
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

fn key_hash(key: NonNull<Obj>) -> u32 {
    // SAFETY: table keys always point at live ObjString objects.
    let ObjData::String(s) = &unsafe { key.as_ref() }.data else {
        unreachable!("Table keys are always ObjString")
    };
    s.hash
}

/// Hash arbitrary bytes the same way string interning does. Exposed so the
/// heap can compute a candidate string's hash before it has an `ObjString`
/// to ask.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    fnv1a_hash(bytes)
}
