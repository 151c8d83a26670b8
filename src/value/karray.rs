// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Heap-allocated array.
//!
//! `spec.md` §3 describes the array object as a size+flags word plus a
//! pointer to a separately-allocated storage chunk, so resizing can
//! copy-forward without moving the owner. This crate folds that storage
//! chunk directly into `KArray::data` (see DESIGN.md): the owner-vs-storage
//! indirection exists to let the GC relocate storage independently of the
//! array header, which matters only once a moving collector exists — out of
//! scope here (`spec.md` §1). The public contract (`resize`/`slice`/
//! `push`/`rotate`) is preserved exactly.

use alloc::vec::Vec;

use crate::value::Value;

/// A resizable array of [`Value`]s.
#[derive(Clone, Debug, PartialEq)]
pub struct KArray {
    data: Vec<Value>,
    /// Read-only arrays reject in-place mutation (mirrors `KBuffer`'s flag
    /// of the same name, kept separately since arrays and buffers are
    /// distinct object types).
    pub read_only: bool,
}

impl KArray {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            read_only: false,
        }
    }

    #[must_use]
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: alloc::vec![Value::Bad; size],
            read_only: false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.data.get(index).copied()
    }

    /// Resolve a signed, possibly-negative index the way `GET_ELEM` does:
    /// negative counts back from the end. Returns `None` on out-of-range.
    #[must_use]
    pub fn resolve_index(&self, index: i64) -> Option<usize> {
        let len = self.data.len() as i64;
        let idx = if index < 0 { index + len } else { index };
        if idx < 0 || idx >= len {
            None
        } else {
            Some(idx as usize)
        }
    }

    pub fn set(&mut self, index: usize, value: Value) -> bool {
        if let Some(slot) = self.data.get_mut(index) {
            *slot = value;
            true
        } else {
            false
        }
    }

    pub fn push(&mut self, value: Value) {
        self.data.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.data.pop()
    }

    /// `GET_RANGE` semantics: `begin`/`end` are `None` for "void" (0 / to
    /// end respectively), otherwise signed indices resolved the same way as
    /// [`Self::resolve_index`], clamped into range.
    #[must_use]
    pub fn slice(&self, begin: Option<i64>, end: Option<i64>) -> Vec<Value> {
        let len = self.data.len() as i64;
        let clamp = |i: i64| i.clamp(0, len) as usize;
        let b = begin.map_or(0, |b| clamp(if b < 0 { b + len } else { b }));
        let e = end.map_or(self.data.len(), |e| clamp(if e < 0 { e + len } else { e }));
        if b >= e {
            Vec::new()
        } else {
            self.data[b..e].to_vec()
        }
    }

    pub fn resize(&mut self, new_len: usize) {
        self.data.resize(new_len, Value::Void);
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.data
    }

    pub fn insert(&mut self, index: usize, value: Value) {
        let index = index.min(self.data.len());
        self.data.insert(index, value);
    }

    /// Rotate the half-open range `[begin, end)` left by `exponent`
    /// positions (negative `exponent` rotates right). `original_source`
    /// leaves this unimplemented (`assert(false)`); `spec.md` §9 marks the
    /// operation optional. This crate implements it.
    pub fn rotate(&mut self, begin: usize, end: usize, exponent: i64) {
        let end = end.min(self.data.len());
        if begin >= end {
            return;
        }
        let span = end - begin;
        let shift = exponent.rem_euclid(span as i64) as usize;
        if shift == 0 {
            return;
        }
        self.data[begin..end].rotate_left(shift);
    }
}

impl Default for KArray {
    fn default() -> Self {
        Self::new()
    }
}
