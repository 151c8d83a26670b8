// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Heap-allocated byte buffer.

use alloc::vec::Vec;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Buffer flags from `spec.md` §3 ("buffers additionally may be
    /// read-only or externally managed").
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct BufferFlags: u8 {
        const READ_ONLY = 0b0000_0001;
        const EXTERNAL  = 0b0000_0010;
    }
}

/// A resizable buffer of bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct KBuffer {
    data: Vec<u8>,
    pub flags: BufferFlags,
}

impl KBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            flags: BufferFlags::empty(),
        }
    }

    #[must_use]
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: alloc::vec![0u8; size],
            flags: BufferFlags::empty(),
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
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

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

    /// Numeric element read: returns the byte as a small int `0..=255`
    /// (`spec.md` §4.3 `GET_ELEM`).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    /// `SET`/`SET_ELEM` on a buffer: the stored value must already have
    /// been range-checked by the caller to `0..=255`.
    pub fn set(&mut self, index: usize, byte: u8) -> Result<()> {
        if self.flags.contains(BufferFlags::READ_ONLY) {
            return Err(Error::InvalidIndex);
        }
        let slot = self.data.get_mut(index).ok_or(Error::InvalidIndex)?;
        *slot = byte;
        Ok(())
    }

    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.flags.contains(BufferFlags::READ_ONLY) {
            return Err(Error::InvalidIndex);
        }
        self.data.push(byte);
        Ok(())
    }

    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        if self.flags.contains(BufferFlags::READ_ONLY) {
            return Err(Error::InvalidIndex);
        }
        self.data.resize(new_len, 0);
        Ok(())
    }

    #[must_use]
    pub fn slice(&self, begin: Option<i64>, end: Option<i64>) -> Vec<u8> {
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
}

impl Default for KBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod kbuffer_test {
    use super::*;

    #[test]
    fn read_only_rejects_mutation() {
        let mut b = KBuffer::with_capacity(4);
        b.flags.insert(BufferFlags::READ_ONLY);
        assert!(b.set(0, 1).is_err());
        assert!(b.push(1).is_err());
        assert!(b.resize(8).is_err());
    }

    #[test]
    fn byte_element_round_trips() {
        let mut b = KBuffer::with_capacity(2);
        b.set(0, 200).unwrap();
        assert_eq!(b.get(0), Some(200));
    }

    #[test]
    fn out_of_range_set_errors() {
        let mut b = KBuffer::with_capacity(2);
        assert!(b.set(5, 1).is_err());
    }
}
