// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Object heap.
//!
//! `spec.md` §4.1 describes a bump allocator returning raw object pointers,
//! tagged movable/immovable, with GC tracing and compaction living entirely
//! in an out-of-scope collaborator (`spec.md` §1). Without a tracing
//! collector to move things, a bump allocator buys nothing a plain arena
//! doesn't, so this crate keeps the movable/off-heap/static three-way split
//! from `spec.md` §3 but backs each with a growable `Vec` slot arena instead
//! of raw pointer bytes (see DESIGN.md). Slots are never reused — there is
//! no collector in this crate, matching `spec.md` §1's explicit scope cut.


use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::value::karray::KArray;
use crate::value::kbuffer::KBuffer;
use crate::value::kfunction::KFunction;
use crate::value::kiterator::KIterator;
use crate::value::kmodule::Module;
use crate::value::kobject::KObject;
use crate::value::kstring::KString;
use crate::value::{HeapId, ObjectType, OffHeapId, StaticId, Value};
use num_bigint::BigInt;

/// Whether a freshly allocated object may ever be the target of a moving
/// collector. This crate has no moving collector, so the distinction only
/// changes which arena the object lands in — kept because `spec.md` §4.1
/// makes it part of the allocation interface's contract.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Movability {
    Movable,
    Immovable,
}

/// A heap-resident value, discriminated by its language-visible type.
#[derive(Clone, Debug, PartialEq)]
pub enum HeapObject {
    Str(KString),
    Obj(KObject),
    Arr(KArray),
    Buf(KBuffer),
    Func(KFunction),
    Mod(Module),
    Iter(KIterator),
    /// An integer that overflowed the small-int range (`spec.md` §4.3:
    /// "overflow check promoting to heap integer as needed"). Still the
    /// `integer` language type, just backed by arbitrary precision.
    BigInt(BigInt),
}

impl HeapObject {
    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Str(_) => ObjectType::String,
            Self::Obj(_) => ObjectType::Object,
            Self::Arr(_) => ObjectType::Array,
            Self::Buf(_) => ObjectType::Buffer,
            Self::Func(f) => {
                if f.is_class {
                    ObjectType::Class
                } else {
                    ObjectType::Function
                }
            }
            Self::Mod(_) => ObjectType::Module,
            Self::Iter(_) => ObjectType::Iterator,
            Self::BigInt(_) => ObjectType::Integer,
        }
    }
}

/// A slot arena: objects are appended, never removed or moved, so a
/// `HeapId`/`OffHeapId`/`StaticId` is stable for the arena's lifetime.
#[derive(Default)]
struct Arena {
    slots: Vec<HeapObject>,
    cap: Option<usize>,
}

impl Arena {
    fn new(cap: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            cap,
        }
    }

    fn alloc(&mut self, obj: HeapObject) -> Result<u32> {
        if let Some(cap) = self.cap {
            if self.slots.len() >= cap {
                return Err(Error::OutOfMemory);
            }
        }
        let idx = u32::try_from(self.slots.len()).map_err(|_| Error::OutOfMemory)?;
        self.slots.push(obj);
        Ok(idx)
    }

    fn get(&self, idx: u32) -> Result<&HeapObject> {
        self.slots.get(idx as usize).ok_or(Error::InvalidInstruction)
    }

    fn get_mut(&mut self, idx: u32) -> Result<&mut HeapObject> {
        self.slots
            .get_mut(idx as usize)
            .ok_or(Error::InvalidInstruction)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// The three address spaces named in `spec.md` §3: movable heap, off-heap
/// (tracker-associated), and static/const.
#[derive(Default)]
pub struct Heap {
    movable: Arena,
    off_heap: Arena,
    statics: Arena,
}

impl Heap {
    #[must_use]
    pub fn new(max_heap_objects: Option<usize>) -> Self {
        Self {
            movable: Arena::new(max_heap_objects),
            off_heap: Arena::new(None),
            statics: Arena::new(None),
        }
    }

    /// `spec.md` §4.1 `allocate(ctx, movability, type_tag, size_bytes)`.
    /// `type_tag`/`size_bytes` are implicit in `obj`'s own shape here.
    pub fn allocate(&mut self, movability: Movability, obj: HeapObject) -> Result<Value> {
        match movability {
            Movability::Movable => Ok(Value::Heap(HeapId(self.movable.alloc(obj)?))),
            Movability::Immovable => Ok(Value::OffHeap(OffHeapId(self.off_heap.alloc(obj)?))),
        }
    }

    /// Allocate a constant/static object (`spec.md` §3: "never scanned or
    /// moved by GC"). Used for the module constant pool and the shared
    /// exception prototype.
    pub fn allocate_static(&mut self, obj: HeapObject) -> Result<Value> {
        Ok(Value::Static(StaticId(self.statics.alloc(obj)?)))
    }

    /// Promote an overflowed small-int computation to a heap integer
    /// (`spec.md` §4.3).
    pub fn allocate_bigint(&mut self, v: BigInt) -> Result<Value> {
        self.allocate(Movability::Movable, HeapObject::BigInt(v))
    }

    pub fn get(&self, value: Value) -> Result<&HeapObject> {
        match value {
            Value::Heap(id) => self.movable.get(id.0),
            Value::OffHeap(id) => self.off_heap.get(id.0),
            Value::Static(id) => self.statics.get(id.0),
            _ => Err(Error::InvalidInstruction),
        }
    }

    pub fn get_mut(&mut self, value: Value) -> Result<&mut HeapObject> {
        match value {
            Value::Heap(id) => self.movable.get_mut(id.0),
            Value::OffHeap(id) => self.off_heap.get_mut(id.0),
            Value::Static(id) => self.statics.get_mut(id.0),
            _ => Err(Error::InvalidInstruction),
        }
    }

    pub fn type_of(&self, value: Value) -> Result<ObjectType> {
        if let Some(t) = value.immediate_type() {
            return Ok(t);
        }
        Ok(self.get(value)?.object_type())
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.movable.len() + self.off_heap.len() + self.statics.len()
    }
}
