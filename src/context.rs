// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! [`Context`]: the handle embedders and native functions hold. Owns the
//! heap, the frame chain, the pending-exception slot, and loaded modules
//! (`spec.md` §5 "each context executes single-threaded... with its own
//! stack chain and exception slot").

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::heap::{Heap, HeapObject, Movability};
use crate::stack::Stack;
use crate::value::karray::KArray;
use crate::value::kbuffer::KBuffer;
use crate::value::kmodule::Module;
use crate::value::kobject::{KObject, PropValue};
use crate::value::kstring::KString;
use crate::value::{ObjectType, Value};
use crate::vm;

/// An execution context: one stack chain, one exception slot, sharing the
/// instance-wide heap that a host may give several contexts (`spec.md` §5).
/// This crate models "instance" and "context" as the same object since
/// multi-context sharing of one heap needs synchronisation primitives this
/// `no_std` core intentionally leaves to an embedder (see DESIGN.md).
pub struct Context {
    pub heap: Heap,
    pub stack: Stack,
    /// `Value::Bad` when no exception is pending (`spec.md` §4.5).
    pub exception: Value,
    pub config: VmConfig,
    modules: Vec<Value>,
    /// Shared prototype used to recognise/produce wrapped exception objects
    /// (`spec.md` §4.5 "detected by prototype match with the instance's
    /// `exception_proto`").
    pub exception_proto: Value,
    /// Destination for a `RETURN`/`YIELD` whose popped frame had no caller
    /// register to target — i.e. the outermost frame of the current
    /// [`vm::call::call_value`] invocation (`ret_reg == NO_REG`).
    pub return_slot: Value,
}

impl Context {
    pub fn new(config: VmConfig) -> Result<Self> {
        let mut heap = Heap::new(config.max_heap_objects);
        let exception_proto = heap.allocate_static(HeapObject::Obj(KObject::new()))?;
        let stack = Stack::new(config.initial_segment_capacity, config.max_stack_depth);
        Ok(Self {
            heap,
            stack,
            exception: Value::Bad,
            config,
            modules: Vec::new(),
            exception_proto,
            return_slot: Value::Bad,
        })
    }

    /// Register a compiled module and return its handle.
    pub fn load_module(&mut self, module: Module) -> Result<Value> {
        let handle = self.heap.allocate(Movability::Movable, HeapObject::Mod(module))?;
        self.modules.push(handle);
        Ok(handle)
    }

    /// `spec.md` §6 "Provided to collaborators": `run_module(module) →
    /// value | exception`. Runs the module's top-level code (offset 0) as
    /// an argument-less call.
    pub fn run_module(&mut self, module: Value) -> core::result::Result<Value, Value> {
        vm::run_module(self, module)
    }

    /// `spec.md` §6 `call(func, this, args) → value | exception`.
    pub fn call(&mut self, func: Value, this: Value, args: &[Value]) -> core::result::Result<Value, Value> {
        vm::call::call_value(self, func, this, args)
    }

    // --- Exception surface (`spec.md` §6) ---

    pub fn raise(&mut self, value: Value) {
        self.exception = value;
    }

    pub fn raise_error(&mut self, err: Error) {
        let msg = self.new_string(&alloc::format!("{err}")).unwrap_or(Value::Void);
        self.exception = msg;
    }

    pub fn clear_exception(&mut self) {
        self.exception = Value::Bad;
    }

    #[must_use]
    pub fn pending_exception(&self) -> Option<Value> {
        (!self.exception.is_bad()).then_some(self.exception)
    }

    /// Wrap a raw thrown value into an exception object carrying `value`
    /// and `backtrace`, unless it is already wrapped (`spec.md` §4.5).
    pub fn wrap_exception(&mut self, value: Value) -> Result<Value> {
        vm::exception::wrap(self, value)
    }

    // --- Value construction/inspection helpers (`spec.md` §6) ---

    pub fn new_int(&self, v: i64) -> Value {
        Value::Int(v)
    }

    pub fn new_float(&self, v: f64) -> Value {
        Value::Float(v)
    }

    pub fn new_string(&mut self, s: &str) -> Result<Value> {
        self.heap
            .allocate(Movability::Movable, HeapObject::Str(KString::local(s)))
    }

    pub fn new_object(&mut self, prototype: Option<Value>) -> Result<Value> {
        let obj = match prototype {
            Some(p) => KObject::with_prototype(p),
            None => KObject::new(),
        };
        self.heap.allocate(Movability::Movable, HeapObject::Obj(obj))
    }

    pub fn new_array(&mut self, size: usize) -> Result<Value> {
        self.heap
            .allocate(Movability::Movable, HeapObject::Arr(KArray::with_capacity(size)))
    }

    pub fn new_buffer(&mut self, size: usize) -> Result<Value> {
        self.heap
            .allocate(Movability::Movable, HeapObject::Buf(KBuffer::with_capacity(size)))
    }

    pub fn type_of(&self, value: Value) -> Result<ObjectType> {
        self.heap.type_of(value)
    }

    /// Plain own-property write, bypassing the prototype-chain/dynamic-
    /// property dance `vm::mod`'s `SET` opcode does. Used for exception
    /// objects and other VM-internal objects that are never given dynamic
    /// properties.
    pub fn set_own_property(&mut self, obj: Value, name: &str, value: Value) -> Result<()> {
        match self.heap.get_mut(obj)? {
            HeapObject::Obj(o) => {
                o.set(name, PropValue::Plain(value));
                Ok(())
            }
            _ => Err(Error::InvalidInstruction),
        }
    }

    pub fn get_own_property(&self, obj: Value, name: &str) -> Result<Option<Value>> {
        match self.heap.get(obj)? {
            HeapObject::Obj(o) => Ok(o.get_own(name).map(|p| match p {
                PropValue::Plain(v) => v,
                PropValue::Dynamic { getter, .. } => getter,
            })),
            _ => Err(Error::InvalidInstruction),
        }
    }

    pub fn array_push(&mut self, arr: Value, value: Value) -> Result<()> {
        match self.heap.get_mut(arr)? {
            HeapObject::Arr(a) => {
                a.push(value);
                Ok(())
            }
            _ => Err(Error::InvalidInstruction),
        }
    }

    pub fn string_value(&self, value: Value) -> Result<String> {
        match self.heap.get(value)? {
            HeapObject::Str(s) => match s.as_str() {
                Some(s) => Ok(String::from(s)),
                None => self.resolve_string_slice(value),
            },
            _ => Err(Error::InvalidString),
        }
    }

    /// Resolve a [`crate::value::kstring::StringRepr::Slice`] by following
    /// its base string through the heap.
    fn resolve_string_slice(&self, value: Value) -> Result<String> {
        let HeapObject::Str(s) = self.heap.get(value)? else {
            return Err(Error::InvalidString);
        };
        match s.repr() {
            crate::value::kstring::StringRepr::Slice { base, start, end } => {
                let base_str = self.string_value(Value::Heap(*base))?;
                base_str
                    .get(*start..*end)
                    .map(String::from)
                    .ok_or(Error::InvalidIndex)
            }
            _ => Err(Error::InvalidString),
        }
    }
}
