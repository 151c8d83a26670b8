// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Function and class descriptors.
//!
//! A single struct backs both "function" and "class" object types — a class
//! is a function whose `state` starts at [`FunctionState::Constructor`] and
//! whose prototype is materialised for `NEW` (`spec.md` §3: "Functions /
//! classes... Immutable descriptor").

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Error;
use crate::stack::SegmentId;
use crate::value::{HeapId, Value};

/// Register "no register"/"cannot yield" sentinel (`spec.md` §3's
/// `yield_reg == 255`, reused for `rest_reg`/`ellipsis_reg`/etc. to mean
/// "this slot is absent").
pub const NO_REG: u8 = 255;

/// Execution state of a function/class/generator instance (`spec.md` §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FunctionState {
    Regular,
    Constructor,
    GeneratorInit,
    GeneratorReady,
    GeneratorActive,
    GeneratorRunning,
    GeneratorDone,
}

impl FunctionState {
    #[must_use]
    pub const fn is_generator(self) -> bool {
        matches!(
            self,
            Self::GeneratorInit
                | Self::GeneratorReady
                | Self::GeneratorActive
                | Self::GeneratorRunning
                | Self::GeneratorDone
        )
    }
}

/// Register layout for argument binding (`spec.md` §3: "argument register
/// layout (positions for args/rest/ellipsis/this/first-bound)").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArgLayout {
    /// First register that receives positional arguments.
    pub args_reg: u8,
    /// Register that receives overflow positional args as an array, or
    /// `NO_REG`.
    pub rest_reg: u8,
    /// Register that receives the full argument array (`...` binding), or
    /// `NO_REG`.
    pub ellipsis_reg: u8,
    /// Register that receives `this`, or `NO_REG`.
    pub this_reg: u8,
    /// First register for bound closure slots, or `NO_REG`.
    pub bind_reg: u8,
}

/// A native (Rust-implemented) function body. Failure is reported as a
/// `Result` rather than the "return bad-pointer, check `ctx.exception`"
/// convention `original_source` uses, per the redesign guidance in
/// `spec.md` §9 ("ad-hoc error codes... represent as a result type").
/// `vm::call` is responsible for turning an `Err` into a raised exception.
pub type NativeFn = fn(ctx: &mut crate::context::Context, this: Value, args: &[Value]) -> Result<Value, Error>;

/// One named argument with its register slot, for `arg_map` resolution of
/// named-argument calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedArg {
    pub name: String,
    pub register: u8,
}

/// An immutable function/class descriptor.
#[derive(Clone, Debug)]
pub struct KFunction {
    pub state: FunctionState,
    pub is_class: bool,
    pub num_regs: u8,
    pub min_args: u8,
    pub num_def_args: u8,
    pub layout: ArgLayout,
    /// Byte offset into the owning module's bytecode where this function's
    /// code begins.
    pub instr_offs: u32,
    pub module: HeapId,
    pub name: String,
    /// Values captured from enclosing register windows (`BIND`/`BIND_SELF`).
    pub binds: Vec<Value>,
    /// Default argument values (`BIND_DEFAULTS`).
    pub defaults: Vec<Value>,
    pub arg_map: Vec<NamedArg>,
    pub native_handler: Option<NativeFn>,
    /// Prototype object used by `NEW` (own property `prototype`, modeled as
    /// a direct field since it is read on every construction).
    pub prototype: Value,
    /// The reentrant stack segment preserved across suspension, set once at
    /// generator/closure instantiation (`spec.md` §5: "written once at
    /// generator instantiation and read on resumption").
    pub generator_stack_frame: Option<SegmentId>,
}

impl KFunction {
    /// Register count actually needed for a pushed frame (`spec.md` §4.2
    /// step 2): native handlers need exactly one register (the return
    /// value slot).
    #[must_use]
    pub const fn frame_regs(&self) -> u8 {
        if self.native_handler.is_some() {
            1
        } else {
            self.num_regs
        }
    }
}
