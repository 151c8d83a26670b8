// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The single error type surfaced by every fallible entry point.
//!
//! Every variant corresponds to one of the error kinds in the VM
//! specification (raising, call discipline, value-operation violations,
//! malformed bytecode). `Context::raise` turns any of these into a wrapped
//! language-level exception object carrying the same message.

use alloc::string::String;

/// A VM-level error.
///
/// Cheap to clone: payloads are small copy types or `String`s produced only
/// on the error path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Allocation failed; the heap (or a configured cap) is exhausted.
    #[error("out of memory")]
    OutOfMemory,

    /// Pushing a frame would exceed `VmConfig::max_stack_depth`.
    #[error("stack overflow")]
    StackOverflow,

    /// A call target is neither a function nor a class.
    #[error("object is not callable")]
    NotCallable,

    /// A call/array-taking variant received a non-array argument list.
    #[error("function arguments must be an array")]
    ArgsNotArray,

    /// Fewer positional arguments were supplied than `min_args` requires.
    #[error("too few arguments: expected at least {expected}, got {got}")]
    TooFewArgs {
        /// Minimum number of arguments the function requires.
        expected: u8,
        /// Number of arguments actually supplied.
        got: u8,
    },

    /// A required argument has neither a positional value nor a default.
    #[error("missing argument '{name}'")]
    MissingArg {
        /// Name of the unsatisfied parameter.
        name: String,
    },

    /// `NEW` was used on a generator function.
    #[error("cannot construct a new object from a generator")]
    NewWithGenerator,

    /// `CALL_GEN` was used on a non-generator function.
    #[error("not a generator")]
    NotGenerator,

    /// A generator was invoked while already running (reentrant resume).
    #[error("generator is already running")]
    GeneratorRunning,

    /// A generator/iterator was invoked after it finished.
    #[error("generator has already finished")]
    GeneratorEnd,

    /// `YIELD` executed in a frame whose `yield_reg` is `NO_REG`.
    #[error("cannot yield from a non-generator function")]
    CannotYield,

    /// A numeric/element index was out of range or of the wrong type.
    #[error("invalid index")]
    InvalidIndex,

    /// A byte value used to build a buffer element was outside `0..=255`.
    #[error("invalid byte value")]
    InvalidByteValue,

    /// A string operation was given data that is not valid Unicode.
    #[error("invalid string")]
    InvalidString,

    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivideByZero,

    /// An arithmetic/bitwise/comparison operator was applied to operand
    /// types it does not support.
    #[error("unsupported operand types")]
    UnsupportedOperandTypes,

    /// Malformed bytecode: an out-of-range jump target, register, constant
    /// index, or opcode.
    #[error("invalid instruction")]
    InvalidInstruction,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
