// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # Kos VM
//!
//! Register-based bytecode virtual machine for the Kos scripting language.
//!
//! This crate provides:
//! - A tagged value representation and managed object heap.
//! - A call stack organised as linked, heap-allocated frame segments, with
//!   reentrant segments for suspended generators and closures.
//! - A bytecode interpreter: decode/dispatch, arithmetic, comparisons,
//!   property access, control flow.
//! - Function, class and generator call dispatch.
//! - Structured exception handling with backtrace capture.
//!
//! Out of scope (consumed via the interfaces in [`value::kmodule`]):
//! source lexing/parsing/compilation, the garbage collector's tracing
//! algorithm, string-encoding primitives, file I/O, and other built-in
//! library modules.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(any(test, feature = "std"))]
extern crate std;

extern crate alloc;

pub mod bytecode;
pub mod config;
pub mod context;
pub mod error;
pub mod heap;
pub mod stack;
pub mod value;
pub mod vm;

pub use config::VmConfig;
pub use context::Context;
pub use error::Error;
pub use value::Value;

/// Crate version, for embedders that want to report it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
