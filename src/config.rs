// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! VM tunables.
//!
//! `original_source`'s `kos_config.h` hard-codes these as preprocessor
//! constants; here they are runtime-configurable so an embedder can size a
//! `Context` for its host (e.g. a smaller `max_stack_depth` for a
//! resource-constrained sandbox).

/// Runtime-tunable limits for a [`crate::Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Upper bound on `Context::stack_depth` (sum of live-frame sizes across
    /// all linked segments). Pushing a frame that would exceed this raises
    /// `stack_overflow`.
    pub max_stack_depth: usize,

    /// Number of cells a freshly allocated normal stack segment can hold.
    /// Reentrant segments are sized exactly for the frame they carry
    /// (see `spec.md` §4.2 step 5).
    pub initial_segment_capacity: usize,

    /// Recursion guard for structural equality/comparison over nested
    /// arrays and objects, mirroring the teacher's
    /// `intrinsics::arithmetic::MAX_EQ_DEPTH`.
    pub max_structural_depth: usize,

    /// Optional cap on the number of live heap objects, used to make the
    /// `out_of_memory` path deterministically reachable in tests. `None`
    /// means "bounded only by available memory".
    pub max_heap_objects: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 64 * 1024,
            initial_segment_capacity: 256,
            max_structural_depth: 64,
            max_heap_objects: None,
        }
    }
}
