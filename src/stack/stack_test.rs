// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

use super::*;
use crate::value::HeapId;

fn dummy_fn() -> Value {
    Value::Heap(HeapId(0))
}

#[test]
fn push_then_pop_restores_depth_and_empties_chain() {
    let mut stack = Stack::new(64, 64 * 1024);
    stack
        .stack_push(dummy_fn(), 3, NO_REG, NO_REG, 0, PushKind::Regular)
        .unwrap();
    assert_eq!(stack.stack_depth, 7);
    stack.stack_pop().unwrap();
    assert_eq!(stack.stack_depth, 0);
    assert!(stack.is_empty());
}

#[test]
fn nested_regular_calls_balance() {
    let mut stack = Stack::new(64, 64 * 1024);
    stack
        .stack_push(dummy_fn(), 2, NO_REG, NO_REG, 0, PushKind::Regular)
        .unwrap();
    stack
        .stack_push(dummy_fn(), 4, NO_REG, 0, 0, PushKind::Regular)
        .unwrap();
    assert_eq!(stack.stack_depth, 6 + 8);
    stack.stack_pop().unwrap();
    assert_eq!(stack.stack_depth, 6);
    stack.stack_pop().unwrap();
    assert_eq!(stack.stack_depth, 0);
}

#[test]
fn stack_overflow_is_rejected() {
    let mut stack = Stack::new(64, 8);
    let err = stack
        .stack_push(dummy_fn(), 100, NO_REG, NO_REG, 0, PushKind::Regular)
        .unwrap_err();
    assert_eq!(err, Error::StackOverflow);
}

#[test]
fn fresh_generator_segment_is_reentrant_and_survives_pop() {
    let mut stack = Stack::new(64, 64 * 1024);
    stack
        .stack_push(dummy_fn(), 2, 0, NO_REG, 0, PushKind::FreshGeneratorOrClosure)
        .unwrap();
    let gen_seg = stack.top_segment_id().unwrap();
    assert!(stack.segment(gen_seg).reentrant);
    stack.stack_pop().unwrap();
    assert!(stack.is_empty());
    // The segment is still addressable even though detached from the chain.
    assert_eq!(stack.segment(gen_seg).frames.len(), 0);
}

#[test]
fn regular_push_over_reentrant_top_unchains_and_rechains() {
    let mut stack = Stack::new(64, 64 * 1024);
    stack
        .stack_push(dummy_fn(), 2, 0, NO_REG, 0, PushKind::FreshGeneratorOrClosure)
        .unwrap();
    let gen_seg = stack.top_segment_id().unwrap();
    stack
        .stack_push(dummy_fn(), 2, NO_REG, 0, 0, PushKind::Regular)
        .unwrap();
    assert_ne!(stack.top_segment_id().unwrap(), gen_seg);
    stack.stack_pop().unwrap();
    // Popping the regular frame re-chains the generator's reentrant segment.
    assert_eq!(stack.top_segment_id(), Some(gen_seg));
}
