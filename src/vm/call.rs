// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Call dispatch: argument binding, plain calls, `NEW` construction, and
//! generator instantiation/resumption (`spec.md` §4.4).
//!
//! Nested bytecode `CALL`-family instructions recurse through ordinary Rust
//! calls into [`call_value`]/[`construct`]/[`call_generator`] rather than a
//! flattened trampoline; recursion depth is bounded by the same
//! `max_stack_depth` check [`crate::stack::Stack::stack_push`] already
//! enforces, so this needs no separate guard (see DESIGN.md).

use alloc::vec::Vec;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::heap::{HeapObject, Movability};
use crate::stack::PushKind;
use crate::value::karray::KArray;
use crate::value::kfunction::{FunctionState, KFunction, NO_REG};
use crate::value::Value;

use super::exception;

/// Which family of call a bytecode instruction requested. `Tail` shares
/// `Call`'s push path — this crate does not shrink the caller's frame out of
/// the chain for a tail call, trading away constant stack space for tail
/// recursion in exchange for not needing a second stack-splicing scheme
/// alongside `spec.md` §4.2's generator one (see DESIGN.md).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallKind {
    Call,
    Tail,
}

enum Dispatched {
    Immediate(Value),
    Pushed,
}

fn function_of(ctx: &Context, func: Value) -> Result<KFunction> {
    match ctx.heap.get(func)? {
        HeapObject::Func(f) => Ok(f.clone()),
        _ => Err(Error::NotCallable),
    }
}

/// `spec.md` §4.4 step 6: resolve a `CALL`/`NEW` args register into a
/// positional argument list. An array is used as-is; an object is treated
/// as named arguments and resolved against `func`'s `arg_map`, filling from
/// `defaults` and raising `missing_arg` for any parameter that has neither
/// a named value nor a default.
pub fn resolve_args(ctx: &Context, func: Value, args_val: Value) -> Result<Vec<Value>> {
    match ctx.heap.get(args_val)? {
        HeapObject::Arr(a) => Ok(a.as_slice().to_vec()),
        HeapObject::Obj(_) => {
            let f = function_of(ctx, func)?;
            named_args_to_positional(ctx, &f, args_val)
        }
        _ => Err(Error::ArgsNotArray),
    }
}

fn named_args_to_positional(ctx: &Context, f: &KFunction, obj: Value) -> Result<Vec<Value>> {
    let min_args = f.min_args as usize;
    let fixed = min_args + f.num_def_args as usize;
    let mut positional = alloc::vec![Value::Void; fixed];
    for entry in &f.arg_map {
        let Some(offset) = (entry.register as usize).checked_sub(f.layout.args_reg as usize) else {
            continue;
        };
        if offset >= fixed {
            continue;
        }
        match ctx.get_own_property(obj, &entry.name)? {
            Some(v) => positional[offset] = v,
            None => match f.defaults.get(offset.saturating_sub(min_args)) {
                Some(d) if offset >= min_args => positional[offset] = *d,
                _ => {
                    return Err(Error::MissingArg {
                        name: entry.name.clone(),
                    });
                }
            },
        }
    }
    Ok(positional)
}

/// Wrap a just-raised error into an exception object and store it as the
/// pending exception, returning the wrapped value for an `Err(..)` escape.
pub(crate) fn raise(ctx: &mut Context, err: Error) -> Value {
    ctx.raise_error(err);
    let raw = ctx.exception;
    match exception::wrap(ctx, raw) {
        Ok(wrapped) => {
            ctx.exception = wrapped;
            wrapped
        }
        Err(_) => raw,
    }
}

fn dispatch(ctx: &mut Context, kind: CallKind, func: Value, this: Value, args: &[Value]) -> Result<Dispatched> {
    let f = function_of(ctx, func)?;
    if let Some(native) = f.native_handler {
        let result = native(ctx, this, args)?;
        return Ok(Dispatched::Immediate(result));
    }
    if f.state == FunctionState::GeneratorInit {
        let gen = instantiate_generator(ctx, func, &f, this, args)?;
        return Ok(Dispatched::Immediate(gen));
    }
    if f.state.is_generator() {
        return Err(Error::NotCallable);
    }
    let _ = kind;
    push_and_bind(ctx, func, &f, this, args)?;
    Ok(Dispatched::Pushed)
}

fn push_and_bind(ctx: &mut Context, func: Value, f: &KFunction, this: Value, args: &[Value]) -> Result<()> {
    let num_regs = f.frame_regs();
    ctx.stack
        .stack_push(func, num_regs, NO_REG, NO_REG, f.instr_offs, PushKind::Regular)?;
    if f.native_handler.is_none() {
        bind_arguments(ctx, f, this, args)?;
    }
    Ok(())
}

/// `spec.md` §4.4 step 2: bind `this`, bound closure slots, positional
/// arguments (falling back to defaults), the overflow-rest array, and the
/// full-arguments ellipsis array into the freshly pushed frame's registers.
/// Named-argument calls are resolved to a positional list by
/// [`resolve_args`] before reaching this function, so `args` is always
/// positional here.
fn bind_arguments(ctx: &mut Context, f: &KFunction, this: Value, args: &[Value]) -> Result<()> {
    if args.len() < f.min_args as usize {
        return Err(Error::TooFewArgs {
            expected: f.min_args,
            got: args.len() as u8,
        });
    }
    let fixed = f.min_args as usize + f.num_def_args as usize;

    let rest_value = if f.layout.rest_reg != NO_REG {
        let mut arr = KArray::new();
        if args.len() > fixed {
            for v in &args[fixed..] {
                arr.push(*v);
            }
        }
        Some(ctx.heap.allocate(Movability::Movable, HeapObject::Arr(arr))?)
    } else {
        None
    };

    let ellipsis_value = if f.layout.ellipsis_reg != NO_REG {
        let mut arr = KArray::new();
        for v in args {
            arr.push(*v);
        }
        Some(ctx.heap.allocate(Movability::Movable, HeapObject::Arr(arr))?)
    } else {
        None
    };

    let frame = ctx.stack.current_frame_mut().ok_or(Error::InvalidInstruction)?;

    if f.layout.this_reg != NO_REG {
        frame.regs[f.layout.this_reg as usize] = this;
    }
    if f.layout.bind_reg != NO_REG {
        for (i, v) in f.binds.iter().enumerate() {
            frame.regs[f.layout.bind_reg as usize + i] = *v;
        }
    }
    if f.layout.args_reg != NO_REG {
        for i in 0..fixed.min(args.len()) {
            frame.regs[f.layout.args_reg as usize + i] = args[i];
        }
        for i in args.len()..fixed {
            if let Some(d) = f.defaults.get(i - f.min_args as usize) {
                frame.regs[f.layout.args_reg as usize + i] = *d;
            }
        }
    }
    if let Some(rest) = rest_value {
        frame.regs[f.layout.rest_reg as usize] = rest;
    }
    if let Some(ellipsis) = ellipsis_value {
        frame.regs[f.layout.ellipsis_reg as usize] = ellipsis;
    }
    Ok(())
}

/// `spec.md` §4.4: a plain call (or `new`) on a not-yet-instantiated
/// generator function produces a suspended generator instance instead of
/// running the body. The instance is a fresh [`KFunction`] clone pinned to
/// the reentrant segment the body's register window was bound into.
fn instantiate_generator(ctx: &mut Context, func: Value, f: &KFunction, this: Value, args: &[Value]) -> Result<Value> {
    ctx.stack
        .stack_push(func, f.num_regs, NO_REG, NO_REG, f.instr_offs, PushKind::FreshGeneratorOrClosure)?;
    bind_arguments(ctx, f, this, args)?;
    let seg_id = ctx.stack.top_segment_id().ok_or(Error::InvalidInstruction)?;
    ctx.stack.stack_suspend()?;

    let mut instance = f.clone();
    instance.state = FunctionState::GeneratorReady;
    instance.generator_stack_frame = Some(seg_id);
    ctx.heap.allocate(Movability::Movable, HeapObject::Func(instance))
}

/// `spec.md` §4.4 `CALL_GEN`: resume a suspended generator instance. The
/// caller is responsible for the `GeneratorDone` no-raise short-circuit
/// (`spec.md` §4.4 step 5) — by the time this runs, `f.state` is always
/// `GeneratorReady` or `GeneratorActive`.
///
/// The resume argument is always written to register 0 of the preserved
/// frame rather than the `gen_reg` the original frame was pushed with: once
/// calls return through [`Context::return_slot`] instead of a caller
/// register, `gen_reg`/`ret_reg` stop being load-bearing for value delivery,
/// so this crate fixes the convention instead of threading it through
/// (`spec.md` Open Question, resolved in DESIGN.md). Nothing is written on
/// first resume (`GeneratorReady`): there is no prior `yield` site whose
/// result register that value would correspond to.
fn resume_generator(ctx: &mut Context, gen: Value, f: &KFunction, resume_arg: Value) -> Result<Dispatched> {
    match f.state {
        FunctionState::GeneratorRunning => return Err(Error::GeneratorRunning),
        FunctionState::GeneratorDone => return Err(Error::GeneratorEnd),
        FunctionState::GeneratorReady | FunctionState::GeneratorActive => {}
        _ => return Err(Error::NotGenerator),
    }
    let seg_id = f.generator_stack_frame.ok_or(Error::NotGenerator)?;
    let was_active = f.state == FunctionState::GeneratorActive;

    if let HeapObject::Func(stored) = ctx.heap.get_mut(gen)? {
        stored.state = FunctionState::GeneratorRunning;
    }

    ctx.stack
        .stack_push(gen, f.num_regs, 0, NO_REG, f.instr_offs, PushKind::ResumeGenerator(seg_id))?;
    if was_active {
        if let Some(frame) = ctx.stack.current_frame_mut() {
            frame.regs[0] = resume_arg;
        }
    }
    Ok(Dispatched::Pushed)
}

/// `spec.md` §6 `call(func, this, args) → value | exception`. Also the path
/// every in-bytecode `CALL`/`CALL_N`/`CALL_FUN` instruction recurses
/// through.
pub fn call_value(ctx: &mut Context, func: Value, this: Value, args: &[Value]) -> core::result::Result<Value, Value> {
    let before = ctx.stack.stack_depth;
    match dispatch(ctx, CallKind::Call, func, this, args) {
        Ok(Dispatched::Immediate(v)) => return Ok(v),
        Ok(Dispatched::Pushed) => {}
        Err(e) => return Err(raise(ctx, e)),
    }
    super::run_to_return(ctx, before)
}

/// `TAIL_CALL`/`TAIL_CALL_N`/`TAIL_CALL_FUN`: dispatched the same as a
/// regular call (see [`CallKind`]).
pub fn tail_call_value(ctx: &mut Context, func: Value, this: Value, args: &[Value]) -> core::result::Result<Value, Value> {
    let before = ctx.stack.stack_depth;
    match dispatch(ctx, CallKind::Tail, func, this, args) {
        Ok(Dispatched::Immediate(v)) => return Ok(v),
        Ok(Dispatched::Pushed) => {}
        Err(e) => return Err(raise(ctx, e)),
    }
    super::run_to_return(ctx, before)
}

/// `NEW`: construct `this` from `func.prototype`, run the constructor body,
/// and discard its return value — `this` is always the result, since the
/// constructor cannot override it (`spec.md` §4.4 step 8). A native handler
/// is the one exception: it receives the function's prototype as `this`
/// and its return value becomes the instance unconditionally.
pub fn construct(ctx: &mut Context, func: Value, args: &[Value]) -> core::result::Result<Value, Value> {
    let before = ctx.stack.stack_depth;
    let f = match function_of(ctx, func) {
        Ok(f) => f,
        Err(e) => return Err(raise(ctx, e)),
    };
    if f.state.is_generator() {
        return Err(raise(ctx, Error::NewWithGenerator));
    }
    if let Some(native) = f.native_handler {
        return match native(ctx, f.prototype, args) {
            Ok(result) => Ok(result),
            Err(e) => Err(raise(ctx, e)),
        };
    }
    let proto = (!f.prototype.is_bad()).then_some(f.prototype);
    let new_this = match ctx.new_object(proto) {
        Ok(v) => v,
        Err(e) => return Err(raise(ctx, e)),
    };
    if let Err(e) = push_and_bind(ctx, func, &f, new_this, args) {
        return Err(raise(ctx, e));
    }
    match super::run_to_return(ctx, before) {
        Ok(_) => Ok(new_this),
        Err(e) => Err(e),
    }
}

/// `CALL_GEN`. Returns the yielded value (generator still active) or the
/// final return value (generator finished on this call). The opcode handler
/// owns the "already `GeneratorDone`" short-circuit; this function always
/// performs a resume.
pub fn call_generator(ctx: &mut Context, gen: Value, resume_arg: Value) -> core::result::Result<Value, Value> {
    let before = ctx.stack.stack_depth;
    let f = match function_of(ctx, gen) {
        Ok(f) => f,
        Err(e) => return Err(raise(ctx, e)),
    };
    let seg_id = f.generator_stack_frame;
    match resume_generator(ctx, gen, &f, resume_arg) {
        Ok(Dispatched::Pushed) => {}
        Ok(Dispatched::Immediate(_)) => unreachable!("resume_generator never returns Immediate"),
        Err(e) => return Err(raise(ctx, e)),
    }
    let result = super::run_to_return(ctx, before);
    if let Some(id) = seg_id {
        let done = ctx.stack.segment(id).frames.is_empty();
        if let Ok(HeapObject::Func(stored)) = ctx.heap.get_mut(gen) {
            stored.state = if done {
                FunctionState::GeneratorDone
            } else {
                FunctionState::GeneratorActive
            };
        }
    }
    result
}
