// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Exception wrapping and backtrace capture (`spec.md` §4.5).
//!
//! A raw `THROW`n value is wrapped into an object carrying `value` (the
//! thrown payload) and `backtrace` (an array of per-frame descriptors) the
//! first time it crosses a catch boundary; re-wrapping an already-wrapped
//! exception only refreshes `backtrace`, so a caught-and-rethrown exception
//! keeps its original payload.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::heap::HeapObject;
use crate::value::Value;

/// Whether `value` is already an exception object produced by [`wrap`].
pub fn is_wrapped(ctx: &Context, value: Value) -> bool {
    match ctx.heap.get(value) {
        Ok(HeapObject::Obj(o)) => o.prototype == ctx.exception_proto,
        _ => false,
    }
}

/// `spec.md` §4.5: wrap `value` into an exception object, or refresh the
/// backtrace of one that is already wrapped.
pub fn wrap(ctx: &mut Context, value: Value) -> Result<Value> {
    if is_wrapped(ctx, value) {
        let trace = collect_frames(ctx)?;
        ctx.set_own_property(value, "backtrace", trace)?;
        return Ok(value);
    }

    let obj = ctx.new_object(Some(ctx.exception_proto))?;
    ctx.set_own_property(obj, "value", value)?;
    let trace = collect_frames(ctx)?;
    ctx.set_own_property(obj, "backtrace", trace)?;
    Ok(obj)
}

/// Walk the active frame chain (innermost first) into a fresh array of
/// frame descriptors. Only the live chain is walked — a generator's
/// detached, suspended segment (`Segment::held_reentrant`) is not part of
/// the backtrace of the code that is currently raising.
fn collect_frames(ctx: &mut Context) -> Result<Value> {
    let trace = ctx.new_array(0)?;
    let mut seg_id = ctx.stack.top_segment_id();
    while let Some(id) = seg_id {
        let (frames, back_link) = {
            let seg = ctx.stack.segment(id);
            (seg.frames.clone(), seg.back_link)
        };
        for frame in frames.iter().rev() {
            let desc = describe_frame(ctx, frame.function, frame.ip)?;
            ctx.array_push(trace, desc)?;
        }
        seg_id = back_link;
    }
    Ok(trace)
}

/// Build one backtrace entry: `module`, `path`, `line`, `offset`, `function`
/// (`spec.md` §4.5).
fn describe_frame(ctx: &mut Context, function: Value, ip: u32) -> Result<Value> {
    let (module_handle, func_name) = match ctx.heap.get(function)? {
        HeapObject::Func(f) => (f.module, f.name.clone()),
        _ => return Err(Error::InvalidInstruction),
    };
    let module_value = Value::Heap(module_handle);
    let (mod_name, mod_path, line) = match ctx.heap.get(module_value)? {
        HeapObject::Mod(m) => (m.name.clone(), m.path.clone(), m.lines.addr_to_line(ip)),
        _ => return Err(Error::InvalidInstruction),
    };

    let entry = ctx.new_object(None)?;
    let module_str = ctx.new_string(&mod_name)?;
    ctx.set_own_property(entry, "module", module_str)?;
    let path_str = ctx.new_string(&mod_path)?;
    ctx.set_own_property(entry, "path", path_str)?;
    ctx.set_own_property(entry, "line", Value::Int(i64::from(line)))?;
    ctx.set_own_property(entry, "offset", Value::Int(i64::from(ip)))?;
    let function_str = ctx.new_string(&func_name)?;
    ctx.set_own_property(entry, "function", function_str)?;
    Ok(entry)
}
