// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The bytecode interpreter: decode/dispatch loop, property access,
//! arithmetic/comparison wiring, control flow, call dispatch, and exception
//! unwinding (`spec.md` §4.3/§4.4/§4.5).

pub mod arithmetic;
pub mod call;
pub mod comparison;
pub mod exception;

use alloc::string::String;
use alloc::vec::Vec;

use crate::bytecode::disassemble::{operand_layout, Layout};
use crate::bytecode::{Op, Reader};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::heap::{HeapObject, Movability};
use crate::value::karray::KArray;
use crate::value::kbuffer::KBuffer;
use crate::value::kfunction::{ArgLayout, FunctionState, KFunction, NO_REG};
use crate::value::kiterator::{IterSource, KIterator};
use crate::value::kobject::PropValue;
use crate::value::{HeapId, Value};

use arithmetic::ArithOp;
use comparison::CmpOp;

/// A decoded instruction's operands, one variant per [`Layout`].
#[derive(Clone, Copy, Debug)]
enum Operands {
    None,
    U8(u8),
    U8x2(u8, u8),
    U8x3(u8, u8, u8),
    U8Delta32(u8, u32),
    U8x2Delta32(u8, u8, u32),
    Delta32(u32),
    U8Int8(u8, i8),
    U8Int32(u8, i32),
    U8Int64(u8, i64),
    U8Float(u8, f64),
    U8ConstIdx8(u8, u8),
    U8ConstIdx32(u8, u32),
}

fn decode(code: &[u8], ip: u32) -> Result<(Op, Operands, u32)> {
    let mut r = Reader::new(code, ip);
    let op = r.read_op()?;
    let operands = match operand_layout(op) {
        Layout::None => Operands::None,
        Layout::U8 => Operands::U8(r.read_u8()?),
        Layout::U8x2 => Operands::U8x2(r.read_u8()?, r.read_u8()?),
        Layout::U8x3 => Operands::U8x3(r.read_u8()?, r.read_u8()?, r.read_u8()?),
        Layout::U8Delta32 => {
            let a = r.read_u8()?;
            Operands::U8Delta32(a, r.read_jump_target()?)
        }
        Layout::U8x2Delta32 => {
            let a = r.read_u8()?;
            let b = r.read_u8()?;
            Operands::U8x2Delta32(a, b, r.read_jump_target()?)
        }
        Layout::Delta32 => Operands::Delta32(r.read_jump_target()?),
        Layout::U8Int8 => Operands::U8Int8(r.read_u8()?, r.read_i8()?),
        Layout::U8Int32 => Operands::U8Int32(r.read_u8()?, r.read_i32()?),
        Layout::U8Int64 => Operands::U8Int64(r.read_u8()?, r.read_i64()?),
        Layout::U8Float => Operands::U8Float(r.read_u8()?, r.read_f64()?),
        Layout::U8ConstIdx8 => Operands::U8ConstIdx8(r.read_u8()?, r.read_u8()?),
        Layout::U8ConstIdx32 => Operands::U8ConstIdx32(r.read_u8()?, r.read_u32()?),
    };
    Ok((op, operands, r.ip))
}

/// `spec.md` §6 `run_module(module) → value | exception`: synthesize a
/// transient top-level function from the module's `entry_offset`/
/// `entry_num_regs` and call it with no arguments.
pub fn run_module(ctx: &mut Context, module: Value) -> core::result::Result<Value, Value> {
    let module_id = match module {
        Value::Heap(id) => id,
        _ => return Err(call::raise(ctx, Error::InvalidInstruction)),
    };
    let (entry_offset, entry_num_regs) = match ctx.heap.get(module) {
        Ok(HeapObject::Mod(m)) => (m.entry_offset, m.entry_num_regs),
        _ => return Err(call::raise(ctx, Error::InvalidInstruction)),
    };
    let synthetic = KFunction {
        state: FunctionState::Regular,
        is_class: false,
        num_regs: entry_num_regs,
        min_args: 0,
        num_def_args: 0,
        layout: ArgLayout {
            args_reg: NO_REG,
            rest_reg: NO_REG,
            ellipsis_reg: NO_REG,
            this_reg: NO_REG,
            bind_reg: NO_REG,
        },
        instr_offs: entry_offset,
        module: module_id,
        name: String::from("<module>"),
        binds: Vec::new(),
        defaults: Vec::new(),
        arg_map: Vec::new(),
        native_handler: None,
        prototype: Value::Bad,
        generator_stack_frame: None,
    };
    let func = match ctx.heap.allocate(Movability::Movable, HeapObject::Func(synthetic)) {
        Ok(f) => f,
        Err(e) => return Err(call::raise(ctx, e)),
    };
    call::call_value(ctx, func, Value::Void, &[])
}

/// Drive instructions until the invocation that started at stack depth
/// `before` has returned (`RETURN`) or suspended (`YIELD`), or an exception
/// has escaped it.
pub(crate) fn run_to_return(ctx: &mut Context, before: usize) -> core::result::Result<Value, Value> {
    loop {
        if ctx.stack.stack_depth <= before {
            break;
        }
        step(ctx);
        if ctx.pending_exception().is_some() {
            match propagate_exception(ctx, before) {
                Unwind::Caught => continue,
                Unwind::Escaped => return Err(ctx.exception),
            }
        }
    }
    Ok(core::mem::replace(&mut ctx.return_slot, Value::Bad))
}

enum Unwind {
    Caught,
    Escaped,
}

/// `spec.md` §4.5: on a pending exception, look for an armed `CATCH` in the
/// current frame; if none, pop frames until either a catch is found or this
/// call's own boundary (`before`) is reached.
fn propagate_exception(ctx: &mut Context, before: usize) -> Unwind {
    loop {
        let armed = ctx
            .stack
            .current_frame()
            .and_then(|f| f.catch_offs.map(|offs| (f.catch_reg, offs)));
        if let Some((catch_reg, offs)) = armed {
            let value = ctx.exception;
            ctx.clear_exception();
            if let Some(frame) = ctx.stack.current_frame_mut() {
                frame.catch_offs = None;
                if catch_reg != NO_REG {
                    frame.regs[catch_reg as usize] = value;
                }
                frame.ip = offs;
            }
            return Unwind::Caught;
        }

        if ctx.stack.stack_depth <= before {
            let raw = ctx.exception;
            if let Ok(wrapped) = exception::wrap(ctx, raw) {
                ctx.exception = wrapped;
            }
            return Unwind::Escaped;
        }

        if ctx.stack.stack_pop().is_err() {
            return Unwind::Escaped;
        }
    }
}

fn step(ctx: &mut Context) {
    if let Err(e) = step_inner(ctx) {
        ctx.raise_error(e);
    }
}

fn step_inner(ctx: &mut Context) -> Result<()> {
    let (function_value, ip) = {
        let frame = ctx.stack.current_frame().ok_or(Error::InvalidInstruction)?;
        (frame.function, frame.ip)
    };

    let (native, module_handle) = match ctx.heap.get(function_value)? {
        HeapObject::Func(f) => (f.native_handler, f.module),
        _ => return Err(Error::InvalidInstruction),
    };

    if let Some(handler) = native {
        return step_native(ctx, handler);
    }

    let (op, operands, new_ip) = {
        let code = match ctx.heap.get(Value::Heap(module_handle))? {
            HeapObject::Mod(m) => &m.bytecode,
            _ => return Err(Error::InvalidInstruction),
        };
        decode(code, ip)?
    };

    if let Some(frame) = ctx.stack.current_frame_mut() {
        frame.ip = new_ip;
    }

    execute(ctx, module_handle, op, operands)
}

/// A native-function frame has no bytecode to decode: ordinary calls bypass
/// the stack entirely (`vm::call::dispatch`), but a resumed generator whose
/// underlying function is native still lands here.
fn step_native(ctx: &mut Context, handler: crate::value::kfunction::NativeFn) -> Result<()> {
    let this = ctx.stack.current_frame().map(|f| f.regs[0]).unwrap_or(Value::Bad);
    let value = handler(ctx, this, &[])?;
    do_return(ctx, value)
}

fn reg(ctx: &Context, r: u8) -> Value {
    ctx.stack
        .current_frame()
        .and_then(|f| f.regs.get(r as usize).copied())
        .unwrap_or(Value::Bad)
}

fn set_reg(ctx: &mut Context, r: u8, v: Value) {
    if let Some(frame) = ctx.stack.current_frame_mut() {
        if let Some(slot) = frame.regs.get_mut(r as usize) {
            *slot = v;
        }
    }
}

fn const_at(ctx: &Context, module: HeapId, idx: u32) -> Result<Value> {
    match ctx.heap.get(Value::Heap(module))? {
        HeapObject::Mod(m) => m.constants.get(idx as usize).copied().ok_or(Error::InvalidInstruction),
        _ => Err(Error::InvalidInstruction),
    }
}

fn const_string_at(ctx: &Context, module: HeapId, idx: u32) -> Result<String> {
    let v = const_at(ctx, module, idx)?;
    ctx.string_value(v)
}

/// A value's prototype link (`Value::Bad` if it has none or carries none).
fn prototype_of(ctx: &Context, v: Value) -> Value {
    match ctx.heap.get(v) {
        Ok(HeapObject::Obj(o)) => o.prototype,
        Ok(HeapObject::Func(f)) => f.prototype,
        _ => Value::Bad,
    }
}

/// `spec.md` §4.3 `GET`/`HAS`/`INSTANCE_OF`: walk the prototype chain,
/// invoking `visit` at each link; stops once `visit` returns `Some`.
fn walk_prototype_chain<T>(ctx: &Context, start: Value, mut visit: impl FnMut(Value) -> Option<T>) -> Option<T> {
    let mut current = start;
    let mut depth = 0usize;
    while !current.is_bad() {
        if let Some(result) = visit(current) {
            return Some(result);
        }
        if depth >= ctx.config.max_structural_depth {
            return None;
        }
        depth += 1;
        current = prototype_of(ctx, current);
    }
    None
}

/// `spec.md` §4.3 `GET`: resolve `key` on `obj`'s own chain, invoking a
/// dynamic getter as a call if one is found. Missing properties resolve to
/// `void` rather than raising.
fn get_property(ctx: &mut Context, obj: Value, key: &str) -> core::result::Result<Value, Value> {
    let found = walk_prototype_chain(ctx, obj, |link| match ctx.heap.get(link) {
        Ok(HeapObject::Obj(o)) => o.get_own(key),
        _ => None,
    });
    match found {
        Some(PropValue::Plain(v)) => Ok(v),
        Some(PropValue::Dynamic { getter, .. }) => call::call_value(ctx, getter, obj, &[]),
        None => Ok(Value::Void),
    }
}

fn set_property(ctx: &mut Context, obj: Value, key: &str, value: Value) -> core::result::Result<(), Value> {
    let dynamic_setter = walk_prototype_chain(ctx, obj, |link| match ctx.heap.get(link) {
        Ok(HeapObject::Obj(o)) => match o.get_own(key) {
            Some(PropValue::Dynamic { setter, .. }) => Some(setter),
            _ => None,
        },
        _ => None,
    });
    if let Some(setter) = dynamic_setter {
        call::call_value(ctx, setter, obj, &[value]).map(|_| ())
    } else {
        ctx.set_own_property(obj, key, value).map_err(|e| call::raise(ctx, e))
    }
}

fn has_property(ctx: &Context, obj: Value, key: &str) -> bool {
    walk_prototype_chain(ctx, obj, |link| match ctx.heap.get(link) {
        Ok(HeapObject::Obj(o)) if o.has_own(key) => Some(()),
        _ => None,
    })
    .is_some()
}

/// Resolve an element access (`GET_ELEM`) across array/buffer.
fn get_elem(ctx: &Context, obj: Value, index: i64) -> Result<Value> {
    match ctx.heap.get(obj)? {
        HeapObject::Arr(a) => {
            let idx = a.resolve_index(index).ok_or(Error::InvalidIndex)?;
            Ok(a.get(idx).unwrap_or(Value::Void))
        }
        HeapObject::Buf(b) => {
            let idx = b.resolve_index(index).ok_or(Error::InvalidIndex)?;
            Ok(Value::Int(i64::from(b.get(idx).ok_or(Error::InvalidIndex)?)))
        }
        _ => Err(Error::InvalidIndex),
    }
}

/// `GET_ELEM` on a string: resolved separately since it allocates a
/// one-character result string.
fn get_string_elem(ctx: &mut Context, obj: Value, index: i64) -> Result<Value> {
    let s = ctx.string_value(obj)?;
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let idx = if index < 0 { index + len } else { index };
    if idx < 0 || idx >= len {
        return Err(Error::InvalidIndex);
    }
    let mut one = String::new();
    one.push(chars[idx as usize]);
    ctx.new_string(&one)
}

fn set_elem(ctx: &mut Context, obj: Value, index: i64, value: Value) -> Result<()> {
    match ctx.heap.get_mut(obj)? {
        HeapObject::Arr(a) => {
            let idx = a.resolve_index(index).ok_or(Error::InvalidIndex)?;
            a.set(idx, value);
            Ok(())
        }
        HeapObject::Buf(b) => {
            let idx = b.resolve_index(index).ok_or(Error::InvalidIndex)?;
            let byte = match value {
                Value::Int(n) if (0..=255).contains(&n) => n as u8,
                _ => return Err(Error::InvalidByteValue),
            };
            b.set(idx, byte)
        }
        _ => Err(Error::InvalidIndex),
    }
}

fn instance_of(ctx: &Context, obj: Value, proto: Value) -> bool {
    let start = prototype_of(ctx, obj);
    walk_prototype_chain(ctx, start, |link| (link == proto).then_some(())).is_some()
}

fn delete_own(ctx: &mut Context, obj: Value, key: &str) -> Result<bool> {
    match ctx.heap.get_mut(obj)? {
        HeapObject::Obj(o) => Ok(o.delete(key).is_some()),
        _ => Err(Error::InvalidInstruction),
    }
}

fn args_array(ctx: &Context, arr: Value) -> Result<Vec<Value>> {
    match ctx.heap.get(arr)? {
        HeapObject::Arr(a) => Ok(a.as_slice().to_vec()),
        _ => Err(Error::ArgsNotArray),
    }
}

fn do_return(ctx: &mut Context, value: Value) -> Result<()> {
    let popped = ctx.stack.stack_pop()?;
    if popped.ret_reg == NO_REG {
        ctx.return_slot = value;
    } else if let Some(caller) = ctx.stack.current_frame_mut() {
        if let Some(slot) = caller.regs.get_mut(popped.ret_reg as usize) {
            *slot = value;
        }
    }
    Ok(())
}

fn do_yield(ctx: &mut Context, value: Value) -> Result<()> {
    let ret_reg = ctx.stack.current_frame().map(|f| f.ret_reg).unwrap_or(NO_REG);
    ctx.stack.stack_suspend()?;
    if ret_reg == NO_REG {
        ctx.return_slot = value;
    } else if let Some(caller) = ctx.stack.current_frame_mut() {
        if let Some(slot) = caller.regs.get_mut(ret_reg as usize) {
            *slot = value;
        }
    }
    Ok(())
}

/// Advance an iterator, dispatching a generator resume through
/// [`call::call_generator`] when the source is a generator
/// (`spec.md` §4.3 `NEXT`/`NEXT_JUMP`). Returns `Ok(None)` on exhaustion.
fn next_value(ctx: &mut Context, iter_value: Value) -> core::result::Result<Option<Value>, Value> {
    let generator = match ctx.heap.get(iter_value) {
        Ok(HeapObject::Iter(KIterator {
            source: IterSource::Generator(g),
            done: false,
            ..
        })) => Some(*g),
        _ => None,
    };

    if let Some(gen) = generator {
        let done_before = matches!(ctx.heap.get(gen), Ok(HeapObject::Func(f)) if f.state == FunctionState::GeneratorDone);
        if done_before {
            if let Ok(HeapObject::Iter(it)) = ctx.heap.get_mut(iter_value) {
                it.done = true;
            }
            return Ok(None);
        }
        let value = call::call_generator(ctx, gen, Value::Void)?;
        let done_after = matches!(ctx.heap.get(gen), Ok(HeapObject::Func(f)) if f.state == FunctionState::GeneratorDone);
        if let Ok(HeapObject::Iter(it)) = ctx.heap.get_mut(iter_value) {
            it.done = done_after;
        }
        return Ok(if done_after { None } else { Some(value) });
    }

    // `KIterator::advance` only steps the ctx-free `Array` source; the
    // others need a `Context` to build their yielded value (a one-character
    // string, a `[key, value]` pair), so they are driven here instead.
    let (source, position, done) = match ctx.heap.get(iter_value) {
        Ok(HeapObject::Iter(it)) => (it.source.clone(), it.position, it.done),
        Err(e) => return Err(call::raise(ctx, e)),
        _ => return Err(call::raise(ctx, Error::InvalidInstruction)),
    };
    if done {
        return Ok(None);
    }

    let has_next = match &source {
        IterSource::Generator(_) => unreachable!("handled above"),
        IterSource::Array(_) => match ctx.heap.get_mut(iter_value) {
            Ok(HeapObject::Iter(it)) => return Ok(it.advance()),
            Err(e) => return Err(call::raise(ctx, e)),
            _ => return Err(call::raise(ctx, Error::InvalidInstruction)),
        },
        IterSource::Str(chars) => position < chars.len(),
        IterSource::Buffer(bytes) => position < bytes.len(),
        IterSource::Object(entries) => position < entries.len(),
    };

    match has_next {
        false => {
            if let Ok(HeapObject::Iter(it)) = ctx.heap.get_mut(iter_value) {
                it.done = true;
            }
            Ok(None)
        }
        true => {
            let built: Result<Value> = match &source {
                IterSource::Str(chars) => {
                    let mut s = String::new();
                    s.push(chars[position]);
                    ctx.new_string(&s)
                }
                IterSource::Buffer(bytes) => Ok(Value::Int(i64::from(bytes[position]))),
                IterSource::Object(entries) => {
                    let (key, val) = entries[position].clone();
                    (|| {
                        let key_str = ctx.new_string(&key)?;
                        let pair = ctx.new_array(0)?;
                        ctx.array_push(pair, key_str)?;
                        ctx.array_push(pair, val)?;
                        Ok(pair)
                    })()
                }
                IterSource::Array(_) | IterSource::Generator(_) => unreachable!("handled above"),
            };
            let value = built.map_err(|e| call::raise(ctx, e))?;
            if let Ok(HeapObject::Iter(it)) = ctx.heap.get_mut(iter_value) {
                it.position += 1;
            }
            Ok(Some(value))
        }
    }
}

/// `spec.md` §4.3: `LOAD_FUN`/`LOAD_CLASS` instantiate a fresh closure
/// descriptor from the module's function-template constant pool entry,
/// sharing the immutable body but starting with no captured binds.
fn load_callable(ctx: &mut Context, module: HeapId, idx: u32, is_class: bool) -> Result<Value> {
    let template_value = const_at(ctx, module, idx)?;
    let mut f = match ctx.heap.get(template_value)? {
        HeapObject::Func(f) => f.clone(),
        _ => return Err(Error::InvalidInstruction),
    };
    f.is_class = is_class;
    if is_class {
        f.state = FunctionState::Constructor;
        if f.prototype.is_bad() {
            f.prototype = ctx.new_object(None)?;
        }
    }
    ctx.heap.allocate(Movability::Movable, HeapObject::Func(f))
}

fn load_iter(ctx: &mut Context, src: Value) -> Result<Value> {
    let source = match ctx.heap.get(src)? {
        HeapObject::Func(f) if f.state.is_generator() => IterSource::Generator(src),
        HeapObject::Arr(a) => IterSource::Array(a.as_slice().to_vec()),
        HeapObject::Buf(b) => IterSource::Buffer(b.as_slice().to_vec()),
        HeapObject::Str(_) => {
            let s = ctx.string_value(src)?;
            IterSource::Str(s.chars().collect())
        }
        HeapObject::Obj(o) => IterSource::Object(
            o.iter()
                .map(|(k, v)| {
                    (
                        String::from(k),
                        match v {
                            PropValue::Plain(v) => *v,
                            PropValue::Dynamic { getter, .. } => *getter,
                        },
                    )
                })
                .collect(),
        ),
        HeapObject::Iter(it) => it.source.clone(),
        _ => return Err(Error::InvalidInstruction),
    };
    ctx.heap.allocate(Movability::Movable, HeapObject::Iter(KIterator::new(source)))
}

/// `GET_RANGE`: the op's three operands leave no room for a separate object
/// register, so (as with the `*Prop8` family) the destination register also
/// supplies the source value, read before being overwritten (see DESIGN.md).
fn get_range(ctx: &mut Context, obj: Value, begin: Option<i64>, end: Option<i64>) -> Result<Value> {
    match ctx.heap.get(obj)? {
        HeapObject::Arr(a) => {
            let items = a.slice(begin, end);
            let mut arr = KArray::new();
            for v in items {
                arr.push(v);
            }
            ctx.heap.allocate(Movability::Movable, HeapObject::Arr(arr))
        }
        HeapObject::Buf(b) => {
            let bytes = b.slice(begin, end);
            let mut buf = KBuffer::with_capacity(bytes.len());
            for (i, byte) in bytes.into_iter().enumerate() {
                let _ = buf.set(i, byte);
            }
            ctx.heap.allocate(Movability::Movable, HeapObject::Buf(buf))
        }
        _ => Err(Error::InvalidInstruction),
    }
}

/// Append `self_value`/a captured slot to a closure, producing a fresh
/// function object (`spec.md` §4.3 `BIND`/`BIND_SELF`: append a bound value
/// to an immutable closure template's `binds`).
fn bind_value(ctx: &mut Context, func_reg: u8, val_reg: u8) -> Result<()> {
    let value = reg(ctx, val_reg);
    let func = reg(ctx, func_reg);
    let mut f = match ctx.heap.get(func)? {
        HeapObject::Func(f) => f.clone(),
        _ => return Err(Error::NotCallable),
    };
    f.binds.push(value);
    let new_func = ctx.heap.allocate(Movability::Movable, HeapObject::Func(f))?;
    set_reg(ctx, func_reg, new_func);
    Ok(())
}

fn arith_op_for(op: Op) -> ArithOp {
    match op {
        Op::Add => ArithOp::Add,
        Op::Sub => ArithOp::Sub,
        Op::Mul => ArithOp::Mul,
        Op::Div => ArithOp::Div,
        Op::Mod => ArithOp::Mod,
        Op::BitAnd => ArithOp::BitAnd,
        Op::BitOr => ArithOp::BitOr,
        Op::BitXor => ArithOp::BitXor,
        Op::Shl => ArithOp::Shl,
        Op::Shr => ArithOp::Shr,
        Op::Ssr => ArithOp::Ssr,
        _ => unreachable!("arith_op_for called with non-arithmetic op"),
    }
}

fn cmp_op_for(op: Op) -> CmpOp {
    match op {
        Op::CmpEq => CmpOp::Eq,
        Op::CmpNe => CmpOp::Ne,
        Op::CmpLt => CmpOp::Lt,
        Op::CmpLe => CmpOp::Le,
        Op::CmpGt => CmpOp::Gt,
        Op::CmpGe => CmpOp::Ge,
        _ => unreachable!("cmp_op_for called with non-comparison op"),
    }
}

fn jump(ctx: &mut Context, target: u32) {
    if let Some(frame) = ctx.stack.current_frame_mut() {
        frame.ip = target;
    }
}

#[allow(clippy::too_many_lines)]
fn execute(ctx: &mut Context, module: HeapId, op: Op, operands: Operands) -> Result<()> {
    match (op, operands) {
        (Op::LoadTrue, Operands::U8(d)) => set_reg(ctx, d, Value::Bool(true)),
        (Op::LoadFalse, Operands::U8(d)) => set_reg(ctx, d, Value::Bool(false)),
        (Op::LoadVoid, Operands::U8(d)) => set_reg(ctx, d, Value::Void),
        (Op::LoadInt8, Operands::U8Int8(d, v)) => set_reg(ctx, d, Value::Int(i64::from(v))),
        (Op::LoadInt32, Operands::U8Int32(d, v)) => set_reg(ctx, d, Value::Int(i64::from(v))),
        (Op::LoadInt64, Operands::U8Int64(d, v)) => set_reg(ctx, d, Value::Int(v)),
        (Op::LoadFloat, Operands::U8Float(d, v)) => set_reg(ctx, d, Value::Float(v)),
        (Op::LoadConst8, Operands::U8ConstIdx8(d, idx)) => {
            let v = const_at(ctx, module, u32::from(idx))?;
            set_reg(ctx, d, v);
        }
        (Op::LoadConst32, Operands::U8ConstIdx32(d, idx)) => {
            let v = const_at(ctx, module, idx)?;
            set_reg(ctx, d, v);
        }
        (Op::LoadFun8 | Op::LoadClass8, Operands::U8ConstIdx8(d, idx)) => {
            let v = load_callable(ctx, module, u32::from(idx), op == Op::LoadClass8)?;
            set_reg(ctx, d, v);
        }
        (Op::LoadFun32 | Op::LoadClass32, Operands::U8ConstIdx32(d, idx)) => {
            let v = load_callable(ctx, module, idx, op == Op::LoadClass32)?;
            set_reg(ctx, d, v);
        }
        (Op::LoadArray8, Operands::U8Int8(d, size)) => {
            let v = ctx.new_array(size.max(0) as usize)?;
            set_reg(ctx, d, v);
        }
        (Op::LoadArray32, Operands::U8Int32(d, size)) => {
            let v = ctx.new_array(size.max(0) as usize)?;
            set_reg(ctx, d, v);
        }
        (Op::LoadObj, Operands::U8x2(d, proto_src)) => {
            let proto = reg(ctx, proto_src);
            let v = ctx.new_object((!proto.is_bad()).then_some(proto))?;
            set_reg(ctx, d, v);
        }
        (Op::LoadIter, Operands::U8x2(d, src)) => {
            let source = reg(ctx, src);
            let v = load_iter(ctx, source)?;
            set_reg(ctx, d, v);
        }
        (Op::Move, Operands::U8x2(d, src)) => {
            let v = reg(ctx, src);
            set_reg(ctx, d, v);
        }
        (Op::GetGlobal, Operands::U8Int32(r, idx)) => {
            let v = match ctx.heap.get(Value::Heap(module))? {
                HeapObject::Mod(m) => m.get_global(idx as u32).unwrap_or(Value::Void),
                _ => return Err(Error::InvalidInstruction),
            };
            set_reg(ctx, r, v);
        }
        (Op::SetGlobal, Operands::U8Int32(r, idx)) => {
            let v = reg(ctx, r);
            if let HeapObject::Mod(m) = ctx.heap.get_mut(Value::Heap(module))? {
                m.set_global(idx as u32, v);
            }
        }
        (Op::GetMod, Operands::U8ConstIdx8(d, idx)) => {
            let v = const_at(ctx, module, u32::from(idx))?;
            set_reg(ctx, d, v);
        }
        (Op::GetModElem, Operands::U8x3(d, mod_reg, idx_reg)) => {
            let m = reg(ctx, mod_reg);
            let idx = match reg(ctx, idx_reg) {
                Value::Int(n) => n as u32,
                _ => return Err(Error::InvalidIndex),
            };
            let v = match ctx.heap.get(m)? {
                HeapObject::Mod(mo) => mo.get_global(idx).unwrap_or(Value::Void),
                _ => return Err(Error::InvalidInstruction),
            };
            set_reg(ctx, d, v);
        }
        (Op::Get, Operands::U8x3(d, obj_reg, key_reg)) => {
            let obj = reg(ctx, obj_reg);
            let key_val = reg(ctx, key_reg);
            let key = ctx.string_value(key_val)?;
            if let Ok(v) = get_property(ctx, obj, &key) {
                set_reg(ctx, d, v);
            }
        }
        (Op::Set, Operands::U8x3(obj_reg, key_reg, val_reg)) => {
            let obj = reg(ctx, obj_reg);
            let key_val = reg(ctx, key_reg);
            let key = ctx.string_value(key_val)?;
            let value = reg(ctx, val_reg);
            let _ = set_property(ctx, obj, &key, value);
        }
        (Op::Has, Operands::U8x3(d, obj_reg, key_reg)) => {
            let obj = reg(ctx, obj_reg);
            let key_val = reg(ctx, key_reg);
            let key = ctx.string_value(key_val)?;
            let found = has_property(ctx, obj, &key);
            set_reg(ctx, d, Value::Bool(found));
        }
        (Op::Del, Operands::U8x3(d, obj_reg, key_reg)) => {
            let obj = reg(ctx, obj_reg);
            let key_val = reg(ctx, key_reg);
            let key = ctx.string_value(key_val)?;
            let existed = delete_own(ctx, obj, &key)?;
            set_reg(ctx, d, Value::Bool(existed));
        }
        (Op::GetProp8, Operands::U8ConstIdx8(d, idx)) => {
            let name = const_string_at(ctx, module, u32::from(idx))?;
            let obj = reg(ctx, 0);
            if let Ok(v) = get_property(ctx, obj, &name) {
                set_reg(ctx, d, v);
            }
        }
        (Op::SetProp8, Operands::U8ConstIdx8(src, idx)) => {
            let name = const_string_at(ctx, module, u32::from(idx))?;
            let obj = reg(ctx, 0);
            let value = reg(ctx, src);
            let _ = set_property(ctx, obj, &name, value);
        }
        (Op::HasShProp8, Operands::U8ConstIdx8(d, idx)) => {
            let name = const_string_at(ctx, module, u32::from(idx))?;
            let obj = reg(ctx, 0);
            let found = matches!(ctx.heap.get(obj), Ok(HeapObject::Obj(o)) if o.has_own(&name));
            set_reg(ctx, d, Value::Bool(found));
        }
        (Op::HasDpProp8, Operands::U8ConstIdx8(d, idx)) => {
            let name = const_string_at(ctx, module, u32::from(idx))?;
            let obj = reg(ctx, 0);
            let found = matches!(
                ctx.heap.get(obj),
                Ok(HeapObject::Obj(o)) if matches!(o.get_own(&name), Some(PropValue::Dynamic { .. }))
            );
            set_reg(ctx, d, Value::Bool(found));
        }
        (Op::DelProp8, Operands::U8ConstIdx8(d, idx)) => {
            let name = const_string_at(ctx, module, u32::from(idx))?;
            let obj = reg(ctx, 0);
            let existed = delete_own(ctx, obj, &name)?;
            set_reg(ctx, d, Value::Bool(existed));
        }
        (Op::GetElem, Operands::U8x3(d, obj_reg, idx_reg)) => {
            let obj = reg(ctx, obj_reg);
            let idx = match reg(ctx, idx_reg) {
                Value::Int(n) => n,
                _ => return Err(Error::InvalidIndex),
            };
            let is_string = matches!(ctx.heap.get(obj), Ok(HeapObject::Str(_)));
            let v = if is_string {
                get_string_elem(ctx, obj, idx)?
            } else {
                get_elem(ctx, obj, idx)?
            };
            set_reg(ctx, d, v);
        }
        (Op::SetElem, Operands::U8x3(obj_reg, idx_reg, val_reg)) => {
            let obj = reg(ctx, obj_reg);
            let idx = match reg(ctx, idx_reg) {
                Value::Int(n) => n,
                _ => return Err(Error::InvalidIndex),
            };
            let value = reg(ctx, val_reg);
            set_elem(ctx, obj, idx, value)?;
        }
        (Op::GetRange, Operands::U8x3(d, begin_reg, end_reg)) => {
            let obj = reg(ctx, d);
            let begin = match reg(ctx, begin_reg) {
                Value::Void => None,
                Value::Int(n) => Some(n),
                _ => return Err(Error::InvalidIndex),
            };
            let end = match reg(ctx, end_reg) {
                Value::Void => None,
                Value::Int(n) => Some(n),
                _ => return Err(Error::InvalidIndex),
            };
            let v = get_range(ctx, obj, begin, end)?;
            set_reg(ctx, d, v);
        }
        (Op::GetProto, Operands::U8x2(d, src)) => {
            let v = reg(ctx, src);
            let proto = prototype_of(ctx, v);
            set_reg(ctx, d, proto);
        }
        (Op::Type, Operands::U8x2(d, src)) => {
            let v = reg(ctx, src);
            let t = ctx.type_of(v)?;
            let s = ctx.new_string(t.type_name())?;
            set_reg(ctx, d, s);
        }
        (Op::Not, Operands::U8x2(d, src)) => {
            let v = reg(ctx, src);
            set_reg(ctx, d, Value::Bool(!v.is_truthy()));
        }
        (Op::BitNot, Operands::U8x2(d, src)) => {
            let v = reg(ctx, src);
            let r = arithmetic::bit_not(ctx, v)?;
            set_reg(ctx, d, r);
        }
        (
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::BitAnd | Op::BitOr | Op::BitXor | Op::Shl | Op::Shr
            | Op::Ssr,
            Operands::U8x3(d, a, b),
        ) => {
            let arith_op = arith_op_for(op);
            let lhs = reg(ctx, a);
            let rhs = reg(ctx, b);
            let v = arithmetic::binary(ctx, arith_op, lhs, rhs)?;
            set_reg(ctx, d, v);
        }
        (Op::CmpEq | Op::CmpNe | Op::CmpLt | Op::CmpLe | Op::CmpGt | Op::CmpGe, Operands::U8x3(d, a, b)) => {
            let cmp_op = cmp_op_for(op);
            let lhs = reg(ctx, a);
            let rhs = reg(ctx, b);
            let v = comparison::compare(ctx, cmp_op, lhs, rhs)?;
            set_reg(ctx, d, v);
        }
        (Op::Push, Operands::U8x3(arr_reg, val_reg, _)) => {
            let arr = reg(ctx, arr_reg);
            let value = reg(ctx, val_reg);
            if let HeapObject::Arr(a) = ctx.heap.get_mut(arr)? {
                a.push(value);
            }
        }
        (Op::PushEx, Operands::U8x3(arr_reg, val_reg, _)) => {
            let arr = reg(ctx, arr_reg);
            let src = reg(ctx, val_reg);
            let items = args_array(ctx, src)?;
            if let HeapObject::Arr(a) = ctx.heap.get_mut(arr)? {
                for item in items {
                    a.push(item);
                }
            }
        }
        (Op::InstanceOf, Operands::U8x3(d, obj_reg, proto_reg)) => {
            let obj = reg(ctx, obj_reg);
            let proto = reg(ctx, proto_reg);
            set_reg(ctx, d, Value::Bool(instance_of(ctx, obj, proto)));
        }
        (Op::BindSelf, Operands::U8x3(func_reg, self_reg, _)) => bind_value(ctx, func_reg, self_reg)?,
        (Op::Bind, Operands::U8x2(func_reg, val_reg)) => bind_value(ctx, func_reg, val_reg)?,
        (Op::BindDefaults, Operands::U8x2(func_reg, arr_reg)) => {
            let arr = reg(ctx, arr_reg);
            let defaults = args_array(ctx, arr)?;
            let func = reg(ctx, func_reg);
            let mut f = match ctx.heap.get(func)? {
                HeapObject::Func(f) => f.clone(),
                _ => return Err(Error::NotCallable),
            };
            f.defaults = defaults;
            let new_func = ctx.heap.allocate(Movability::Movable, HeapObject::Func(f))?;
            set_reg(ctx, func_reg, new_func);
        }
        (Op::Jump, Operands::Delta32(target)) => jump(ctx, target),
        (Op::JumpCond, Operands::U8Delta32(cond, target)) => {
            let v = reg(ctx, cond);
            if v.is_truthy() {
                jump(ctx, target);
            }
        }
        (Op::JumpNotCond, Operands::U8Delta32(cond, target)) => {
            let v = reg(ctx, cond);
            if !v.is_truthy() {
                jump(ctx, target);
            }
        }
        (Op::Call | Op::CallN | Op::CallFun, Operands::U8x3(d, func_reg, args_reg)) => {
            let func = reg(ctx, func_reg);
            let args_val = reg(ctx, args_reg);
            let args = call::resolve_args(ctx, func, args_val)?;
            if let Ok(v) = call::call_value(ctx, func, Value::Void, &args) {
                set_reg(ctx, d, v);
            }
        }
        (Op::TailCall | Op::TailCallN | Op::TailCallFun, Operands::U8x3(d, func_reg, args_reg)) => {
            let func = reg(ctx, func_reg);
            let args_val = reg(ctx, args_reg);
            let args = call::resolve_args(ctx, func, args_val)?;
            if let Ok(v) = call::tail_call_value(ctx, func, Value::Void, &args) {
                set_reg(ctx, d, v);
            }
        }
        (Op::New, Operands::U8x3(d, func_reg, args_reg)) => {
            let func = reg(ctx, func_reg);
            let args_val = reg(ctx, args_reg);
            let args = call::resolve_args(ctx, func, args_val)?;
            if let Ok(v) = call::construct(ctx, func, &args) {
                set_reg(ctx, d, v);
            }
        }
        (Op::CallGen, Operands::U8x3(d, gen_reg, arg_reg)) => {
            let gen = reg(ctx, gen_reg);
            let already_done = matches!(ctx.heap.get(gen), Ok(HeapObject::Func(f)) if f.state == FunctionState::GeneratorDone);
            if already_done {
                set_reg(ctx, d, Value::Void);
            } else {
                let arg = reg(ctx, arg_reg);
                if let Ok(v) = call::call_generator(ctx, gen, arg) {
                    set_reg(ctx, d, v);
                }
            }
        }
        (Op::Catch, Operands::U8Delta32(catch_reg, target)) => {
            if let Some(frame) = ctx.stack.current_frame_mut() {
                frame.catch_reg = catch_reg;
                frame.catch_offs = Some(target);
            }
        }
        (Op::Cancel, Operands::None) => {
            if let Some(frame) = ctx.stack.current_frame_mut() {
                frame.catch_offs = None;
            }
        }
        (Op::Throw, Operands::U8x2(val_reg, _)) => {
            let value = reg(ctx, val_reg);
            let wrapped = exception::wrap(ctx, value)?;
            ctx.raise(wrapped);
        }
        (Op::Return, Operands::U8x2(src, _)) => {
            let value = reg(ctx, src);
            do_return(ctx, value)?;
        }
        (Op::Yield, Operands::U8x2(val_reg, _)) => {
            let value = reg(ctx, val_reg);
            do_yield(ctx, value)?;
        }
        (Op::Next, Operands::U8x2(d, iter_reg)) => {
            let iter = reg(ctx, iter_reg);
            match next_value(ctx, iter) {
                Ok(Some(v)) => set_reg(ctx, d, v),
                Ok(None) => {
                    call::raise(ctx, Error::GeneratorEnd);
                }
                Err(_) => {}
            }
        }
        (Op::NextJump, Operands::U8x2Delta32(d, iter_reg, target)) => {
            let iter = reg(ctx, iter_reg);
            match next_value(ctx, iter) {
                Ok(Some(v)) => set_reg(ctx, d, v),
                Ok(None) => {
                    set_reg(ctx, d, Value::Bad);
                    jump(ctx, target);
                }
                Err(_) => {}
            }
        }
        _ => return Err(Error::InvalidInstruction),
    }
    Ok(())
}

#[cfg(test)]
mod vm_test {
    use super::*;
    use crate::bytecode::Assembler;
    use crate::config::VmConfig;
    use crate::value::kmodule::Module;

    fn module_with(ctx: &mut Context, code: Vec<u8>) -> HeapId {
        let module = ctx
            .heap
            .allocate(
                Movability::Movable,
                HeapObject::Mod(Module {
                    name: String::from("m"),
                    bytecode: code,
                    ..Module::default()
                }),
            )
            .unwrap();
        let Value::Heap(id) = module else { unreachable!() };
        id
    }

    fn function(ctx: &mut Context, module: HeapId, num_regs: u8, instr_offs: u32) -> Value {
        ctx.heap
            .allocate(
                Movability::Movable,
                HeapObject::Func(KFunction {
                    state: FunctionState::Regular,
                    is_class: false,
                    num_regs,
                    min_args: 0,
                    num_def_args: 0,
                    layout: ArgLayout::default(),
                    instr_offs,
                    module,
                    name: String::from("f"),
                    binds: Vec::new(),
                    defaults: Vec::new(),
                    arg_map: Vec::new(),
                    native_handler: None,
                    prototype: Value::Bad,
                    generator_stack_frame: None,
                }),
            )
            .unwrap()
    }

    #[test]
    fn arithmetic_and_return_round_trip() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let mut asm = Assembler::new();
        asm.op(Op::LoadInt8).u8(0).i8(2);
        asm.op(Op::LoadInt8).u8(1).i8(3);
        asm.op(Op::Add).u8(2).u8(0).u8(1);
        asm.op(Op::Return).u8(2).u8(NO_REG);
        let module = module_with(&mut ctx, asm.finish());
        let f = function(&mut ctx, module, 3, 0);
        let result = call::call_value(&mut ctx, f, Value::Bad, &[]).unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn jump_cond_jumps_past_the_first_block() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let mut asm = Assembler::new();
        asm.op(Op::LoadTrue).u8(0);
        asm.op(Op::JumpCond).u8(0);
        let skip_target_fixup = asm.here();
        asm.i32(0); // patched below
        asm.op(Op::LoadInt8).u8(1).i8(1);
        asm.op(Op::Return).u8(1).u8(NO_REG);
        let after_then = asm.here();
        asm.op(Op::LoadInt8).u8(1).i8(2);
        asm.op(Op::Return).u8(1).u8(NO_REG);
        let mut code = asm.finish();
        let delta = after_then as i64 - (skip_target_fixup as i64 + 4);
        code[skip_target_fixup as usize..skip_target_fixup as usize + 4]
            .copy_from_slice(&(delta as i32).to_le_bytes());
        let module = module_with(&mut ctx, code);
        let f = function(&mut ctx, module, 2, 0);
        let result = call::call_value(&mut ctx, f, Value::Bad, &[]).unwrap();
        assert_eq!(result, Value::Int(2));
    }

    #[test]
    fn throw_uncaught_escapes_as_wrapped_exception() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let mut asm = Assembler::new();
        asm.op(Op::LoadInt8).u8(0).i8(9);
        asm.op(Op::Throw).u8(0).u8(NO_REG);
        let module = module_with(&mut ctx, asm.finish());
        let f = function(&mut ctx, module, 1, 0);
        let err = call::call_value(&mut ctx, f, Value::Bad, &[]).unwrap_err();
        assert!(exception::is_wrapped(&ctx, err));
    }

    #[test]
    fn catch_redirects_to_handler_offset() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let mut asm = Assembler::new();
        asm.op(Op::Catch).u8(1);
        let catch_fixup = asm.here();
        asm.i32(0);
        asm.op(Op::LoadInt8).u8(0).i8(9);
        asm.op(Op::Throw).u8(0).u8(NO_REG);
        let handler_offset = asm.here();
        asm.op(Op::Return).u8(1).u8(NO_REG);
        let mut code = asm.finish();
        let delta = handler_offset as i64 - (catch_fixup as i64 + 4);
        code[catch_fixup as usize..catch_fixup as usize + 4].copy_from_slice(&(delta as i32).to_le_bytes());
        let module = module_with(&mut ctx, code);
        let f = function(&mut ctx, module, 2, 0);
        let result = call::call_value(&mut ctx, f, Value::Bad, &[]).unwrap();
        assert!(exception::is_wrapped(&ctx, result));
        let payload = ctx.get_own_property(result, "value").unwrap().unwrap();
        assert_eq!(payload, Value::Int(9));
    }

    #[test]
    fn run_module_executes_entry_point() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let mut asm = Assembler::new();
        asm.op(Op::LoadInt8).u8(0).i8(7);
        asm.op(Op::Return).u8(0).u8(NO_REG);
        let module = ctx
            .heap
            .allocate(
                Movability::Movable,
                HeapObject::Mod(Module {
                    name: String::from("entry"),
                    bytecode: asm.finish(),
                    entry_offset: 0,
                    entry_num_regs: 1,
                    ..Module::default()
                }),
            )
            .unwrap();
        let result = ctx.run_module(module).unwrap();
        assert_eq!(result, Value::Int(7));
    }
}
