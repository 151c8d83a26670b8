// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! End-to-end scenarios: hand-assembled bytecode driven through [`Context`]
//! exactly as an embedder would, exercising objects, arrays, generators,
//! constructors, shared prototypes, and nested exception propagation
//! together rather than one opcode at a time.

use kos_vm::bytecode::{Assembler, Op};
use kos_vm::config::VmConfig;
use kos_vm::context::Context;
use kos_vm::heap::{HeapObject, Movability};
use kos_vm::value::kfunction::{ArgLayout, FunctionState, KFunction, NO_REG};
use kos_vm::value::kmodule::Module;
use kos_vm::value::{HeapId, Value};
use kos_vm::vm::exception;

fn module_with(ctx: &mut Context, code: Vec<u8>) -> HeapId {
    module_with_constants(ctx, code, Vec::new())
}

fn module_with_constants(ctx: &mut Context, code: Vec<u8>, constants: Vec<Value>) -> HeapId {
    let module = ctx
        .heap
        .allocate(
            Movability::Movable,
            HeapObject::Mod(Module {
                name: String::from("m"),
                bytecode: code,
                constants,
                ..Module::default()
            }),
        )
        .unwrap();
    let Value::Heap(id) = module else { unreachable!() };
    id
}

/// An empty module, for scenarios whose function offsets depend on lengths
/// only known once every function body has been assembled.
fn placeholder_module(ctx: &mut Context) -> HeapId {
    module_with(ctx, Vec::new())
}

fn finish_module(ctx: &mut Context, id: HeapId, code: Vec<u8>, constants: Vec<Value>) {
    if let HeapObject::Mod(m) = ctx.heap.get_mut(Value::Heap(id)).unwrap() {
        m.bytecode = code;
        m.constants = constants;
    }
}

fn function(ctx: &mut Context, module: HeapId, num_regs: u8, instr_offs: u32) -> Value {
    custom_function(ctx, module, num_regs, instr_offs, FunctionState::Regular, ArgLayout::default())
}

fn custom_function(
    ctx: &mut Context,
    module: HeapId,
    num_regs: u8,
    instr_offs: u32,
    state: FunctionState,
    layout: ArgLayout,
) -> Value {
    ctx.heap
        .allocate(
            Movability::Movable,
            HeapObject::Func(KFunction {
                state,
                is_class: false,
                num_regs,
                min_args: 0,
                num_def_args: 0,
                layout,
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

/// Patch a 4-byte little-endian `delta32` at `fixup` so it lands on `target`
/// (`Reader::read_jump_target`: relative to the byte after the field).
fn patch_delta(code: &mut [u8], fixup: u32, target: u32) {
    let delta = target as i64 - (fixup as i64 + 4);
    code[fixup as usize..fixup as usize + 4].copy_from_slice(&(delta as i32).to_le_bytes());
}

// S1: object property round-trip through SET/GET_PROP8.
#[test]
fn object_set_then_get_prop_round_trips() {
    let mut ctx = Context::new(VmConfig::default()).unwrap();
    let name = ctx.new_string("prop1").unwrap();

    let mut asm = Assembler::new();
    asm.op(Op::LoadObj).u8(0).u8(NO_REG);
    asm.op(Op::LoadConst8).u8(1).u8(0);
    asm.op(Op::LoadInt8).u8(2).i8(-6);
    asm.op(Op::Set).u8(0).u8(1).u8(2);
    asm.op(Op::GetProp8).u8(3).u8(0);
    asm.op(Op::Return).u8(3).u8(NO_REG);

    let module = module_with_constants(&mut ctx, asm.finish(), vec![name]);
    let f = function(&mut ctx, module, 4, 0);
    let result = ctx.call(f, Value::Bad, &[]).unwrap();
    assert_eq!(result, Value::Int(-6));
}

// S2: negative index addresses an array from its end.
#[test]
fn negative_index_addresses_array_from_the_end() {
    let mut ctx = Context::new(VmConfig::default()).unwrap();

    let mut asm = Assembler::new();
    asm.op(Op::LoadArray8).u8(0).i8(5);
    asm.op(Op::LoadInt8).u8(1).i8(10);
    asm.op(Op::LoadInt8).u8(2).i8(3);
    asm.op(Op::SetElem).u8(0).u8(2).u8(1);
    asm.op(Op::LoadInt8).u8(3).i8(-2);
    asm.op(Op::GetElem).u8(4).u8(0).u8(3);
    asm.op(Op::Return).u8(4).u8(NO_REG);

    let module = module_with(&mut ctx, asm.finish());
    let f = function(&mut ctx, module, 5, 0);
    let result = ctx.call(f, Value::Bad, &[]).unwrap();
    assert_eq!(result, Value::Int(10));
}

// S3: enumerate a generator to exhaustion, summing its yielded values.
#[test]
fn generator_enumeration_sums_yielded_values_then_exhausts() {
    let mut ctx = Context::new(VmConfig::default()).unwrap();
    let module_id = placeholder_module(&mut ctx);

    let mut outer_asm = Assembler::new();
    outer_asm.op(Op::LoadFun8).u8(0).u8(0);
    outer_asm.op(Op::LoadArray8).u8(1).i8(0);
    outer_asm.op(Op::Call).u8(2).u8(0).u8(1);
    outer_asm.op(Op::LoadIter).u8(3).u8(2);
    outer_asm.op(Op::Next).u8(4).u8(3);
    outer_asm.op(Op::Next).u8(5).u8(3);
    outer_asm.op(Op::Next).u8(6).u8(3);
    outer_asm.op(Op::Add).u8(7).u8(4).u8(5);
    outer_asm.op(Op::Add).u8(8).u8(7).u8(6);
    outer_asm.op(Op::NextJump).u8(9).u8(3);
    let exhaustion_fixup = outer_asm.here();
    outer_asm.i32(0);
    outer_asm.op(Op::LoadInt8).u8(10).i8(-1);
    outer_asm.op(Op::Return).u8(10).u8(NO_REG);
    let sum_return = outer_asm.here();
    outer_asm.op(Op::Return).u8(8).u8(NO_REG);
    let mut outer_code = outer_asm.finish();
    patch_delta(&mut outer_code, exhaustion_fixup, sum_return);
    let gen_offset = outer_code.len() as u32;

    let mut gen_asm = Assembler::new();
    gen_asm.op(Op::LoadInt8).u8(0).i8(3);
    gen_asm.op(Op::Yield).u8(0).u8(NO_REG);
    gen_asm.op(Op::LoadInt8).u8(0).i8(4);
    gen_asm.op(Op::Yield).u8(0).u8(NO_REG);
    gen_asm.op(Op::LoadInt8).u8(0).i8(5);
    gen_asm.op(Op::Yield).u8(0).u8(NO_REG);
    gen_asm.op(Op::LoadVoid).u8(0);
    gen_asm.op(Op::Return).u8(0).u8(NO_REG);
    let gen_code = gen_asm.finish();

    let mut full_code = outer_code;
    full_code.extend(gen_code);

    let gen_template = custom_function(
        &mut ctx,
        module_id,
        1,
        gen_offset,
        FunctionState::GeneratorInit,
        ArgLayout::default(),
    );
    finish_module(&mut ctx, module_id, full_code, vec![gen_template]);

    let outer = function(&mut ctx, module_id, 11, 0);
    let result = ctx.call(outer, Value::Bad, &[]).unwrap();
    assert_eq!(result, Value::Int(12));
}

// S4: a constructed instance's own property, written via `this`, survives
// past the `NEW` that created it.
#[test]
fn constructor_writes_are_visible_on_the_new_instance() {
    let mut ctx = Context::new(VmConfig::default()).unwrap();
    let module_id = placeholder_module(&mut ctx);

    let mut outer_asm = Assembler::new();
    outer_asm.op(Op::LoadClass8).u8(0).u8(0);
    outer_asm.op(Op::LoadArray8).u8(1).i8(0);
    outer_asm.op(Op::New).u8(2).u8(0).u8(1);
    outer_asm.op(Op::LoadConst8).u8(3).u8(1);
    outer_asm.op(Op::Get).u8(4).u8(2).u8(3);
    outer_asm.op(Op::Return).u8(4).u8(NO_REG);
    let outer_code = outer_asm.finish();
    let ctor_offset = outer_code.len() as u32;

    let mut ctor_asm = Assembler::new();
    ctor_asm.op(Op::LoadInt8).u8(1).i8(42);
    ctor_asm.op(Op::SetProp8).u8(1).u8(1);
    ctor_asm.op(Op::Return).u8(0).u8(NO_REG);
    let ctor_code = ctor_asm.finish();

    let mut full_code = outer_code;
    full_code.extend(ctor_code);

    let own_name = ctx.new_string("own").unwrap();
    let ctor_layout = ArgLayout {
        this_reg: 0,
        ..ArgLayout::default()
    };
    let ctor_template = custom_function(&mut ctx, module_id, 2, ctor_offset, FunctionState::Regular, ctor_layout);
    finish_module(&mut ctx, module_id, full_code, vec![ctor_template, own_name]);

    let outer = function(&mut ctx, module_id, 5, 0);
    let result = ctx.call(outer, Value::Bad, &[]).unwrap();
    assert_eq!(result, Value::Int(42));
}

// S7: two instances constructed from the same class share one prototype, so
// `INSTANCE_OF` holds in both directions between them.
#[test]
fn instances_of_the_same_class_share_one_prototype() {
    let mut ctx = Context::new(VmConfig::default()).unwrap();
    let module_id = placeholder_module(&mut ctx);
    let shared_proto = ctx.new_object(None).unwrap();

    let mut asm = Assembler::new();
    asm.op(Op::LoadClass8).u8(0).u8(0);
    asm.op(Op::LoadClass8).u8(1).u8(0);
    asm.op(Op::LoadArray8).u8(2).i8(0);
    asm.op(Op::New).u8(3).u8(0).u8(2);
    asm.op(Op::New).u8(4).u8(1).u8(2);
    asm.op(Op::GetProto).u8(5).u8(3);
    asm.op(Op::GetProto).u8(6).u8(4);
    asm.op(Op::InstanceOf).u8(7).u8(3).u8(5);
    asm.op(Op::InstanceOf).u8(8).u8(4).u8(6);
    asm.op(Op::InstanceOf).u8(9).u8(3).u8(6);
    asm.op(Op::InstanceOf).u8(10).u8(4).u8(5);
    asm.op(Op::LoadArray8).u8(11).i8(0);
    asm.op(Op::Push).u8(11).u8(7).u8(NO_REG);
    asm.op(Op::Push).u8(11).u8(8).u8(NO_REG);
    asm.op(Op::Push).u8(11).u8(9).u8(NO_REG);
    asm.op(Op::Push).u8(11).u8(10).u8(NO_REG);
    asm.op(Op::Return).u8(11).u8(NO_REG);
    let code = asm.finish();

    let ctor_layout = ArgLayout {
        this_reg: 0,
        ..ArgLayout::default()
    };
    let ctor_template = ctx
        .heap
        .allocate(
            Movability::Movable,
            HeapObject::Func(KFunction {
                state: FunctionState::Regular,
                is_class: false,
                num_regs: 1,
                min_args: 0,
                num_def_args: 0,
                layout: ctor_layout,
                instr_offs: code.len() as u32,
                module: module_id,
                name: String::from("A"),
                binds: Vec::new(),
                defaults: Vec::new(),
                arg_map: Vec::new(),
                native_handler: None,
                prototype: shared_proto,
                generator_stack_frame: None,
            }),
        )
        .unwrap();

    let mut full_code = code;
    full_code.push(Op::Return as u8);
    full_code.push(0);
    full_code.push(NO_REG);
    finish_module(&mut ctx, module_id, full_code, vec![ctor_template]);

    let outer = function(&mut ctx, module_id, 12, 0);
    let result = ctx.call(outer, Value::Bad, &[]).unwrap();
    match ctx.heap.get(result).unwrap() {
        HeapObject::Arr(a) => {
            assert_eq!(a.as_slice().to_vec(), vec![Value::Bool(true); 4]);
        }
        _ => panic!("expected array"),
    }
}

// S5: an armed CATCH redirects to its handler with the wrapped exception.
#[test]
fn catch_receives_the_wrapped_thrown_value() {
    let mut ctx = Context::new(VmConfig::default()).unwrap();

    let mut asm = Assembler::new();
    asm.op(Op::Catch).u8(0);
    let fixup = asm.here();
    asm.i32(0);
    asm.op(Op::LoadInt8).u8(1).i8(1);
    asm.op(Op::Throw).u8(1).u8(NO_REG);
    let handler = asm.here();
    asm.op(Op::Return).u8(0).u8(NO_REG);
    let mut code = asm.finish();
    patch_delta(&mut code, fixup, handler);

    let module = module_with(&mut ctx, code);
    let f = function(&mut ctx, module, 2, 0);
    let result = ctx.call(f, Value::Bad, &[]).unwrap();
    assert!(exception::is_wrapped(&ctx, result));
    assert_eq!(ctx.get_own_property(result, "value").unwrap(), Some(Value::Int(1)));
}

// S6: an exception thrown in the innermost of three real CALLs propagates
// through each level's own CATCH, each adding 1 to the value it reads off
// the (already-wrapped) exception before rethrowing or returning.
#[test]
fn nested_catches_across_three_calls_each_increment_the_caught_value() {
    let mut ctx = Context::new(VmConfig::default()).unwrap();
    let module_id = placeholder_module(&mut ctx);
    let value_name = ctx.new_string("value").unwrap();

    let mut outer_asm = Assembler::new();
    outer_asm.op(Op::Catch).u8(0);
    let outer_fixup = outer_asm.here();
    outer_asm.i32(0);
    outer_asm.op(Op::LoadConst8).u8(1).u8(1); // middle_func
    outer_asm.op(Op::LoadArray8).u8(2).i8(0);
    outer_asm.op(Op::Call).u8(3).u8(1).u8(2);
    let outer_handler = outer_asm.here();
    outer_asm.op(Op::GetProp8).u8(4).u8(0);
    outer_asm.op(Op::LoadInt8).u8(6).i8(1);
    outer_asm.op(Op::Add).u8(5).u8(4).u8(6);
    outer_asm.op(Op::Return).u8(5).u8(NO_REG);
    let mut outer_code = outer_asm.finish();
    patch_delta(&mut outer_code, outer_fixup, outer_handler);
    let middle_offset = outer_code.len() as u32;

    let mut middle_asm = Assembler::new();
    middle_asm.op(Op::Catch).u8(0);
    let middle_fixup = middle_asm.here();
    middle_asm.i32(0);
    middle_asm.op(Op::LoadConst8).u8(1).u8(2); // innermost_func
    middle_asm.op(Op::LoadArray8).u8(2).i8(0);
    middle_asm.op(Op::Call).u8(3).u8(1).u8(2);
    let middle_handler = middle_asm.here();
    middle_asm.op(Op::GetProp8).u8(4).u8(0);
    middle_asm.op(Op::LoadInt8).u8(6).i8(1);
    middle_asm.op(Op::Add).u8(5).u8(4).u8(6);
    middle_asm.op(Op::Throw).u8(5).u8(NO_REG);
    let mut middle_code = middle_asm.finish();
    patch_delta(&mut middle_code, middle_fixup, middle_handler);
    let inner_offset = middle_offset + middle_code.len() as u32;

    let mut inner_asm = Assembler::new();
    inner_asm.op(Op::LoadInt8).u8(0).i8(1);
    inner_asm.op(Op::Throw).u8(0).u8(NO_REG);
    let inner_code = inner_asm.finish();

    let mut full_code = outer_code;
    full_code.extend(middle_code);
    full_code.extend(inner_code);

    let middle_func = custom_function(&mut ctx, module_id, 7, middle_offset, FunctionState::Regular, ArgLayout::default());
    let inner_func = custom_function(&mut ctx, module_id, 1, inner_offset, FunctionState::Regular, ArgLayout::default());
    finish_module(&mut ctx, module_id, full_code, vec![value_name, middle_func, inner_func]);

    let outer = function(&mut ctx, module_id, 7, 0);
    let result = ctx.call(outer, Value::Bad, &[]).unwrap();
    assert_eq!(result, Value::Int(3));
}

// Universal invariant: stack overflow is reported as an exception, not a
// panic, however deep the recursion.
#[test]
fn deep_recursion_raises_stack_overflow_instead_of_panicking() {
    let mut config = VmConfig::default();
    config.max_stack_depth = 64;
    let mut ctx = Context::new(config).unwrap();
    let module_id = placeholder_module(&mut ctx);

    let mut asm = Assembler::new();
    asm.op(Op::LoadConst8).u8(1).u8(0);
    asm.op(Op::LoadArray8).u8(2).i8(0);
    asm.op(Op::Call).u8(0).u8(1).u8(2);
    asm.op(Op::Return).u8(0).u8(NO_REG);
    let code = asm.finish();

    let recurse = custom_function(&mut ctx, module_id, 3, 0, FunctionState::Regular, ArgLayout::default());
    finish_module(&mut ctx, module_id, code, vec![recurse]);

    let err = ctx.call(recurse, Value::Bad, &[]).unwrap_err();
    assert!(exception::is_wrapped(&ctx, err));
}
