// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Arithmetic and bitwise dispatch matrix (`spec.md` §4.3 "Arithmetic &
//! bitwise"; §9: "Dispatch by runtime type via a small matrix indexed by
//! the two operand type tags; avoids deep conditional trees").

use alloc::format;
use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::heap::HeapObject;
use crate::value::Value;

/// Which binary operator is being evaluated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Ssr,
}

fn is_string(ctx: &Context, v: Value) -> bool {
    matches!(ctx.heap.get(v), Ok(HeapObject::Str(_)))
}

pub(crate) fn is_float(v: Value) -> bool {
    matches!(v, Value::Float(_))
}

pub(crate) fn is_numeric(ctx: &Context, v: Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_)) || matches!(ctx.heap.get(v), Ok(HeapObject::BigInt(_)))
}

pub(crate) fn as_bigint(ctx: &Context, v: Value) -> Option<BigInt> {
    match v {
        Value::Int(n) => Some(BigInt::from(n)),
        _ => match ctx.heap.get(v).ok()? {
            HeapObject::BigInt(b) => Some(b.clone()),
            _ => None,
        },
    }
}

pub(crate) fn as_f64(ctx: &Context, v: Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(n as f64),
        Value::Float(f) => Some(f),
        _ => match ctx.heap.get(v).ok()? {
            HeapObject::BigInt(b) => b.to_f64(),
            _ => None,
        },
    }
}

/// Saturate a possibly-huge integer to an `i64` shift/mask operand; shift
/// counts and bitwise masks are always evaluated at machine-word width even
/// when one operand has been promoted to a heap integer.
fn as_i64_saturating(ctx: &Context, v: Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(n),
        _ => match ctx.heap.get(v).ok()? {
            HeapObject::BigInt(b) => Some(b.to_i64().unwrap_or(match b.sign() {
                Sign::Minus => i64::MIN,
                _ => i64::MAX,
            })),
            _ => None,
        },
    }
}

fn normalize(ctx: &mut Context, n: BigInt) -> Result<Value> {
    match n.to_i64() {
        Some(small) => Ok(Value::Int(small)),
        None => ctx.heap.allocate_bigint(n),
    }
}

fn shl(a: i64, n: i64) -> i64 {
    if n >= 64 {
        0
    } else if n <= -64 {
        if a < 0 { -1 } else { 0 }
    } else if n >= 0 {
        a.wrapping_shl(n as u32)
    } else {
        shr_arith(a, -n)
    }
}

fn shr_arith(a: i64, n: i64) -> i64 {
    if n >= 64 {
        if a < 0 { -1 } else { 0 }
    } else if n <= -64 {
        0
    } else if n >= 0 {
        a.wrapping_shr(n as u32)
    } else {
        shl(a, -n)
    }
}

fn shr_logical(a: i64, n: i64) -> i64 {
    if n >= 64 {
        0
    } else if n <= -64 {
        if a < 0 { -1 } else { 0 }
    } else if n >= 0 {
        (a as u64).wrapping_shr(n as u32) as i64
    } else {
        shl(a, -n)
    }
}

/// `spec.md` §4.3: evaluate `lhs <op> rhs`.
pub fn binary(ctx: &mut Context, op: ArithOp, lhs: Value, rhs: Value) -> Result<Value> {
    if op == ArithOp::Add && is_string(ctx, lhs) && is_string(ctx, rhs) {
        let a = ctx.string_value(lhs)?;
        let b = ctx.string_value(rhs)?;
        return ctx.new_string(&format!("{a}{b}"));
    }

    if !is_numeric(ctx, lhs) || !is_numeric(ctx, rhs) {
        return Err(Error::UnsupportedOperandTypes);
    }

    match op {
        ArithOp::Add | ArithOp::Sub | ArithOp::Mul => {
            if is_float(lhs) || is_float(rhs) {
                let a = as_f64(ctx, lhs).ok_or(Error::UnsupportedOperandTypes)?;
                let b = as_f64(ctx, rhs).ok_or(Error::UnsupportedOperandTypes)?;
                Ok(Value::Float(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    _ => a * b,
                }))
            } else if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
                let checked = match op {
                    ArithOp::Add => a.checked_add(b),
                    ArithOp::Sub => a.checked_sub(b),
                    _ => a.checked_mul(b),
                };
                match checked {
                    Some(v) => Ok(Value::Int(v)),
                    None => normalize(ctx, apply_bigint(op, BigInt::from(a), BigInt::from(b))),
                }
            } else {
                let a = as_bigint(ctx, lhs).ok_or(Error::UnsupportedOperandTypes)?;
                let b = as_bigint(ctx, rhs).ok_or(Error::UnsupportedOperandTypes)?;
                normalize(ctx, apply_bigint(op, a, b))
            }
        }
        ArithOp::Div | ArithOp::Mod => {
            if is_float(lhs) || is_float(rhs) {
                let a = as_f64(ctx, lhs).ok_or(Error::UnsupportedOperandTypes)?;
                let b = as_f64(ctx, rhs).ok_or(Error::UnsupportedOperandTypes)?;
                if b == 0.0 {
                    return Err(Error::DivideByZero);
                }
                Ok(Value::Float(if op == ArithOp::Div { a / b } else { a % b }))
            } else {
                let a = as_bigint(ctx, lhs).ok_or(Error::UnsupportedOperandTypes)?;
                let b = as_bigint(ctx, rhs).ok_or(Error::UnsupportedOperandTypes)?;
                if b.is_zero() {
                    return Err(Error::DivideByZero);
                }
                let r = if op == ArithOp::Div { &a / &b } else { &a % &b };
                normalize(ctx, r)
            }
        }
        ArithOp::BitAnd | ArithOp::BitOr | ArithOp::BitXor => {
            if is_float(lhs) || is_float(rhs) {
                return Err(Error::UnsupportedOperandTypes);
            }
            let a = as_i64_saturating(ctx, lhs).ok_or(Error::UnsupportedOperandTypes)?;
            let b = as_i64_saturating(ctx, rhs).ok_or(Error::UnsupportedOperandTypes)?;
            Ok(Value::Int(match op {
                ArithOp::BitAnd => a & b,
                ArithOp::BitOr => a | b,
                _ => a ^ b,
            }))
        }
        ArithOp::Shl | ArithOp::Shr | ArithOp::Ssr => {
            if is_float(lhs) || is_float(rhs) {
                return Err(Error::UnsupportedOperandTypes);
            }
            let a = as_i64_saturating(ctx, lhs).ok_or(Error::UnsupportedOperandTypes)?;
            let n = as_i64_saturating(ctx, rhs).ok_or(Error::UnsupportedOperandTypes)?;
            Ok(Value::Int(match op {
                ArithOp::Shl => shl(a, n),
                ArithOp::Shr => shr_arith(a, n),
                _ => shr_logical(a, n),
            }))
        }
    }
}

fn apply_bigint(op: ArithOp, a: BigInt, b: BigInt) -> BigInt {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        _ => unreachable!("apply_bigint only handles add/sub/mul"),
    }
}

/// `NOT`/`BIT_NOT` unary operators.
pub fn bit_not(ctx: &Context, v: Value) -> Result<Value> {
    let a = as_i64_saturating(ctx, v).ok_or(Error::UnsupportedOperandTypes)?;
    Ok(Value::Int(!a))
}

#[cfg(test)]
mod arithmetic_test {
    use super::*;
    use crate::config::VmConfig;

    #[test]
    fn small_int_addition_stays_small() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let r = binary(&mut ctx, ArithOp::Add, Value::Int(2), Value::Int(3)).unwrap();
        assert_eq!(r, Value::Int(5));
    }

    #[test]
    fn overflowing_multiply_promotes_to_heap_integer() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let r = binary(&mut ctx, ArithOp::Mul, Value::Int(i64::MAX), Value::Int(2)).unwrap();
        assert!(matches!(r, Value::Heap(_)));
        assert_eq!(ctx.type_of(r).unwrap(), crate::value::ObjectType::Integer);
    }

    #[test]
    fn int_plus_float_promotes_to_float() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let r = binary(&mut ctx, ArithOp::Add, Value::Int(2), Value::Float(0.5)).unwrap();
        assert_eq!(r, Value::Float(2.5));
    }

    #[test]
    fn division_by_zero_raises() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        assert_eq!(
            binary(&mut ctx, ArithOp::Div, Value::Int(1), Value::Int(0)).unwrap_err(),
            Error::DivideByZero
        );
    }

    #[test]
    fn shift_saturates_past_64() {
        assert_eq!(shl(1, 64), 0);
        assert_eq!(shr_arith(-1, 100), -1);
        assert_eq!(shr_logical(-1, 100), 0);
    }

    #[test]
    fn negative_shift_count_inverts_direction() {
        assert_eq!(shl(4, -1), shr_arith(4, 1));
    }

    #[test]
    fn string_concatenation() {
        let mut ctx = Context::new(VmConfig::default()).unwrap();
        let a = ctx.new_string("foo").unwrap();
        let b = ctx.new_string("bar").unwrap();
        let r = binary(&mut ctx, ArithOp::Add, a, b).unwrap();
        assert_eq!(ctx.string_value(r).unwrap(), "foobar");
    }
}
