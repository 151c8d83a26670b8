// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Equality and ordering (`spec.md` §4.3 "Comparisons"): same-kind operands
//! (both numeric, both string, both void) compare by value; everything else
//! compares cross-kind, where equality falls back to reference identity and
//! ordering falls back to the operands' type tags.

use core::cmp::Ordering;

use crate::context::Context;
use crate::error::Result;
use crate::value::{ObjectType, Value};

use super::arithmetic::{as_bigint, as_f64, is_float, is_numeric};

/// Which comparison is being evaluated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn same_kind(ctx: &Context, lhs: Value, rhs: Value) -> Result<Option<Kind>> {
    if is_numeric(ctx, lhs) && is_numeric(ctx, rhs) {
        return Ok(Some(Kind::Numeric));
    }
    let lt = ctx.type_of(lhs)?;
    let rt = ctx.type_of(rhs)?;
    if lt == ObjectType::String && rt == ObjectType::String {
        return Ok(Some(Kind::String));
    }
    if lt == ObjectType::Void && rt == ObjectType::Void {
        return Ok(Some(Kind::Void));
    }
    Ok(None)
}

enum Kind {
    Numeric,
    String,
    Void,
}

fn numeric_order(ctx: &Context, lhs: Value, rhs: Value) -> Option<Ordering> {
    if is_float(lhs) || is_float(rhs) {
        let a = as_f64(ctx, lhs)?;
        let b = as_f64(ctx, rhs)?;
        a.partial_cmp(&b)
    } else {
        let a = as_bigint(ctx, lhs)?;
        let b = as_bigint(ctx, rhs)?;
        Some(a.cmp(&b))
    }
}

fn apply(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

/// `spec.md` §4.3: evaluate `lhs <op> rhs`, returning a [`Value::Bool`].
pub fn compare(ctx: &mut Context, op: CmpOp, lhs: Value, rhs: Value) -> Result<Value> {
    let ord = match same_kind(ctx, lhs, rhs)? {
        Some(Kind::Numeric) => numeric_order(ctx, lhs, rhs).unwrap_or(Ordering::Equal),
        Some(Kind::String) => {
            let a = ctx.string_value(lhs)?;
            let b = ctx.string_value(rhs)?;
            a.cmp(&b)
        }
        Some(Kind::Void) => Ordering::Equal,
        None => {
            // Cross-kind: equality is reference identity, ordering falls
            // back to comparing the runtime type tags.
            if matches!(op, CmpOp::Eq | CmpOp::Ne) {
                return Ok(Value::Bool(apply(op, if lhs == rhs { Ordering::Equal } else { Ordering::Less })));
            }
            let lt = ctx.type_of(lhs)? as u8;
            let rt = ctx.type_of(rhs)? as u8;
            lt.cmp(&rt)
        }
    };
    Ok(Value::Bool(apply(op, ord)))
}
