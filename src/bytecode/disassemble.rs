// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Textual disassembly of a module's bytecode, for debugging and tests.
//! Not part of the VM's execution path.

use alloc::format;
use alloc::string::String;

use super::{Op, Reader};

/// Disassemble `code` into one line per instruction: offset, mnemonic, and
/// raw operand bytes (operand *names* depend on register/constant context
/// this function doesn't have, so it prints values rather than resolving
/// them).
#[must_use]
pub fn disassemble(code: &[u8]) -> String {
    let mut out = String::new();
    let mut r = Reader::new(code, 0);
    while !r.at_end() {
        let offset = r.ip;
        let Ok(op) = r.read_op() else {
            out.push_str(&format!("{offset:>6}: <invalid opcode>\n"));
            break;
        };
        let operands = match operand_layout(op) {
            Layout::None => String::new(),
            Layout::U8 => format!(" {}", r.read_u8().unwrap_or(0)),
            Layout::U8x2 => format!(" {} {}", r.read_u8().unwrap_or(0), r.read_u8().unwrap_or(0)),
            Layout::U8x3 => format!(
                " {} {} {}",
                r.read_u8().unwrap_or(0),
                r.read_u8().unwrap_or(0),
                r.read_u8().unwrap_or(0)
            ),
            Layout::U8Delta32 => format!(
                " {} {}",
                r.read_u8().unwrap_or(0),
                r.read_jump_target().unwrap_or(0)
            ),
            Layout::U8x2Delta32 => format!(
                " {} {} {}",
                r.read_u8().unwrap_or(0),
                r.read_u8().unwrap_or(0),
                r.read_jump_target().unwrap_or(0)
            ),
            Layout::Delta32 => format!("{}", r.read_jump_target().unwrap_or(0)),
            Layout::U8Int8 => format!(" {} {}", r.read_u8().unwrap_or(0), r.read_i8().unwrap_or(0)),
            Layout::U8Int32 => format!(" {} {}", r.read_u8().unwrap_or(0), r.read_i32().unwrap_or(0)),
            Layout::U8Int64 => format!(" {} {}", r.read_u8().unwrap_or(0), r.read_i64().unwrap_or(0)),
            Layout::U8Float => format!(" {} {}", r.read_u8().unwrap_or(0), r.read_f64().unwrap_or(0.0)),
            Layout::U8ConstIdx8 => format!(" {} c{}", r.read_u8().unwrap_or(0), r.read_u8().unwrap_or(0)),
            Layout::U8ConstIdx32 => format!(" {} c{}", r.read_u8().unwrap_or(0), r.read_u32().unwrap_or(0)),
        };
        out.push_str(&format!("{offset:>6}: {op:?}{operands}\n"));
    }
    out
}

pub(crate) enum Layout {
    None,
    U8,
    U8x2,
    U8x3,
    U8Delta32,
    U8x2Delta32,
    Delta32,
    U8Int8,
    U8Int32,
    U8Int64,
    U8Float,
    U8ConstIdx8,
    U8ConstIdx32,
}

pub(crate) fn operand_layout(op: Op) -> Layout {
    match op {
        Op::LoadTrue | Op::LoadFalse | Op::LoadVoid => Layout::U8,
        Op::LoadInt8 => Layout::U8Int8,
        Op::LoadInt32 => Layout::U8Int32,
        Op::LoadInt64 => Layout::U8Int64,
        Op::LoadFloat => Layout::U8Float,
        Op::LoadConst8 | Op::LoadFun8 | Op::LoadClass8 => Layout::U8ConstIdx8,
        Op::LoadConst32 | Op::LoadFun32 | Op::LoadClass32 => Layout::U8ConstIdx32,
        Op::LoadArray8 => Layout::U8Int8,
        Op::LoadArray32 => Layout::U8Int32,
        Op::LoadObj | Op::LoadIter | Op::Not | Op::BitNot | Op::GetProto | Op::Type => Layout::U8x2,
        Op::Move => Layout::U8x2,
        Op::GetGlobal | Op::SetGlobal => Layout::U8Int32,
        Op::GetModElem => Layout::U8x3,
        Op::GetMod => Layout::U8ConstIdx8,
        Op::Get
        | Op::GetElem
        | Op::Set
        | Op::SetElem
        | Op::Has
        | Op::Del
        | Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Mod
        | Op::BitAnd
        | Op::BitOr
        | Op::BitXor
        | Op::Shl
        | Op::Shr
        | Op::Ssr
        | Op::CmpEq
        | Op::CmpNe
        | Op::CmpLt
        | Op::CmpLe
        | Op::CmpGt
        | Op::CmpGe
        | Op::Push
        | Op::PushEx
        | Op::InstanceOf
        | Op::BindSelf => Layout::U8x3,
        Op::Next => Layout::U8x2,
        Op::GetProp8 | Op::SetProp8 | Op::HasShProp8 | Op::HasDpProp8 | Op::DelProp8 => Layout::U8ConstIdx8,
        Op::GetRange => Layout::U8x3,
        Op::Jump => Layout::Delta32,
        Op::JumpCond | Op::JumpNotCond => Layout::U8Delta32,
        Op::Call | Op::CallN | Op::CallFun | Op::TailCall | Op::TailCallN | Op::TailCallFun | Op::New | Op::CallGen => {
            Layout::U8x3
        }
        Op::Bind | Op::BindDefaults => Layout::U8x2,
        Op::Catch => Layout::U8Delta32,
        Op::Cancel => Layout::None,
        Op::Throw | Op::Return | Op::Yield => Layout::U8x2,
        Op::NextJump => Layout::U8x2Delta32,
    }
}
