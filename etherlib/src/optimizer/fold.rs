//! Compile-time evaluation with the run-time semantics of each type:
//! wrapping 32/64-bit integers, masked shift counts, IEEE floats.

use crate::ast::{BinaryOp, CmpOp, UnaryOp, Value};
use crate::types::Type;

pub fn unary(op: UnaryOp, v: &Value) -> Option<Value> {
    Some(match (op, v) {
        (UnaryOp::Neg, Value::Int(x)) => Value::Int(x.wrapping_neg()),
        (UnaryOp::Neg, Value::Long(x)) => Value::Long(x.wrapping_neg()),
        (UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
        (UnaryOp::Neg, Value::Double(x)) => Value::Double(-x),
        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
        (UnaryOp::BitNot, Value::Int(x)) => Value::Int(!x),
        (UnaryOp::BitNot, Value::Long(x)) => Value::Long(!x),
        _ => return None,
    })
}

/// `None` when the operation must be left to run time, notably integer
/// division or remainder by zero.
pub fn binary(op: BinaryOp, l: &Value, r: &Value) -> Option<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => int_binary(op, *a, *b).map(Value::Int),
        (Value::Long(a), Value::Long(b)) => long_binary(op, *a, *b).map(Value::Long),
        (Value::Long(a), Value::Int(b)) if is_shift(op) => {
            long_binary(op, *a, i64::from(*b)).map(Value::Long)
        }
        (Value::Float(a), Value::Float(b)) => float_binary(op, f64::from(*a), f64::from(*b))
            .map(|v| Value::Float(v as f32)),
        (Value::Double(a), Value::Double(b)) => float_binary(op, *a, *b).map(Value::Double),
        (Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(match op {
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
            _ => return None,
        })),
        _ => None,
    }
}

fn is_shift(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr)
}

fn int_binary(op: BinaryOp, a: i32, b: i32) -> Option<i32> {
    Some(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return None,
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Mod if b == 0 => return None,
        BinaryOp::Mod => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b as u32 & 31),
        BinaryOp::Shr => a.wrapping_shr(b as u32 & 31),
        BinaryOp::Ushr => ((a as u32) >> (b as u32 & 31)) as i32,
    })
}

fn long_binary(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return None,
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Mod if b == 0 => return None,
        BinaryOp::Mod => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b as u32 & 63),
        BinaryOp::Shr => a.wrapping_shr(b as u32 & 63),
        BinaryOp::Ushr => ((a as u64) >> (b as u32 & 63)) as i64,
    })
}

/// Float operands are widened to f64 and the caller narrows the result;
/// for `+ - * / %` this gives the same value as computing in f32.
fn float_binary(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    Some(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return None,
    })
}

pub fn compare(op: CmpOp, l: &Value, r: &Value) -> Option<bool> {
    let ord = match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Long(a), Value::Long(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
        (Value::Null, Value::Null) => Some(core::cmp::Ordering::Equal),
        // A literal string or function is never null.
        (Value::Null, Value::Str(_) | Value::Func(_)) | (Value::Str(_) | Value::Func(_), Value::Null) => {
            return match op {
                CmpOp::Eq => Some(false),
                CmpOp::Ne => Some(true),
                _ => None,
            };
        }
        _ => return None,
    };
    // NaN compares unequal to everything.
    let Some(ord) = ord else {
        return Some(op == CmpOp::Ne);
    };
    Some(match op {
        CmpOp::Eq => ord.is_eq(),
        CmpOp::Ne => ord.is_ne(),
        CmpOp::Lt => ord.is_lt(),
        CmpOp::Le => ord.is_le(),
        CmpOp::Gt => ord.is_gt(),
        CmpOp::Ge => ord.is_ge(),
    })
}

/// Numeric conversion between primitive types, and the identity on
/// reference upcasts. Boxing a primitive is left to run time.
pub fn cast(v: &Value, from: &Type, to: &Type) -> Option<Value> {
    if from.is_numeric() && to.is_numeric() {
        return numeric_cast(v, to);
    }
    if from.is_reference() && to.is_reference() && (from.is_subtype_of(to) || *v == Value::Null) {
        return Some(v.clone());
    }
    None
}

fn numeric_cast(v: &Value, to: &Type) -> Option<Value> {
    let out = match (v, to) {
        (Value::Int(x), Type::Byte) => Value::Int(i32::from(*x as i8)),
        (Value::Int(x), Type::Short) => Value::Int(i32::from(*x as i16)),
        (Value::Int(x), Type::Char) => Value::Int(i32::from(*x as u16)),
        (Value::Int(x), Type::Int) => Value::Int(*x),
        (Value::Int(x), Type::Long) => Value::Long(i64::from(*x)),
        (Value::Int(x), Type::Float) => Value::Float(*x as f32),
        (Value::Int(x), Type::Double) => Value::Double(f64::from(*x)),
        (Value::Long(x), Type::Long) => Value::Long(*x),
        (Value::Long(x), Type::Float) => Value::Float(*x as f32),
        (Value::Long(x), Type::Double) => Value::Double(*x as f64),
        (Value::Long(x), t) => return numeric_cast(&Value::Int(*x as i32), t),
        (Value::Float(x), Type::Float) => Value::Float(*x),
        (Value::Float(x), Type::Double) => Value::Double(f64::from(*x)),
        (Value::Float(x), Type::Long) => Value::Long(*x as i64),
        (Value::Float(x), t) => return numeric_cast(&Value::Int(*x as i32), t),
        (Value::Double(x), Type::Double) => Value::Double(*x),
        (Value::Double(x), Type::Float) => Value::Float(*x as f32),
        (Value::Double(x), Type::Long) => Value::Long(*x as i64),
        (Value::Double(x), t) => return numeric_cast(&Value::Int(*x as i32), t),
        _ => return None,
    };
    Some(out)
}

/// Text `tostr()` produces for a constant of type `ty`.
pub fn display(v: &Value, ty: &Type) -> Option<String> {
    Some(match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(x) if *ty == Type::Char => char::from_u32(*x as u32)?.to_string(),
        Value::Int(x) => x.to_string(),
        Value::Long(x) => x.to_string(),
        Value::Float(x) => format_real(f64::from(*x), x.to_string(), format!("{x:E}")),
        Value::Double(x) => format_real(*x, x.to_string(), format!("{x:E}")),
        Value::Str(s) => s.to_string(),
        Value::Func(_) => return None,
    })
}

/// `1.0`, `0.5`, `1.0E10`, `NaN`, `-Infinity`.
fn format_real(x: f64, shortest: String, sci: String) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let abs = x.abs();
    if abs == 0.0 || (1e-3..1e7).contains(&abs) {
        if shortest.contains('.') {
            return shortest;
        }
        return format!("{shortest}.0");
    }
    match sci.split_once('E') {
        Some((mantissa, exp)) if !mantissa.contains('.') => format!("{mantissa}.0E{exp}"),
        _ => sci,
    }
}
