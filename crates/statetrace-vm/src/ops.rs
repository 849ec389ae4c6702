//! Operators and numeric conversions on values.

use statetrace_core::PrimitiveKind;
use statetrace_core::ir::{BinaryOp, UnaryOp};

use crate::error::{Result, RuntimeError};
use crate::value::Value;

/// Wrap `value` into the range of an integral `kind`, two's complement.
pub fn wrap_int(value: i128, kind: PrimitiveKind) -> i128 {
    let bits = kind.size() * 8;
    if bits >= 128 {
        return value;
    }
    let modulus = 1i128 << bits;
    let low = value.rem_euclid(modulus);
    if kind.is_signed_integer() && low >= modulus / 2 {
        low - modulus
    } else {
        low
    }
}

/// Round to the precision of a floating `kind`.
fn round_float(value: f64, kind: PrimitiveKind) -> f64 {
    match kind {
        PrimitiveKind::Float => value as f32 as f64,
        _ => value,
    }
}

/// The zero value of a primitive kind.
pub fn zero(kind: PrimitiveKind) -> Value {
    match kind {
        PrimitiveKind::Bool => Value::Bool(false),
        PrimitiveKind::Float | PrimitiveKind::Double => Value::Float { value: 0.0, kind },
        PrimitiveKind::Decimal => Value::Decimal {
            mantissa: 0,
            scale: 0,
        },
        _ => Value::Int { value: 0, kind },
    }
}

pub fn unary(op: UnaryOp, operand: Value) -> Result<Value> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Int { value, kind }) => Ok(Value::Int {
            value: wrap_int(value.wrapping_neg(), kind),
            kind,
        }),
        (UnaryOp::Neg, Value::Float { value, kind }) => Ok(Value::Float { value: -value, kind }),
        (UnaryOp::Neg, Value::Decimal { mantissa, scale }) => Ok(Value::Decimal {
            mantissa: -mantissa,
            scale,
        }),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::BitNot, Value::Int { value, kind }) => Ok(Value::Int {
            value: wrap_int(!value, kind),
            kind,
        }),
        (op, other) => Err(RuntimeError::mismatch(operand_name(op), other)),
    }
}

fn operand_name(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "number",
        UnaryOp::Not => "bool",
        UnaryOp::BitNot => "integer",
    }
}

pub fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int { value: a, kind }, Value::Int { value: b, .. }) => int_binary(op, a, b, kind),
        (Value::Float { value: a, kind }, Value::Float { value: b, .. }) => {
            float_binary(op, a, b, kind)
        }
        (Value::Int { value: a, .. }, Value::Float { value: b, kind }) => {
            float_binary(op, a as f64, b, kind)
        }
        (Value::Float { value: a, kind }, Value::Int { value: b, .. }) => {
            float_binary(op, a, b as f64, kind)
        }
        (
            Value::Decimal {
                mantissa: a,
                scale: sa,
            },
            Value::Decimal {
                mantissa: b,
                scale: sb,
            },
        ) => decimal_binary(op, (a, sa), (b, sb)),
        (Value::Bool(a), Value::Bool(b)) => match op {
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            BinaryOp::And | BinaryOp::BitAnd => Ok(Value::Bool(a && b)),
            BinaryOp::Or | BinaryOp::BitOr => Ok(Value::Bool(a || b)),
            BinaryOp::BitXor => Ok(Value::Bool(a ^ b)),
            _ => Err(RuntimeError::mismatch("number", Value::Bool(a))),
        },
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::Str(a + &b)),
        (lhs, rhs) => match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
            _ => Err(RuntimeError::mismatch("operands of matching kind", (lhs, rhs))),
        },
    }
}

fn int_binary(op: BinaryOp, a: i128, b: i128, kind: PrimitiveKind) -> Result<Value> {
    let int = |value: i128| Value::Int {
        value: wrap_int(value, kind),
        kind,
    };
    Ok(match op {
        BinaryOp::Add => int(a.wrapping_add(b)),
        BinaryOp::Sub => int(a.wrapping_sub(b)),
        BinaryOp::Mul => int(a.wrapping_mul(b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(RuntimeError::DivisionByZero),
        BinaryOp::Div => int(a.wrapping_div(b)),
        BinaryOp::Rem => int(a.wrapping_rem(b)),
        BinaryOp::BitAnd | BinaryOp::And => int(a & b),
        BinaryOp::BitOr | BinaryOp::Or => int(a | b),
        BinaryOp::BitXor => int(a ^ b),
        BinaryOp::Eq => Value::Bool(a == b),
        BinaryOp::Ne => Value::Bool(a != b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
    })
}

fn float_binary(op: BinaryOp, a: f64, b: f64, kind: PrimitiveKind) -> Result<Value> {
    let float = |value: f64| Value::Float {
        value: round_float(value, kind),
        kind,
    };
    Ok(match op {
        BinaryOp::Add => float(a + b),
        BinaryOp::Sub => float(a - b),
        BinaryOp::Mul => float(a * b),
        BinaryOp::Div => float(a / b),
        BinaryOp::Rem => float(a % b),
        BinaryOp::Eq => Value::Bool(a == b),
        BinaryOp::Ne => Value::Bool(a != b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        _ => return Err(RuntimeError::mismatch("arithmetic or comparison", op)),
    })
}

fn decimal_binary(op: BinaryOp, (a, sa): (i128, u8), (b, sb): (i128, u8)) -> Result<Value> {
    if op == BinaryOp::Mul {
        return Ok(Value::Decimal {
            mantissa: a.wrapping_mul(b),
            scale: sa.saturating_add(sb),
        });
    }
    let scale = sa.max(sb);
    let a = a.wrapping_mul(10i128.pow((scale - sa) as u32));
    let b = b.wrapping_mul(10i128.pow((scale - sb) as u32));
    Ok(match op {
        BinaryOp::Add => Value::Decimal {
            mantissa: a.wrapping_add(b),
            scale,
        },
        BinaryOp::Sub => Value::Decimal {
            mantissa: a.wrapping_sub(b),
            scale,
        },
        BinaryOp::Eq => Value::Bool(a == b),
        BinaryOp::Ne => Value::Bool(a != b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        _ => return Err(RuntimeError::mismatch("decimal add, sub, mul or compare", op)),
    })
}

/// Value conversion to a primitive `kind`; integers wrap.
pub fn numeric(value: Value, kind: PrimitiveKind) -> Result<Value> {
    let out = match value {
        Value::Int { value, .. } if kind.is_integer() => Value::Int {
            value: wrap_int(value, kind),
            kind,
        },
        Value::Int { value, .. } if kind.is_float() => Value::Float {
            value: round_float(value as f64, kind),
            kind,
        },
        Value::Int { value, .. } if kind == PrimitiveKind::Decimal => Value::Decimal {
            mantissa: value,
            scale: 0,
        },
        Value::Float { value, .. } if kind.is_integer() => Value::Int {
            value: wrap_int(value.trunc() as i128, kind),
            kind,
        },
        Value::Float { value, .. } if kind.is_float() => Value::Float {
            value: round_float(value, kind),
            kind,
        },
        Value::Bool(b) if kind == PrimitiveKind::Bool => Value::Bool(b),
        other => return Err(RuntimeError::mismatch("numeric value", other)),
    };
    Ok(out)
}

/// Same-width reinterpretation of the bit pattern as `kind`.
pub fn reinterpret(value: Value, kind: PrimitiveKind) -> Result<Value> {
    let bits = match value {
        Value::Int { value, .. } => value,
        Value::Bool(b) => b as i128,
        Value::Float {
            value,
            kind: PrimitiveKind::Float,
        } => (value as f32).to_bits() as i128,
        Value::Float { value, .. } => value.to_bits() as i128,
        other => return Err(RuntimeError::mismatch("primitive value", other)),
    };
    match kind {
        PrimitiveKind::Bool => Ok(Value::Bool(bits & 0xff != 0)),
        PrimitiveKind::Float => Ok(Value::Float {
            value: f32::from_bits(bits as u32) as f64,
            kind,
        }),
        PrimitiveKind::Double => Ok(Value::Float {
            value: f64::from_bits(bits as u64),
            kind,
        }),
        kind if kind.is_integer() => Ok(Value::Int {
            value: wrap_int(bits, kind),
            kind,
        }),
        _ => Err(RuntimeError::mismatch("integral or floating kind", kind)),
    }
}
