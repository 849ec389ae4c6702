//! Runtime values and storage locations.

use statetrace_core::ir::Constant;
use statetrace_core::{FieldId, LocalId, MethodId, ParamId, PrimitiveKind, TypeHash};

use crate::error::{Result, RuntimeError};
use crate::heap::ObjectHandle;

/// A value held in a slot, field or array element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of a void expression, and the content of unbound ref slots.
    Void,
    Bool(bool),
    /// Integer of an integral kind (including `char`), kept in the kind's range.
    Int {
        value: i128,
        kind: PrimitiveKind,
    },
    /// `float` values are stored widened but rounded to single precision.
    Float {
        value: f64,
        kind: PrimitiveKind,
    },
    Decimal {
        mantissa: i128,
        scale: u8,
    },
    Str(String),
    Null,
    Object(ObjectHandle),
    Struct(StructValue),
    /// Unmanaged address of a location.
    Pointer(Location),
    /// Managed reference held by a ref local, ref parameter or by-ref receiver.
    Ref(Location),
    MethodPtr {
        method: MethodId,
        receiver: Option<Box<Value>>,
    },
    /// A tracker handle: the activation number it was created for.
    Tracker(u64),
}

/// An unboxed value-type instance. Fields are in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub ty: TypeHash,
    pub fields: Vec<Value>,
}

impl Value {
    pub fn i32(value: i32) -> Self {
        Value::Int {
            value: value as i128,
            kind: PrimitiveKind::Int32,
        }
    }

    pub fn u32(value: u32) -> Self {
        Value::Int {
            value: value as i128,
            kind: PrimitiveKind::Uint32,
        }
    }

    pub fn u64(value: u64) -> Self {
        Value::Int {
            value: value as i128,
            kind: PrimitiveKind::Uint64,
        }
    }

    pub fn int_of(value: i128, kind: PrimitiveKind) -> Self {
        Value::Int { value, kind }
    }

    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(RuntimeError::mismatch("bool", other)),
        }
    }

    pub fn as_int(&self) -> Result<i128> {
        match self {
            Value::Int { value, .. } => Ok(*value),
            other => Err(RuntimeError::mismatch("integer", other)),
        }
    }

    /// Integer argument truncated to 32 bits, as tracker ids and indices are.
    pub fn as_u32(&self) -> Result<u32> {
        self.as_int().map(|v| v as u32)
    }

    pub fn as_u64(&self) -> Result<u64> {
        self.as_int().map(|v| v as u64)
    }

    pub fn as_object(&self) -> Result<ObjectHandle> {
        match self {
            Value::Object(handle) => Ok(*handle),
            Value::Null => Err(RuntimeError::NullReference),
            other => Err(RuntimeError::mismatch("object", other)),
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int { value, kind } => Value::Int {
                value: *value,
                kind: *kind,
            },
            Constant::Float { value, kind } => Value::Float {
                value: value.0,
                kind: *kind,
            },
            Constant::Decimal { mantissa, scale } => Value::Decimal {
                mantissa: *mantissa,
                scale: *scale,
            },
            Constant::Str(s) => Value::Str(s.clone()),
            Constant::Null => Value::Null,
        }
    }
}

/// A storage slot of a call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Local(LocalId),
    Param(ParamId),
    This,
}

/// Where a value lives. The target of pointers and managed references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Slot { frame: usize, slot: Slot },
    Field { object: ObjectHandle, field: FieldId },
    /// A field of a struct stored at `base`, by position.
    StructField { base: Box<Location>, position: usize },
    Element { array: ObjectHandle, index: usize },
}
