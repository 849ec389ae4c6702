//! Mapping a static type to one store overload.
//!
//! ## Algorithm
//!
//! 1. `bool`, floating point and `decimal` map to their own overloads.
//! 2. Integers map to the unsigned overload of the same width. Signed
//!    values and `char` are reinterpreted, never converted, so the logged bits
//!    are the stored bits (`int8 -1` logs `u8 255`). Enums use their
//!    underlying integer.
//! 3. `string` maps to the string overload; classes, interfaces, `object`
//!    and `dynamic` to the object overload. Type parameters are boxed to
//!    object, unless they may be byref-like, in which case the store is
//!    dropped.
//! 4. Raw and function pointers map to the pointer overload.
//! 5. Value types overriding `ToString` are logged as the string it returns.
//! 6. Other value types without managed references (including native-sized
//!    integers and nullables of unmanaged types) are dumped as raw bytes.
//! 7. Remaining value types are materialized via `ToString` if they can be
//!    boxed; byref-like ones cannot and are dropped.

use statetrace_core::{PrimitiveKind, TypeFlags, TypeHash, TypeKind, TypeTable, ValueCategory};

/// The overload a store is reported through: a scalar category, or the
/// unmanaged byte-dump overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverloadKey {
    Scalar(ValueCategory),
    Unmanaged,
}

/// How the stored value is turned into the overload's argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueConversion {
    None,
    /// Same-width bit reinterpretation to an unsigned kind.
    Reinterpret(PrimitiveKind),
    /// Box to `object`.
    Box(TypeHash),
    /// Call `ToString` on the value in place.
    ToString(TypeHash),
}

/// Why no call is emitted for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Byref-like value with managed references and no `ToString` override.
    ByRefLike,
    /// Type parameter that may be instantiated with a byref-like type.
    ByRefLikeTypeParameter,
    Void,
    UnknownType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorePlan {
    Scalar {
        category: ValueCategory,
        conversion: ValueConversion,
    },
    Unmanaged {
        ty: TypeHash,
    },
    Skip(SkipReason),
}

impl StorePlan {
    fn scalar(category: ValueCategory) -> Self {
        StorePlan::Scalar {
            category,
            conversion: ValueConversion::None,
        }
    }

    /// The overload this plan calls, if any.
    pub fn key(&self) -> Option<OverloadKey> {
        match self {
            StorePlan::Scalar { category, .. } => Some(OverloadKey::Scalar(*category)),
            StorePlan::Unmanaged { .. } => Some(OverloadKey::Unmanaged),
            StorePlan::Skip(_) => None,
        }
    }

    /// Whether the emitted call passes an unmanaged pointer.
    pub fn uses_pointer(&self) -> bool {
        matches!(
            self,
            StorePlan::Unmanaged { .. }
                | StorePlan::Scalar {
                    category: ValueCategory::Pointer,
                    ..
                }
        )
    }
}

/// Choose the store overload for a value of type `ty`.
pub fn resolve_store(ty: TypeHash, types: &TypeTable) -> StorePlan {
    let Some(def) = types.get(ty) else {
        return StorePlan::Skip(SkipReason::UnknownType);
    };

    match &def.kind {
        TypeKind::Void => StorePlan::Skip(SkipReason::Void),
        TypeKind::Primitive(kind) => resolve_primitive(*kind, ty),
        TypeKind::Enum { underlying } => match resolve_primitive(*underlying, ty) {
            StorePlan::Scalar {
                category,
                conversion: ValueConversion::None,
            } => match unsigned_of(*underlying) {
                Some(unsigned) => StorePlan::Scalar {
                    category,
                    conversion: ValueConversion::Reinterpret(unsigned),
                },
                None => StorePlan::scalar(category),
            },
            other => other,
        },
        TypeKind::String => StorePlan::scalar(ValueCategory::String),
        TypeKind::Object | TypeKind::Class | TypeKind::Interface | TypeKind::Dynamic => {
            StorePlan::scalar(ValueCategory::Object)
        }
        TypeKind::TypeParameter { allows_ref_struct } => {
            if *allows_ref_struct {
                StorePlan::Skip(SkipReason::ByRefLikeTypeParameter)
            } else {
                StorePlan::Scalar {
                    category: ValueCategory::Object,
                    conversion: ValueConversion::Box(ty),
                }
            }
        }
        TypeKind::Pointer { .. } | TypeKind::FunctionPointer => {
            StorePlan::scalar(ValueCategory::Pointer)
        }
        TypeKind::Struct | TypeKind::Nullable { .. } => {
            if def.to_string.is_some() {
                to_string(ty)
            } else if types.is_unmanaged(ty) {
                StorePlan::Unmanaged { ty }
            } else if def.flags.contains(TypeFlags::REF_STRUCT) {
                StorePlan::Skip(SkipReason::ByRefLike)
            } else {
                to_string(ty)
            }
        }
    }
}

fn to_string(ty: TypeHash) -> StorePlan {
    StorePlan::Scalar {
        category: ValueCategory::String,
        conversion: ValueConversion::ToString(ty),
    }
}

fn resolve_primitive(kind: PrimitiveKind, ty: TypeHash) -> StorePlan {
    let reinterpret = |category, unsigned| StorePlan::Scalar {
        category,
        conversion: ValueConversion::Reinterpret(unsigned),
    };
    match kind {
        PrimitiveKind::Bool => StorePlan::scalar(ValueCategory::Bool),
        PrimitiveKind::Uint8 => StorePlan::scalar(ValueCategory::U8),
        PrimitiveKind::Uint16 => StorePlan::scalar(ValueCategory::U16),
        PrimitiveKind::Uint32 => StorePlan::scalar(ValueCategory::U32),
        PrimitiveKind::Uint64 => StorePlan::scalar(ValueCategory::U64),
        PrimitiveKind::Int8 => reinterpret(ValueCategory::U8, PrimitiveKind::Uint8),
        PrimitiveKind::Int16 => reinterpret(ValueCategory::U16, PrimitiveKind::Uint16),
        PrimitiveKind::Char => reinterpret(ValueCategory::U16, PrimitiveKind::Uint16),
        PrimitiveKind::Int32 => reinterpret(ValueCategory::U32, PrimitiveKind::Uint32),
        PrimitiveKind::Int64 => reinterpret(ValueCategory::U64, PrimitiveKind::Uint64),
        PrimitiveKind::NativeInt | PrimitiveKind::NativeUint => StorePlan::Unmanaged { ty },
        PrimitiveKind::Float => StorePlan::scalar(ValueCategory::F32),
        PrimitiveKind::Double => StorePlan::scalar(ValueCategory::F64),
        PrimitiveKind::Decimal => StorePlan::scalar(ValueCategory::Decimal),
    }
}

/// The unsigned kind an enum with this underlying type is reinterpreted as.
fn unsigned_of(kind: PrimitiveKind) -> Option<PrimitiveKind> {
    match kind {
        PrimitiveKind::Int8 | PrimitiveKind::Uint8 => Some(PrimitiveKind::Uint8),
        PrimitiveKind::Int16 | PrimitiveKind::Uint16 | PrimitiveKind::Char => {
            Some(PrimitiveKind::Uint16)
        }
        PrimitiveKind::Int32 | PrimitiveKind::Uint32 => Some(PrimitiveKind::Uint32),
        PrimitiveKind::Int64 | PrimitiveKind::Uint64 => Some(PrimitiveKind::Uint64),
        _ => None,
    }
}
