//! Deterministic hash-based type identity.
//!
//! [`TypeHash`] is a 64-bit hash of a type's qualified name. The same name
//! always produces the same hash, so IR fragments can reference a type
//! before the [`TypeTable`](crate::TypeTable) has registered it, and builtin
//! types are available as compile-time constants in [`primitives`].
//!
//! Hashes use XXHash64 mixed with a domain constant so derived types
//! (pointers, nullables) never collide with a plain name.

use std::fmt;
use xxhash_rust::const_xxh64::xxh64;

/// Domain-specific mixing constants.
pub mod hash_constants {
    /// Domain marker for named types.
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for pointer types.
    pub const POINTER: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for nullable wrappers.
    pub const NULLABLE: u64 = 0x9a7f3d5e2b8c4601;
}

/// A deterministic 64-bit hash identifying a type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Hash a qualified type name.
    ///
    /// ```
    /// use statetrace_core::TypeHash;
    ///
    /// assert_eq!(TypeHash::from_name("Point"), TypeHash::from_name("Point"));
    /// assert_ne!(TypeHash::from_name("Point"), TypeHash::from_name("Size"));
    /// ```
    #[inline]
    pub const fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Hash of the unmanaged pointer type `pointee*`.
    #[inline]
    pub const fn pointer_to(pointee: TypeHash) -> Self {
        TypeHash(hash_constants::POINTER ^ pointee.0.rotate_left(7))
    }

    /// Hash of the nullable wrapper `inner?`.
    #[inline]
    pub const fn nullable_of(inner: TypeHash) -> Self {
        TypeHash(hash_constants::NULLABLE ^ inner.0.rotate_left(13))
    }

    /// Whether this is the empty hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Hashes of the builtin types every [`TypeTable`](crate::TypeTable) registers.
pub mod primitives {
    use super::TypeHash;

    pub const VOID: TypeHash = TypeHash::from_name("void");
    pub const BOOL: TypeHash = TypeHash::from_name("bool");
    pub const CHAR: TypeHash = TypeHash::from_name("char");
    pub const INT8: TypeHash = TypeHash::from_name("int8");
    pub const INT16: TypeHash = TypeHash::from_name("int16");
    pub const INT32: TypeHash = TypeHash::from_name("int32");
    pub const INT64: TypeHash = TypeHash::from_name("int64");
    pub const UINT8: TypeHash = TypeHash::from_name("uint8");
    pub const UINT16: TypeHash = TypeHash::from_name("uint16");
    pub const UINT32: TypeHash = TypeHash::from_name("uint32");
    pub const UINT64: TypeHash = TypeHash::from_name("uint64");
    pub const NINT: TypeHash = TypeHash::from_name("nint");
    pub const NUINT: TypeHash = TypeHash::from_name("nuint");
    pub const FLOAT: TypeHash = TypeHash::from_name("float");
    pub const DOUBLE: TypeHash = TypeHash::from_name("double");
    pub const DECIMAL: TypeHash = TypeHash::from_name("decimal");
    pub const STRING: TypeHash = TypeHash::from_name("string");
    pub const OBJECT: TypeHash = TypeHash::from_name("object");
    pub const DYNAMIC: TypeHash = TypeHash::from_name("dynamic");
    /// Untyped pointer, `void*`.
    pub const VOID_PTR: TypeHash = TypeHash::pointer_to(VOID);
}
