//! Static type information for lowered bodies.
//!
//! The instrumentation pass never infers types: every local, parameter and
//! field is declared with a [`TypeHash`] and the [`TypeTable`] answers the
//! questions the pass needs about it:
//!
//! - what kind of type it is ([`TypeKind`])
//! - whether it is unmanaged (contains no managed references)
//! - its size in bytes, for raw byte dumps
//! - whether it is byref-like, overrides `ToString`, or is nested in the tracker
//! - which closure/state-machine fields were hoisted from locals or parameters

use std::fmt;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::ids::{FieldId, MethodId};
use crate::type_hash::{TypeHash, primitives};

/// Size of a native pointer on the target.
pub const POINTER_SIZE: u32 = 8;

// ============================================================================
// Primitive kinds
// ============================================================================

/// Builtin scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    NativeInt,
    NativeUint,
    Float,
    Double,
    Decimal,
}

impl PrimitiveKind {
    /// Size in bytes.
    pub const fn size(self) -> u32 {
        match self {
            Self::Bool | Self::Int8 | Self::Uint8 => 1,
            Self::Char | Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float => 4,
            Self::Int64 | Self::Uint64 | Self::Double => 8,
            Self::NativeInt | Self::NativeUint => POINTER_SIZE,
            Self::Decimal => 16,
        }
    }

    /// Whether this is a signed integer kind.
    pub const fn is_signed_integer(self) -> bool {
        matches!(
            self,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::NativeInt
        )
    }

    /// Whether this is an integer kind (including `char`).
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
                | Self::NativeInt
                | Self::NativeUint
        )
    }

    /// Whether this is `float` or `double`.
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// The builtin type hash for this kind.
    pub const fn type_hash(self) -> TypeHash {
        match self {
            Self::Bool => primitives::BOOL,
            Self::Char => primitives::CHAR,
            Self::Int8 => primitives::INT8,
            Self::Int16 => primitives::INT16,
            Self::Int32 => primitives::INT32,
            Self::Int64 => primitives::INT64,
            Self::Uint8 => primitives::UINT8,
            Self::Uint16 => primitives::UINT16,
            Self::Uint32 => primitives::UINT32,
            Self::Uint64 => primitives::UINT64,
            Self::NativeInt => primitives::NINT,
            Self::NativeUint => primitives::NUINT,
            Self::Float => primitives::FLOAT,
            Self::Double => primitives::DOUBLE,
            Self::Decimal => primitives::DECIMAL,
        }
    }

    /// Source-level name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Char => "char",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::NativeInt => "nint",
            Self::NativeUint => "nuint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
        }
    }

    const ALL: [PrimitiveKind; 15] = [
        Self::Bool,
        Self::Char,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Uint8,
        Self::Uint16,
        Self::Uint32,
        Self::Uint64,
        Self::NativeInt,
        Self::NativeUint,
        Self::Float,
        Self::Double,
        Self::Decimal,
    ];
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Type definitions
// ============================================================================

/// The shape of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Primitive(PrimitiveKind),
    String,
    /// The root reference type.
    Object,
    Class,
    Interface,
    /// A value type. Byref-like structs carry [`TypeFlags::REF_STRUCT`].
    Struct,
    Enum {
        underlying: PrimitiveKind,
    },
    Nullable {
        inner: TypeHash,
    },
    Pointer {
        pointee: TypeHash,
    },
    FunctionPointer,
    TypeParameter {
        /// Whether the parameter may be instantiated with a byref-like type.
        allows_ref_struct: bool,
    },
    Dynamic,
}

bitflags! {
    /// Facts about a type the pass cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// Byref-like value type; cannot be boxed.
        const REF_STRUCT = 1 << 0;
        /// Value type containing managed references (directly or in nested fields).
        const HAS_MANAGED_REFS = 1 << 1;
        /// The runtime tracker type.
        const TRACKER = 1 << 2;
        /// Excluded from code coverage.
        const EXCLUDE_FROM_COVERAGE = 1 << 3;
    }
}

/// Where a closure or state-machine field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoistedFrom {
    /// A user local captured or lifted across a suspension point.
    Local,
    /// A parameter captured or lifted across a suspension point.
    Parameter,
}

/// A field of a class or struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Metadata token.
    pub id: FieldId,
    /// Field name; hoisted fields keep the mangled name the lowering gave them.
    pub name: String,
    /// Declared type.
    pub ty: TypeHash,
    /// Whether this is a `ref` field.
    pub is_ref: bool,
    /// Set when the field stores a hoisted local or parameter.
    pub hoisted: Option<HoistedFrom>,
}

impl FieldDef {
    /// Create a plain field.
    pub fn new(id: FieldId, name: impl Into<String>, ty: TypeHash) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            is_ref: false,
            hoisted: None,
        }
    }

    /// Create a field holding a hoisted local or parameter.
    pub fn hoisted(id: FieldId, name: impl Into<String>, ty: TypeHash, from: HoistedFrom) -> Self {
        Self {
            hoisted: Some(from),
            ..Self::new(id, name, ty)
        }
    }

    /// Mark this as a `ref` field.
    pub fn as_ref_field(mut self) -> Self {
        self.is_ref = true;
        self
    }
}

/// A type registered in a [`TypeTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub hash: TypeHash,
    pub name: String,
    pub kind: TypeKind,
    pub flags: TypeFlags,
    /// Size in bytes for value types, pointer size for references.
    pub size: u32,
    /// Alignment in bytes.
    pub align: u32,
    pub fields: Vec<FieldDef>,
    /// Enclosing type for nested types.
    pub containing: Option<TypeHash>,
    /// User-defined `ToString` override, if any.
    pub to_string: Option<MethodId>,
}

impl TypeDef {
    fn with_kind(name: impl Into<String>, kind: TypeKind, size: u32, align: u32) -> Self {
        let name = name.into();
        Self {
            hash: TypeHash::from_name(&name),
            name,
            kind,
            flags: TypeFlags::empty(),
            size,
            align,
            fields: Vec::new(),
            containing: None,
            to_string: None,
        }
    }

    /// A reference type.
    pub fn class(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Class, POINTER_SIZE, POINTER_SIZE)
    }

    /// An interface.
    pub fn interface(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Interface, POINTER_SIZE, POINTER_SIZE)
    }

    /// A value type with an explicit layout size.
    pub fn structure(name: impl Into<String>, size: u32, align: u32) -> Self {
        Self::with_kind(name, TypeKind::Struct, size, align)
    }

    /// A byref-like value type.
    pub fn ref_struct(name: impl Into<String>, size: u32, align: u32) -> Self {
        Self::structure(name, size, align).with_flags(TypeFlags::REF_STRUCT)
    }

    /// An enum over an integral underlying type.
    pub fn enumeration(name: impl Into<String>, underlying: PrimitiveKind) -> Self {
        let size = underlying.size();
        Self::with_kind(name, TypeKind::Enum { underlying }, size, size)
    }

    /// A generic type parameter.
    pub fn type_parameter(name: impl Into<String>, allows_ref_struct: bool) -> Self {
        Self::with_kind(
            name,
            TypeKind::TypeParameter { allows_ref_struct },
            POINTER_SIZE,
            POINTER_SIZE,
        )
    }

    /// A function pointer type.
    pub fn function_pointer(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::FunctionPointer, POINTER_SIZE, POINTER_SIZE)
    }

    /// Add flags.
    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Nest this type inside `outer`. The hash is recomputed from `Outer.Name`.
    pub fn nested_in(mut self, outer: &TypeDef) -> Self {
        self.name = format!("{}.{}", outer.name, self.name);
        self.hash = TypeHash::from_name(&self.name);
        self.containing = Some(outer.hash);
        self
    }

    /// Record a user `ToString` override.
    pub fn with_to_string(mut self, method: MethodId) -> Self {
        self.to_string = Some(method);
        self
    }

    /// Whether this is a value type (struct, enum, primitive, nullable or pointer).
    pub fn is_value_type(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Primitive(_)
                | TypeKind::Struct
                | TypeKind::Enum { .. }
                | TypeKind::Nullable { .. }
                | TypeKind::Pointer { .. }
                | TypeKind::FunctionPointer
        )
    }

    /// Whether this type is byref-like.
    pub fn is_ref_struct(&self) -> bool {
        self.flags.contains(TypeFlags::REF_STRUCT)
    }

    /// Position of a field within [`fields`](Self::fields).
    pub fn field_position(&self, id: FieldId) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }
}

// ============================================================================
// TypeTable
// ============================================================================

/// Registry of every type a module references.
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: FxHashMap<TypeHash, TypeDef>,
    /// Field token to owning type.
    field_owners: FxHashMap<FieldId, TypeHash>,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    /// Create a table with the builtin types registered.
    pub fn new() -> Self {
        let mut table = Self {
            types: FxHashMap::default(),
            field_owners: FxHashMap::default(),
        };

        table.register(TypeDef::with_kind("void", TypeKind::Void, 0, 1));
        for kind in PrimitiveKind::ALL {
            let size = kind.size();
            table.register(TypeDef::with_kind(
                kind.name(),
                TypeKind::Primitive(kind),
                size,
                size.min(POINTER_SIZE),
            ));
        }
        table.register(TypeDef::with_kind(
            "string",
            TypeKind::String,
            POINTER_SIZE,
            POINTER_SIZE,
        ));
        table.register(TypeDef::with_kind(
            "object",
            TypeKind::Object,
            POINTER_SIZE,
            POINTER_SIZE,
        ));
        table.register(TypeDef::with_kind(
            "dynamic",
            TypeKind::Dynamic,
            POINTER_SIZE,
            POINTER_SIZE,
        ));
        table.pointer_to(primitives::VOID);
        table
    }

    /// Register a type, replacing any previous definition with the same hash.
    pub fn register(&mut self, def: TypeDef) -> TypeHash {
        let hash = def.hash;
        for field in &def.fields {
            self.field_owners.insert(field.id, hash);
        }
        self.types.insert(hash, def);
        hash
    }

    /// Register (or look up) the pointer type `pointee*`.
    pub fn pointer_to(&mut self, pointee: TypeHash) -> TypeHash {
        let hash = TypeHash::pointer_to(pointee);
        if !self.types.contains_key(&hash) {
            let name = format!("{}*", self.name_of(pointee));
            let mut def = TypeDef::with_kind(
                name,
                TypeKind::Pointer { pointee },
                POINTER_SIZE,
                POINTER_SIZE,
            );
            def.hash = hash;
            self.types.insert(hash, def);
        }
        hash
    }

    /// Register (or look up) the nullable wrapper `inner?`.
    ///
    /// Layout is a `bool` flag followed by the value, both padded to the
    /// inner type's alignment. Managed references in `inner` carry over.
    pub fn nullable_of(&mut self, inner: TypeHash) -> TypeHash {
        let hash = TypeHash::nullable_of(inner);
        if !self.types.contains_key(&hash) {
            let (name, size, align, flags) = match self.types.get(&inner) {
                Some(def) => {
                    let align = def.align.max(1);
                    let size = round_up(round_up(1, align) + def.size, align);
                    (
                        format!("{}?", def.name),
                        size,
                        align,
                        def.flags & TypeFlags::HAS_MANAGED_REFS,
                    )
                }
                None => (format!("{inner}?"), 0, 1, TypeFlags::empty()),
            };
            let mut def = TypeDef::with_kind(name, TypeKind::Nullable { inner }, size, align)
                .with_flags(flags);
            def.hash = hash;
            self.types.insert(hash, def);
        }
        hash
    }

    /// Look up a type.
    pub fn get(&self, hash: TypeHash) -> Option<&TypeDef> {
        self.types.get(&hash)
    }

    /// Whether a type is registered.
    pub fn contains(&self, hash: TypeHash) -> bool {
        self.types.contains_key(&hash)
    }

    /// Display name of a type, or its hash when unregistered.
    pub fn name_of(&self, hash: TypeHash) -> String {
        match self.types.get(&hash) {
            Some(def) => def.name.clone(),
            None => hash.to_string(),
        }
    }

    /// Look up a field by token.
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        let owner = self.field_owners.get(&id)?;
        self.types.get(owner)?.fields.iter().find(|f| f.id == id)
    }

    /// The type that declares a field.
    pub fn field_owner(&self, id: FieldId) -> Option<TypeHash> {
        self.field_owners.get(&id).copied()
    }

    /// Size in bytes of a value of this type.
    pub fn size_of(&self, hash: TypeHash) -> Option<u32> {
        self.types.get(&hash).map(|def| def.size)
    }

    /// Whether a value of this type contains no managed references.
    ///
    /// Type parameters, `dynamic` and all reference types are managed.
    pub fn is_unmanaged(&self, hash: TypeHash) -> bool {
        let Some(def) = self.types.get(&hash) else {
            return false;
        };
        match &def.kind {
            TypeKind::Primitive(_)
            | TypeKind::Enum { .. }
            | TypeKind::Pointer { .. }
            | TypeKind::FunctionPointer => true,
            TypeKind::Struct => !def.flags.contains(TypeFlags::HAS_MANAGED_REFS),
            TypeKind::Nullable { inner } => self.is_unmanaged(*inner),
            _ => false,
        }
    }

    /// Whether `hash` is `outer` or nested (transitively) inside it.
    pub fn is_within(&self, hash: TypeHash, outer: TypeHash) -> bool {
        let mut current = Some(hash);
        while let Some(ty) = current {
            if ty == outer {
                return true;
            }
            current = self.types.get(&ty).and_then(|def| def.containing);
        }
        false
    }

    /// Whether `hash` is the tracker type or nested inside it.
    pub fn is_within_tracker(&self, hash: TypeHash) -> bool {
        let mut current = Some(hash);
        while let Some(ty) = current {
            let Some(def) = self.types.get(&ty) else {
                return false;
            };
            if def.flags.contains(TypeFlags::TRACKER) {
                return true;
            }
            current = def.containing;
        }
        false
    }

    /// Iterate all registered types.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}
