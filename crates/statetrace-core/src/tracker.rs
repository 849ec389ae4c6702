//! The runtime tracker contract.
//!
//! Instrumented bodies call into an external tracker type. This module names
//! every member of that contract so IR calls can reference them and the pass
//! can check which ones the referenced tracker type actually provides.
//!
//! ## Members
//!
//! ```text
//! static  LogMethodEntry(method: u32) -> Tracker
//! static  LogLambdaEntry(method: u32, lambda: u32) -> Tracker
//! static  LogStateMachineMethodEntry(method: u32, instance: u64) -> Tracker
//! static  LogStateMachineLambdaEntry(method: u32, lambda: u32, instance: u64) -> Tracker
//! static  GetNewStateMachineInstanceId() -> u64
//! ref     LogReturn()
//! ref     LogLocalStore(value: <category>, index: u32)
//! ref     LogParameterStore(value: <category>, index: u32)
//! ref     LogLocalStoreUnmanaged(address: void*, size: u32, index: u32)
//! ref     LogParameterStoreUnmanaged(address: void*, size: u32, index: u32)
//! ref     LogLocalStoreLocalAlias(source: u32, target: u32)
//! ref     LogLocalStoreParameterAlias(source: u32, target: u32)
//! ref     LogParameterStoreParameterAlias(source: u32, target: u32)
//! ```
//!
//! `ref` members are instance members invoked on the activation's tracker
//! slot passed by reference.

use std::fmt;

use crate::type_hash::{TypeHash, primitives};

/// Offset added to a hoisted field's token to form its store index.
pub const HOISTED_INDEX_BASE: u32 = 0x10000;

/// Value shape of a scalar store overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueCategory {
    Bool,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Decimal,
    String,
    Object,
    Pointer,
}

impl ValueCategory {
    /// Every category, in overload declaration order.
    pub const ALL: [ValueCategory; 11] = [
        Self::Bool,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::Decimal,
        Self::String,
        Self::Object,
        Self::Pointer,
    ];

    /// Parameter type of the overload.
    pub const fn parameter_type(self) -> TypeHash {
        match self {
            Self::Bool => primitives::BOOL,
            Self::U8 => primitives::UINT8,
            Self::U16 => primitives::UINT16,
            Self::U32 => primitives::UINT32,
            Self::U64 => primitives::UINT64,
            Self::F32 => primitives::FLOAT,
            Self::F64 => primitives::DOUBLE,
            Self::Decimal => primitives::DECIMAL,
            Self::String => primitives::STRING,
            Self::Object => primitives::OBJECT,
            Self::Pointer => primitives::VOID_PTR,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Object => "object",
            Self::Pointer => "void*",
        }
    }
}

impl fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which family of store members a tracked entity reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreFamily {
    Local,
    Parameter,
}

impl StoreFamily {
    /// Name shared by this family's store members.
    pub const fn member_prefix(self) -> &'static str {
        match self {
            Self::Local => "LogLocalStore",
            Self::Parameter => "LogParameterStore",
        }
    }
}

/// One member of the tracker contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackerMember {
    LogMethodEntry,
    LogLambdaEntry,
    LogStateMachineMethodEntry,
    LogStateMachineLambdaEntry,
    LogReturn,
    GetNewStateMachineInstanceId,
    LogStore {
        family: StoreFamily,
        category: ValueCategory,
    },
    LogStoreUnmanaged {
        family: StoreFamily,
    },
    LogLocalStoreLocalAlias,
    LogLocalStoreParameterAlias,
    LogParameterStoreParameterAlias,
}

impl TrackerMember {
    /// Every member of the contract.
    pub fn all() -> impl Iterator<Item = TrackerMember> {
        let fixed = [
            Self::LogMethodEntry,
            Self::LogLambdaEntry,
            Self::LogStateMachineMethodEntry,
            Self::LogStateMachineLambdaEntry,
            Self::LogReturn,
            Self::GetNewStateMachineInstanceId,
            Self::LogStoreUnmanaged {
                family: StoreFamily::Local,
            },
            Self::LogStoreUnmanaged {
                family: StoreFamily::Parameter,
            },
            Self::LogLocalStoreLocalAlias,
            Self::LogLocalStoreParameterAlias,
            Self::LogParameterStoreParameterAlias,
        ];
        let stores = [StoreFamily::Local, StoreFamily::Parameter]
            .into_iter()
            .flat_map(|family| {
                ValueCategory::ALL
                    .into_iter()
                    .map(move |category| Self::LogStore { family, category })
            });
        fixed.into_iter().chain(stores)
    }

    /// Whether the member is called on the tracker slot rather than statically.
    pub const fn is_instance(self) -> bool {
        !matches!(
            self,
            Self::LogMethodEntry
                | Self::LogLambdaEntry
                | Self::LogStateMachineMethodEntry
                | Self::LogStateMachineLambdaEntry
                | Self::GetNewStateMachineInstanceId
        )
    }

    /// Whether the member creates the activation's tracker handle.
    pub const fn is_entry(self) -> bool {
        matches!(
            self,
            Self::LogMethodEntry
                | Self::LogLambdaEntry
                | Self::LogStateMachineMethodEntry
                | Self::LogStateMachineLambdaEntry
        )
    }
}

impl fmt::Display for TrackerMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogMethodEntry => f.write_str("LogMethodEntry"),
            Self::LogLambdaEntry => f.write_str("LogLambdaEntry"),
            Self::LogStateMachineMethodEntry => f.write_str("LogStateMachineMethodEntry"),
            Self::LogStateMachineLambdaEntry => f.write_str("LogStateMachineLambdaEntry"),
            Self::LogReturn => f.write_str("LogReturn"),
            Self::GetNewStateMachineInstanceId => f.write_str("GetNewStateMachineInstanceId"),
            Self::LogStore { family, category } => {
                write!(f, "{}({})", family.member_prefix(), category)
            }
            Self::LogStoreUnmanaged { family } => write!(f, "{}Unmanaged", family.member_prefix()),
            Self::LogLocalStoreLocalAlias => f.write_str("LogLocalStoreLocalAlias"),
            Self::LogLocalStoreParameterAlias => f.write_str("LogLocalStoreParameterAlias"),
            Self::LogParameterStoreParameterAlias => {
                f.write_str("LogParameterStoreParameterAlias")
            }
        }
    }
}
