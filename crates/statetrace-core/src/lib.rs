//! Core types for local-state tracing instrumentation.
//!
//! This crate defines the vocabulary shared by the instrumentation pass and
//! the reference evaluator:
//!
//! ## Modules
//!
//! - [`span`]: source positions and hidden sequence points
//! - [`ids`]: local, parameter, method, field and lambda identifiers
//! - [`type_hash`]: deterministic type identity
//! - [`types`]: the [`TypeTable`] and the facts the pass queries about types
//! - [`tracker`]: members of the runtime tracker contract
//! - [`ir`]: lowered method bodies
//! - [`display`]: text rendering of bodies
//! - [`error`]: malformed-IR errors

pub mod display;
pub mod error;
pub mod ids;
pub mod ir;
pub mod span;
pub mod tracker;
pub mod type_hash;
pub mod types;

pub use display::IrPrinter;
pub use error::{IrError, Result};
pub use ids::{FieldId, LambdaId, LocalId, MethodId, ParamId};
pub use span::Span;
pub use tracker::{HOISTED_INDEX_BASE, StoreFamily, TrackerMember, ValueCategory};
pub use type_hash::{TypeHash, primitives};
pub use types::{
    FieldDef, HoistedFrom, POINTER_SIZE, PrimitiveKind, TypeDef, TypeFlags, TypeKind, TypeTable,
};
