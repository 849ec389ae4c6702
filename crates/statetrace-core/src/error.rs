//! Errors for malformed IR.
//!
//! Lowering is trusted to produce well-formed bodies, but a body that names a
//! local, parameter, field or type that does not exist cannot be rewritten.
//! [`IrError`] reports which reference was dangling.

use thiserror::Error;

use crate::ids::{FieldId, LocalId, MethodId, ParamId};
use crate::type_hash::TypeHash;

/// A dangling or inconsistent reference inside a method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    /// A place names a local the method does not declare.
    #[error("method {method}: unknown local {local}")]
    UnknownLocal { method: MethodId, local: LocalId },

    /// A place names a parameter the method does not declare.
    #[error("method {method}: unknown parameter {param}")]
    UnknownParam { method: MethodId, param: ParamId },

    /// A field token is not declared by any registered type.
    #[error("method {method}: unknown field {field}")]
    UnknownField { method: MethodId, field: FieldId },

    /// A declared type is not registered.
    #[error("method {method}: unknown type {ty}")]
    UnknownType { method: MethodId, ty: TypeHash },

    /// A call or state machine references a method missing from the module.
    #[error("unknown method {method}")]
    UnknownMethod { method: MethodId },

    /// A ref rebind targets something that is not a ref local or ref parameter.
    #[error("method {method}: ref assignment to a non-ref target")]
    InvalidRefTarget { method: MethodId },
}

impl IrError {
    /// The method the error was found in, when known.
    pub fn method(&self) -> MethodId {
        match self {
            IrError::UnknownLocal { method, .. }
            | IrError::UnknownParam { method, .. }
            | IrError::UnknownField { method, .. }
            | IrError::UnknownType { method, .. }
            | IrError::UnknownMethod { method }
            | IrError::InvalidRefTarget { method } => *method,
        }
    }
}

/// Result alias for IR validation.
pub type Result<T> = std::result::Result<T, IrError>;
