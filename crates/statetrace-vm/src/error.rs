//! Errors raised while evaluating a module.
//!
//! These are faults in the evaluated program or in the host's use of the
//! [`Vm`](crate::Vm). Exceptions thrown by the program are values and only
//! surface here when nothing catches them.

use statetrace_core::{FieldId, MethodId, TypeHash};
use thiserror::Error;

/// Result alias for evaluator operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("unknown method {0}")]
    UnknownMethod(MethodId),

    #[error("method {0} has no body")]
    NoBody(MethodId),

    #[error("unknown type {0}")]
    UnknownType(TypeHash),

    #[error("unknown field {0}")]
    UnknownField(FieldId),

    /// A value had the wrong shape for the operation applied to it.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("method {method} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        method: MethodId,
        expected: usize,
        actual: usize,
    },

    #[error("missing argument {0}")]
    MissingArgument(usize),

    #[error("no receiver for an instance access")]
    MissingReceiver,

    #[error("slot does not exist in its frame")]
    UnknownSlot,

    #[error("no active frame")]
    NoActiveFrame,

    #[error("null reference")]
    NullReference,

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i128, len: usize },

    #[error("stack overflow at depth {depth}")]
    StackOverflow { depth: usize },

    #[error("{0} is not assignable")]
    NotAssignable(&'static str),

    /// A tracker instance member ran on a slot no entry call initialized.
    #[error("tracker used before entry")]
    TrackerNotEntered,

    /// `break`, `continue` or a rethrow with nothing to act on.
    #[error("{0} outside of an enclosing construct")]
    InvalidControlFlow(&'static str),

    #[error("unhandled exception of type {ty}")]
    UnhandledException { ty: String },
}

impl RuntimeError {
    pub(crate) fn mismatch(expected: &'static str, actual: impl std::fmt::Debug) -> Self {
        RuntimeError::TypeMismatch {
            expected,
            actual: format!("{actual:?}"),
        }
    }
}
