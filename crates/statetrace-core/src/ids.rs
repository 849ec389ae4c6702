//! Identifier newtypes for IR entities.
//!
//! Locals and parameters are identified by their position in the owning
//! method's declaration lists. Methods, fields and lambdas carry the
//! metadata tokens the host compiler assigned to them; those tokens are what
//! the runtime tracker receives.

use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Create an id from its raw value.
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Get the raw value.
            #[inline]
            pub const fn index(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                Self::new(index)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Position of a local in [`MethodDecl::locals`](crate::ir::MethodDecl::locals).
    LocalId,
    "l"
);

define_id!(
    /// Position of a parameter in [`MethodDecl::params`](crate::ir::MethodDecl::params).
    ///
    /// The implicit receiver is not a parameter.
    ParamId,
    "p"
);

define_id!(
    /// Metadata token of a method.
    MethodId,
    "m"
);

define_id!(
    /// Metadata token of a field.
    FieldId,
    "f"
);

define_id!(
    /// Ordinal of a lambda or local function within its top-level method.
    LambdaId,
    "lambda"
);
