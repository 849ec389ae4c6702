//! Lowered method bodies.
//!
//! The IR is the output of binding and general lowering, after closure and
//! state-machine conversion have hoisted captured locals into fields. It is a
//! tree: statements hold expressions, expressions hold places.
//!
//! ## Modules
//!
//! - [`expr`]: expressions, places, calls, constants
//! - [`stmt`]: statements and exception regions
//! - [`builder`]: [`MethodBuilder`] for assembling declarations
//! - [`validate`]: dangling-reference checks

pub mod builder;
pub mod expr;
pub mod stmt;
pub mod validate;

pub use builder::MethodBuilder;
pub use expr::{
    Arg, BinaryOp, Call, CallTarget, Constant, Conversion, Expr, Intrinsic, MemberInit,
    NewObject, Place, UnaryOp,
};
pub use stmt::{CatchClause, Stmt, StmtKind, SwitchCase, TryRegion};
pub use validate::validate_method;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::ids::{FieldId, LambdaId, LocalId, MethodId, ParamId};
use crate::span::Span;
use crate::type_hash::TypeHash;
use crate::types::TypeTable;

// ============================================================================
// Declarations
// ============================================================================

/// How a parameter or argument is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefKind {
    #[default]
    None,
    Ref,
    In,
    Out,
}

impl RefKind {
    /// Whether a callee may write through this reference.
    pub fn is_writable(self) -> bool {
        matches!(self, RefKind::Ref | RefKind::Out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeHash,
    pub ref_kind: RefKind,
    /// A discard parameter (`_`), never readable.
    pub is_discard: bool,
}

/// Who introduced a local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalKind {
    /// Declared in source.
    User,
    /// Introduced by lowering or instrumentation.
    Synthesized,
    /// The activation's tracker slot.
    Tracker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    pub name: String,
    pub ty: TypeHash,
    pub kind: LocalKind,
    /// A ref local: an alias to other storage.
    pub is_ref: bool,
}

/// The flavor of state machine a resume routine belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateMachineKind {
    Iterator,
    Async,
    AsyncIterator,
}

/// Links a state machine's resume routine to its kickoff method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateMachineInfo {
    pub kind: StateMachineKind,
    /// The user method (or lambda) the state machine was generated for.
    pub kickoff: MethodId,
    /// Field holding the instance's correlation id.
    pub instance_id: FieldId,
    /// Field set while an async iterator is being disposed.
    pub dispose_mode: Option<FieldId>,
}

/// Role of a method in the lowered program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Ordinary,
    Constructor,
    StaticConstructor,
    /// Property or event accessor.
    Accessor,
    Lambda {
        containing: MethodId,
        lambda: LambdaId,
    },
    LocalFunction {
        containing: MethodId,
        lambda: LambdaId,
    },
    /// The user method whose body was moved into a state machine.
    StateMachineKickoff,
    /// Constructor of a state-machine type.
    StateMachineConstructor {
        instance_id: FieldId,
    },
    /// `MoveNext` of a state machine.
    StateMachineResume(StateMachineInfo),
    /// `Dispose` of an iterator state machine.
    StateMachineDispose,
}

bitflags! {
    /// Declaration facts that affect instrumentation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// Compiler-generated accessor of an auto-property or field-like event.
        const AUTO_ACCESSOR = 1 << 0;
        /// Implicitly declared (e.g. a default constructor).
        const IMPLICIT = 1 << 1;
        /// Excluded from code coverage.
        const EXCLUDE_FROM_COVERAGE = 1 << 2;
        /// Lambda converted to an expression tree rather than code.
        const EXPRESSION_TREE = 1 << 3;
        /// Static method: no receiver.
        const STATIC = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub id: MethodId,
    pub name: String,
    pub kind: MethodKind,
    pub flags: MethodFlags,
    pub containing_type: Option<TypeHash>,
    pub params: Vec<ParamDecl>,
    pub locals: Vec<LocalDecl>,
    pub return_type: TypeHash,
    /// `None` for abstract and extern methods.
    pub body: Option<Stmt>,
    /// Declaration span.
    pub span: Span,
    /// Span of the body block, when written in source.
    pub body_span: Option<Span>,
}

impl MethodDecl {
    pub fn local(&self, id: LocalId) -> Option<&LocalDecl> {
        self.locals.get(id.index() as usize)
    }

    pub fn param(&self, id: ParamId) -> Option<&ParamDecl> {
        self.params.get(id.index() as usize)
    }

    /// Append a local and return its id.
    pub fn add_local(&mut self, decl: LocalDecl) -> LocalId {
        let id = LocalId::new(self.locals.len() as u32);
        self.locals.push(decl);
        id
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Span used for diagnostics about the body as a whole.
    pub fn diagnostic_span(&self) -> Span {
        self.body_span.unwrap_or(self.span)
    }
}

// ============================================================================
// Module
// ============================================================================

/// A set of lowered methods and the types they reference.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: TypeTable,
    methods: Vec<MethodDecl>,
    by_id: FxHashMap<MethodId, usize>,
}

impl Module {
    pub fn new(types: TypeTable) -> Self {
        Self {
            types,
            methods: Vec::new(),
            by_id: FxHashMap::default(),
        }
    }

    /// Add a method, replacing any existing method with the same id.
    pub fn add_method(&mut self, method: MethodDecl) -> MethodId {
        let id = method.id;
        match self.by_id.get(&id) {
            Some(&index) => self.methods[index] = method,
            None => {
                self.by_id.insert(id, self.methods.len());
                self.methods.push(method);
            }
        }
        id
    }

    pub fn method(&self, id: MethodId) -> Option<&MethodDecl> {
        self.by_id.get(&id).map(|&index| &self.methods[index])
    }

    pub fn method_mut(&mut self, id: MethodId) -> Option<&mut MethodDecl> {
        self.by_id.get(&id).map(|&index| &mut self.methods[index])
    }

    /// Methods in insertion order.
    pub fn methods(&self) -> &[MethodDecl] {
        &self.methods
    }

    pub fn methods_mut(&mut self) -> &mut [MethodDecl] {
        &mut self.methods
    }

    /// Borrow the type table and the methods separately.
    pub fn split_mut(&mut self) -> (&TypeTable, &mut [MethodDecl]) {
        (&self.types, &mut self.methods)
    }

    /// Follow lambda and local-function containment up to the top-level method.
    ///
    /// Stops at the first method that is not a lambda or local function, or
    /// that is missing from the module.
    pub fn top_level_method(&self, id: MethodId) -> MethodId {
        let mut current = id;
        // Bounded by the method count so malformed cycles terminate.
        for _ in 0..=self.methods.len() {
            match self.method(current).map(|m| m.kind) {
                Some(MethodKind::Lambda { containing, .. })
                | Some(MethodKind::LocalFunction { containing, .. }) => current = containing,
                _ => break,
            }
        }
        current
    }
}
