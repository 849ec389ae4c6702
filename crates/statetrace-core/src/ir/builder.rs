//! Fluent construction of [`MethodDecl`]s.
//!
//! ```
//! use statetrace_core::ir::{Expr, MethodBuilder, Place, Stmt};
//! use statetrace_core::{MethodId, primitives};
//!
//! let mut b = MethodBuilder::new(MethodId::new(1), "F");
//! let p = b.param("p", primitives::INT32);
//! let a = b.local("a", primitives::INT32);
//! let method = b.build(Stmt::block(vec![
//!     Stmt::expr(Expr::assign(Place::Local(a), Expr::int(1))),
//!     Stmt::expr(Expr::assign(Place::Param(p), Expr::local(a))),
//! ]));
//! assert_eq!(method.locals.len(), 1);
//! ```

use crate::ids::{LocalId, MethodId, ParamId};
use crate::span::Span;
use crate::type_hash::{TypeHash, primitives};

use super::{
    LocalDecl, LocalKind, MethodDecl, MethodFlags, MethodKind, ParamDecl, RefKind, Stmt,
};

#[derive(Debug, Clone)]
pub struct MethodBuilder {
    decl: MethodDecl,
}

impl MethodBuilder {
    /// Start an ordinary instance method returning `void`.
    pub fn new(id: MethodId, name: impl Into<String>) -> Self {
        Self {
            decl: MethodDecl {
                id,
                name: name.into(),
                kind: MethodKind::Ordinary,
                flags: MethodFlags::empty(),
                containing_type: None,
                params: Vec::new(),
                locals: Vec::new(),
                return_type: primitives::VOID,
                body: None,
                span: Span::default(),
                body_span: None,
            },
        }
    }

    pub fn kind(mut self, kind: MethodKind) -> Self {
        self.decl.kind = kind;
        self
    }

    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.decl.flags |= flags;
        self
    }

    pub fn in_type(mut self, ty: TypeHash) -> Self {
        self.decl.containing_type = Some(ty);
        self
    }

    pub fn returns(mut self, ty: TypeHash) -> Self {
        self.decl.return_type = ty;
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.decl.span = span;
        self
    }

    pub fn body_span(mut self, span: Span) -> Self {
        self.decl.body_span = Some(span);
        self
    }

    /// Declare a by-value parameter.
    pub fn param(&mut self, name: impl Into<String>, ty: TypeHash) -> ParamId {
        self.param_with(name, ty, RefKind::None)
    }

    /// Declare a parameter passed with `ref_kind`.
    pub fn param_with(&mut self, name: impl Into<String>, ty: TypeHash, ref_kind: RefKind) -> ParamId {
        let id = ParamId::new(self.decl.params.len() as u32);
        self.decl.params.push(ParamDecl {
            name: name.into(),
            ty,
            ref_kind,
            is_discard: false,
        });
        id
    }

    /// Declare a discard parameter.
    pub fn discard(&mut self, ty: TypeHash) -> ParamId {
        let id = self.param("_", ty);
        self.decl.params[id.index() as usize].is_discard = true;
        id
    }

    /// Declare a user local.
    pub fn local(&mut self, name: impl Into<String>, ty: TypeHash) -> LocalId {
        self.push_local(name.into(), ty, LocalKind::User, false)
    }

    /// Declare a user ref local.
    pub fn ref_local(&mut self, name: impl Into<String>, ty: TypeHash) -> LocalId {
        self.push_local(name.into(), ty, LocalKind::User, true)
    }

    /// Declare a compiler-synthesized local.
    pub fn synthesized(&mut self, name: impl Into<String>, ty: TypeHash) -> LocalId {
        self.push_local(name.into(), ty, LocalKind::Synthesized, false)
    }

    fn push_local(&mut self, name: String, ty: TypeHash, kind: LocalKind, is_ref: bool) -> LocalId {
        self.decl.add_local(LocalDecl {
            name,
            ty,
            kind,
            is_ref,
        })
    }

    /// Finish with a body.
    pub fn build(mut self, body: Stmt) -> MethodDecl {
        self.decl.body = Some(body);
        self.decl
    }

    /// Finish without a body.
    pub fn build_abstract(self) -> MethodDecl {
        self.decl
    }
}
