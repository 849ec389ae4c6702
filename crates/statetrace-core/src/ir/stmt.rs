//! Statements.

use crate::ids::LocalId;
use crate::span::Span;
use crate::type_hash::TypeHash;

use super::Expr;

/// A statement with an optional sequence point.
///
/// `span == None` marks a hidden sequence point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StmtKind {
    Nop,
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    /// Dispatch on an integer. Cases do not fall through; `break` leaves the switch.
    Switch {
        scrutinee: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Box<Stmt>>,
    },
    Try(Box<TryRegion>),
    /// `throw expr`, or a rethrow inside a catch when `None`.
    Throw(Option<Expr>),
    Return(Option<Expr>),
    Break,
    Continue,
    /// Where the user-visible body begins. State-machine lowering places it in
    /// the initial state; ordinary bodies may omit it.
    EntryPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwitchCase {
    pub value: i128,
    pub body: Stmt,
}

/// A protected region with handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TryRegion {
    pub body: Stmt,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatchClause {
    /// Exception type caught; `None` catches everything.
    pub exception_type: Option<TypeHash>,
    /// Local receiving the exception.
    pub local: Option<LocalId>,
    pub filter: Option<Expr>,
    pub body: Stmt,
}

impl Stmt {
    /// A statement without a sequence point.
    pub fn hidden(kind: StmtKind) -> Self {
        Self { kind, span: None }
    }

    /// A statement at `span`.
    pub fn at(kind: StmtKind, span: Span) -> Self {
        Self {
            kind,
            span: Some(span),
        }
    }

    /// Attach a span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn expr(expr: Expr) -> Self {
        Self::hidden(StmtKind::Expr(expr))
    }

    pub fn block(stmts: Vec<Stmt>) -> Self {
        Self::hidden(StmtKind::Block(stmts))
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::hidden(StmtKind::Return(value))
    }

    pub fn throw(value: Expr) -> Self {
        Self::hidden(StmtKind::Throw(Some(value)))
    }

    pub fn if_then(cond: Expr, then: Stmt, otherwise: Option<Stmt>) -> Self {
        Self::hidden(StmtKind::If {
            cond,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        })
    }

    pub fn while_loop(cond: Expr, body: Stmt) -> Self {
        Self::hidden(StmtKind::While {
            cond,
            body: Box::new(body),
        })
    }

    pub fn switch(scrutinee: Expr, cases: Vec<SwitchCase>, default: Option<Stmt>) -> Self {
        Self::hidden(StmtKind::Switch {
            scrutinee,
            cases,
            default: default.map(Box::new),
        })
    }

    pub fn try_region(body: Stmt, catches: Vec<CatchClause>, finally: Option<Stmt>) -> Self {
        Self::hidden(StmtKind::Try(Box::new(TryRegion {
            body,
            catches,
            finally,
        })))
    }

    pub fn entry_point() -> Self {
        Self::hidden(StmtKind::EntryPoint)
    }

    pub fn nop() -> Self {
        Self::hidden(StmtKind::Nop)
    }

    /// Flatten into a statement list.
    pub fn into_stmts(self) -> Vec<Stmt> {
        match self.kind {
            StmtKind::Block(stmts) if self.span.is_none() => stmts,
            _ => vec![self],
        }
    }
}

impl CatchClause {
    /// `catch (T local) { body }`
    pub fn new(exception_type: Option<TypeHash>, local: Option<LocalId>, body: Stmt) -> Self {
        Self {
            exception_type,
            local,
            filter: None,
            body,
        }
    }

    /// Add a `when (filter)` clause.
    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }
}
