//! Diagnostics produced by the pass.
//!
//! Two things can go wrong while instrumenting a method:
//!
//! - a tracker member the method needs is missing from the runtime type
//!   ([`Diagnostic::MissingRuntimeMember`]); the call is not emitted and the
//!   rest of the method is still instrumented
//! - the method's IR references something that does not exist
//!   ([`Diagnostic::MalformedMethod`]); that method is left untouched
//!
//! Missing-member diagnostics are reported once per (span, member).

use rustc_hash::FxHashSet;
use statetrace_core::{IrError, MethodId, Span, TrackerMember};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    /// A required tracker member is absent.
    #[error("at {span}: missing runtime member '{member}' on the tracker type")]
    MissingRuntimeMember {
        member: TrackerMember,
        span: Span,
        method: MethodId,
    },

    /// The method could not be instrumented.
    #[error("method not instrumented: {0}")]
    MalformedMethod(#[from] IrError),
}

impl Diagnostic {
    /// The span this diagnostic is attached to, if any.
    pub fn span(&self) -> Option<Span> {
        match self {
            Diagnostic::MissingRuntimeMember { span, .. } => Some(*span),
            Diagnostic::MalformedMethod(_) => None,
        }
    }

    /// The method the diagnostic belongs to.
    pub fn method(&self) -> MethodId {
        match self {
            Diagnostic::MissingRuntimeMember { method, .. } => *method,
            Diagnostic::MalformedMethod(err) => err.method(),
        }
    }
}

/// Collects diagnostics, dropping repeats of the same missing member at the same span.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    items: Vec<Diagnostic>,
    reported: FxHashSet<(Span, TrackerMember)>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a missing member. Returns `false` if it was already reported at `span`.
    pub fn missing_member(&mut self, method: MethodId, member: TrackerMember, span: Span) -> bool {
        if !self.reported.insert((span, member)) {
            return false;
        }
        tracing::debug!(%member, %span, "tracker member missing");
        self.items.push(Diagnostic::MissingRuntimeMember {
            member,
            span,
            method,
        });
        true
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
