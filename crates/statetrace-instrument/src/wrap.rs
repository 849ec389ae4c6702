//! The shared entry/exit frame around an instrumented body.
//!
//! ```text
//! {
//!   <prologue>
//!   try {
//!     <setup>
//!     <body>
//!   } finally {
//!     <finally>
//!   }
//! }
//! ```
//!
//! The prologue runs outside the protected region, so a prologue check that
//! throws leaves nothing entered and nothing owed. Without finally actions no
//! try region is added. All added statements are hidden sequence points.

use statetrace_core::ir::Stmt;

/// Statements contributed to the frame by one or more aspects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub prologue: Vec<Stmt>,
    pub setup: Vec<Stmt>,
    pub finally: Vec<Stmt>,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.prologue.is_empty() && self.setup.is_empty() && self.finally.is_empty()
    }

    /// Append another contribution after this one.
    pub fn merge(&mut self, other: Frame) {
        self.prologue.extend(other.prologue);
        self.setup.extend(other.setup);
        self.finally.extend(other.finally);
    }
}

/// Wrap `body` in `frame`.
pub fn wrap_body(frame: Frame, body: Stmt) -> Stmt {
    if frame.is_empty() {
        return body;
    }
    let Frame {
        prologue,
        setup,
        finally,
    } = frame;

    let mut inner = setup;
    inner.extend(body.into_stmts());

    let mut stmts = prologue;
    if finally.is_empty() {
        stmts.extend(inner);
    } else {
        stmts.push(Stmt::try_region(
            Stmt::block(inner),
            Vec::new(),
            Some(Stmt::block(finally)),
        ));
    }
    Stmt::block(stmts)
}
