//! Per-activation locals added by the pass.
//!
//! Every traced body gets one tracker slot holding the handle returned by
//! the entry call. All later tracker calls take the slot by reference. State
//! machines re-derive the slot at the top of each resume instead of hoisting
//! it, so the slot is always an ordinary local of the resume routine.
//!
//! Temporaries allocated while a body is being rewritten are buffered in a
//! [`TempAllocator`] and appended when the rewrite is done, so the method's
//! declaration can stay borrowed for the duration of the rewrite.

use statetrace_core::ir::{Arg, Expr, LocalDecl, LocalKind, MethodDecl, Place};
use statetrace_core::{LocalId, TypeHash};

/// Name of the tracker slot local.
pub const TRACKER_SLOT_NAME: &str = "$tracker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSlot {
    local: LocalId,
    ty: TypeHash,
}

impl TrackerSlot {
    /// Add the tracker slot to `method`.
    pub fn allocate(method: &mut MethodDecl, ty: TypeHash) -> Self {
        let local = method.add_local(LocalDecl {
            name: TRACKER_SLOT_NAME.into(),
            ty,
            kind: LocalKind::Tracker,
            is_ref: false,
        });
        Self { local, ty }
    }

    pub fn local(&self) -> LocalId {
        self.local
    }

    pub fn ty(&self) -> TypeHash {
        self.ty
    }

    pub fn place(&self) -> Place {
        Place::Local(self.local)
    }

    /// The slot passed by reference, as a call receiver.
    pub fn by_ref(&self) -> Arg {
        Arg::by_ref(self.place())
    }
}

/// Add a synthesized local to `method` outright.
pub fn allocate_synthesized(method: &mut MethodDecl, name: &str, ty: TypeHash) -> LocalId {
    method.add_local(LocalDecl {
        name: name.into(),
        ty,
        kind: LocalKind::Synthesized,
        is_ref: false,
    })
}

/// Hands out ids for temporaries before they are declared.
#[derive(Debug)]
pub struct TempAllocator {
    base: u32,
    pending: Vec<LocalDecl>,
}

impl TempAllocator {
    pub fn new(method: &MethodDecl) -> Self {
        Self {
            base: method.locals.len() as u32,
            pending: Vec::new(),
        }
    }

    /// Reserve a temporary of type `ty`.
    pub fn temp(&mut self, ty: TypeHash) -> LocalId {
        let id = LocalId::new(self.base + self.pending.len() as u32);
        self.pending.push(LocalDecl {
            name: format!("$temp{}", self.pending.len()),
            ty,
            kind: LocalKind::Synthesized,
            is_ref: false,
        });
        id
    }

    /// Reserve a temporary and build the store that fills it with `value`.
    pub fn spill(&mut self, ty: TypeHash, value: Expr) -> (Expr, LocalId) {
        let id = self.temp(ty);
        (Expr::assign(Place::Local(id), value), id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Declare the reserved temporaries on `method`.
    pub fn commit(self, method: &mut MethodDecl) {
        debug_assert_eq!(method.locals.len() as u32, self.base);
        for decl in self.pending {
            method.add_local(decl);
        }
    }
}
