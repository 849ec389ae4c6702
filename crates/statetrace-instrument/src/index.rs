//! Stable indices for tracked entities.
//!
//! Each activation has its own index space:
//!
//! - user locals are numbered `0..N-1` in declaration order; synthesized
//!   locals and the tracker slot get no index
//! - parameters use their ordinal (the receiver is not a parameter);
//!   discards get no index
//! - hoisted fields use their field token plus [`HOISTED_INDEX_BASE`], so the
//!   runtime can tell a field apart from a slot number

use statetrace_core::ir::{LocalKind, MethodDecl};
use statetrace_core::{FieldId, HOISTED_INDEX_BASE, LocalId, ParamId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityIndexer {
    locals: Vec<Option<u32>>,
    params: Vec<Option<u32>>,
}

impl EntityIndexer {
    pub fn new(method: &MethodDecl) -> Self {
        let mut next = 0u32;
        let locals = method
            .locals
            .iter()
            .map(|local| {
                (local.kind == LocalKind::User).then(|| {
                    let index = next;
                    next += 1;
                    index
                })
            })
            .collect();
        let params = method
            .params
            .iter()
            .enumerate()
            .map(|(ordinal, param)| (!param.is_discard).then_some(ordinal as u32))
            .collect();
        Self { locals, params }
    }

    /// Index of a local, or `None` if it is not tracked.
    pub fn local(&self, id: LocalId) -> Option<u32> {
        self.locals.get(id.index() as usize).copied().flatten()
    }

    /// Index of a parameter, or `None` if it is not tracked.
    pub fn param(&self, id: ParamId) -> Option<u32> {
        self.params.get(id.index() as usize).copied().flatten()
    }

    /// Index of a hoisted field.
    pub fn hoisted(field: FieldId) -> u32 {
        field.index().wrapping_add(HOISTED_INDEX_BASE)
    }

}
