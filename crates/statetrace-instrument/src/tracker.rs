//! Which tracker members the referenced runtime type provides.

use rustc_hash::FxHashSet;
use statetrace_core::{TrackerMember, TypeHash};

/// Name of the runtime tracker type.
pub const DEFAULT_TRACKER_NAME: &str = "LocalStoreTracker";

/// The tracker type and the members the host found on it.
///
/// Every member the pass emits a call to is looked up here first; a missing
/// member turns into a diagnostic instead of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerContract {
    ty: TypeHash,
    members: FxHashSet<TrackerMember>,
}

impl TrackerContract {
    /// A tracker type providing every member.
    pub fn complete(ty: TypeHash) -> Self {
        Self {
            ty,
            members: TrackerMember::all().collect(),
        }
    }

    /// A tracker type providing exactly `members`.
    pub fn with_members(ty: TypeHash, members: impl IntoIterator<Item = TrackerMember>) -> Self {
        Self {
            ty,
            members: members.into_iter().collect(),
        }
    }

    /// A tracker type with no members at all.
    pub fn empty(ty: TypeHash) -> Self {
        Self::with_members(ty, [])
    }

    /// Remove a member.
    pub fn without(mut self, member: TrackerMember) -> Self {
        self.members.remove(&member);
        self
    }

    /// The tracker type; also the type of each activation's tracker slot.
    pub fn tracker_type(&self) -> TypeHash {
        self.ty
    }

    pub fn provides(&self, member: TrackerMember) -> bool {
        self.members.contains(&member)
    }

    /// Whether every member of the contract is present.
    pub fn is_complete(&self) -> bool {
        TrackerMember::all().all(|m| self.members.contains(&m))
    }
}

impl Default for TrackerContract {
    fn default() -> Self {
        Self::complete(TypeHash::from_name(DEFAULT_TRACKER_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statetrace_core::{StoreFamily, ValueCategory};

    #[test]
    fn default_is_complete() {
        let contract = TrackerContract::default();
        assert!(contract.is_complete());
        assert_eq!(
            contract.tracker_type(),
            TypeHash::from_name(DEFAULT_TRACKER_NAME)
        );
    }

    #[test]
    fn without_removes_member() {
        let member = TrackerMember::LogStore {
            family: StoreFamily::Local,
            category: ValueCategory::U32,
        };
        let contract = TrackerContract::default().without(member);
        assert!(!contract.provides(member));
        assert!(contract.provides(TrackerMember::LogReturn));
        assert!(!contract.is_complete());
    }

    #[test]
    fn empty_provides_nothing() {
        let contract = TrackerContract::empty(TypeHash::from_name("T"));
        assert!(TrackerMember::all().all(|m| !contract.provides(m)));
    }
}
