//! Eligibility: which methods are traced and which stores are tracked.
//!
//! ## Methods
//!
//! A method is traced unless it:
//!
//! - has no body
//! - belongs to the tracker type or a type nested in it
//! - is an auto-property or field-like event accessor
//! - is a lambda converted to an expression tree
//! - is a state-machine kickoff stub or iterator `Dispose`
//!
//! A state machine's constructor is not traced itself, but mints the
//! instance's correlation id.
//!
//! ## Stores
//!
//! Only the binding of a user local, a non-discard parameter, or a field
//! hoisted from one of those is tracked. Stores into other fields, array
//! elements, through pointers, and into `this` are not. Ref rebinds are
//! tracked between locals and parameters only.

use statetrace_core::ir::{
    Expr, LocalKind, MethodDecl, MethodFlags, MethodKind, Module, Place, StateMachineInfo,
};
use statetrace_core::{
    FieldId, HoistedFrom, LambdaId, LocalId, MethodId, ParamId, StoreFamily, TrackerMember,
    TypeHash, TypeTable,
};

use crate::index::EntityIndexer;

// ============================================================================
// Methods
// ============================================================================

/// What kind of activation a traced method is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Method {
        method: MethodId,
    },
    /// A lambda or local function; `method` is the top-level user method.
    Lambda {
        method: MethodId,
        lambda: LambdaId,
    },
    /// A state machine's resume routine; `method` is the top-level user method.
    StateMachine {
        method: MethodId,
        lambda: Option<LambdaId>,
        info: StateMachineInfo,
    },
}

/// Why a method is not traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    NoBody,
    TrackerType,
    AutoAccessor,
    ExpressionTree,
    StateMachineKickoff,
    StateMachineDispose,
    FilteredOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Traced(ActivationKind),
    /// Constructor of a state machine; initializes the correlation id field.
    StateMachineConstructor { instance_id: FieldId },
    Excluded(Exclusion),
}

/// Decide how `method` participates in tracing.
pub fn classify_method(method: &MethodDecl, module: &Module) -> Eligibility {
    if method.body.is_none() {
        return Eligibility::Excluded(Exclusion::NoBody);
    }
    if method
        .containing_type
        .is_some_and(|ty| module.types.is_within_tracker(ty))
    {
        return Eligibility::Excluded(Exclusion::TrackerType);
    }
    if method.flags.contains(MethodFlags::AUTO_ACCESSOR) {
        return Eligibility::Excluded(Exclusion::AutoAccessor);
    }
    if method.flags.contains(MethodFlags::EXPRESSION_TREE) {
        return Eligibility::Excluded(Exclusion::ExpressionTree);
    }

    match method.kind {
        MethodKind::Ordinary
        | MethodKind::Constructor
        | MethodKind::StaticConstructor
        | MethodKind::Accessor => Eligibility::Traced(ActivationKind::Method { method: method.id }),
        MethodKind::Lambda { lambda, .. } | MethodKind::LocalFunction { lambda, .. } => {
            Eligibility::Traced(ActivationKind::Lambda {
                method: module.top_level_method(method.id),
                lambda,
            })
        }
        MethodKind::StateMachineResume(info) => {
            let lambda = match module.method(info.kickoff).map(|m| m.kind) {
                Some(MethodKind::Lambda { lambda, .. })
                | Some(MethodKind::LocalFunction { lambda, .. }) => Some(lambda),
                _ => None,
            };
            Eligibility::Traced(ActivationKind::StateMachine {
                method: module.top_level_method(info.kickoff),
                lambda,
                info,
            })
        }
        MethodKind::StateMachineConstructor { instance_id } => {
            Eligibility::StateMachineConstructor { instance_id }
        }
        MethodKind::StateMachineKickoff => Eligibility::Excluded(Exclusion::StateMachineKickoff),
        MethodKind::StateMachineDispose => Eligibility::Excluded(Exclusion::StateMachineDispose),
    }
}

// ============================================================================
// Stores
// ============================================================================

/// An entity whose stores are reported to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedEntity {
    Local {
        id: LocalId,
        index: u32,
    },
    Parameter {
        id: ParamId,
        index: u32,
    },
    HoistedField {
        field: FieldId,
        index: u32,
        origin: HoistedFrom,
    },
}

impl TrackedEntity {
    pub fn index(&self) -> u32 {
        match self {
            TrackedEntity::Local { index, .. }
            | TrackedEntity::Parameter { index, .. }
            | TrackedEntity::HoistedField { index, .. } => *index,
        }
    }

    /// Which store members report this entity.
    pub fn family(&self) -> StoreFamily {
        match self {
            TrackedEntity::Local { .. } => StoreFamily::Local,
            TrackedEntity::Parameter { .. } => StoreFamily::Parameter,
            TrackedEntity::HoistedField { origin, .. } => match origin {
                HoistedFrom::Local => StoreFamily::Local,
                HoistedFrom::Parameter => StoreFamily::Parameter,
            },
        }
    }

    pub fn is_hoisted(&self) -> bool {
        matches!(self, TrackedEntity::HoistedField { .. })
    }
}

/// A tracked store destination and its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTarget {
    pub entity: TrackedEntity,
    pub ty: TypeHash,
}

/// Per-method classification of places.
pub struct StoreClassifier<'a> {
    method: &'a MethodDecl,
    types: &'a TypeTable,
    indexer: &'a EntityIndexer,
}

impl<'a> StoreClassifier<'a> {
    pub fn new(method: &'a MethodDecl, types: &'a TypeTable, indexer: &'a EntityIndexer) -> Self {
        Self {
            method,
            types,
            indexer,
        }
    }

    /// The tracked entity a store into `place` writes, if any.
    pub fn store_target(&self, place: &Place) -> Option<StoreTarget> {
        match place {
            Place::Local(id) => {
                let decl = self.method.local(*id)?;
                if decl.kind != LocalKind::User {
                    return None;
                }
                Some(StoreTarget {
                    entity: TrackedEntity::Local {
                        id: *id,
                        index: self.indexer.local(*id)?,
                    },
                    ty: decl.ty,
                })
            }
            Place::Param(id) => {
                let decl = self.method.param(*id)?;
                Some(StoreTarget {
                    entity: TrackedEntity::Parameter {
                        id: *id,
                        index: self.indexer.param(*id)?,
                    },
                    ty: decl.ty,
                })
            }
            Place::Field { receiver, field } => {
                let def = self.types.field(*field)?;
                let origin = def.hoisted?;
                if def.is_ref || !receiver.is_pure_load() {
                    return None;
                }
                Some(StoreTarget {
                    entity: TrackedEntity::HoistedField {
                        field: *field,
                        index: EntityIndexer::hoisted(*field),
                        origin,
                    },
                    ty: def.ty,
                })
            }
            Place::This | Place::Element { .. } | Place::Deref(_) => None,
        }
    }

    /// Type of a field receiver that a store must read before its value.
    ///
    /// A local or parameter holding a reference can be rebound while the
    /// stored value is evaluated. `this` and value-type receivers name a
    /// fixed location.
    pub fn rebindable_receiver(&self, receiver: &Expr) -> Option<TypeHash> {
        let ty = match receiver {
            Expr::Load(Place::Local(id)) => self.method.local(*id)?.ty,
            Expr::Load(Place::Param(id)) => self.method.param(*id)?.ty,
            _ => return None,
        };
        match self.types.get(ty) {
            Some(def) if def.is_value_type() => None,
            _ => Some(ty),
        }
    }

    /// The alias member and `(source, target)` indices for `target = ref source`.
    pub fn alias(&self, target: &Place, source: &Place) -> Option<(TrackerMember, u32, u32)> {
        let target = self.store_target(target)?.entity;
        let source = self.store_target(source)?.entity;
        match (source, target) {
            (TrackedEntity::Local { index: s, .. }, TrackedEntity::Local { index: t, .. }) => {
                Some((TrackerMember::LogLocalStoreLocalAlias, s, t))
            }
            (TrackedEntity::Parameter { index: s, .. }, TrackedEntity::Local { index: t, .. }) => {
                Some((TrackerMember::LogLocalStoreParameterAlias, s, t))
            }
            (
                TrackedEntity::Parameter { index: s, .. },
                TrackedEntity::Parameter { index: t, .. },
            ) => Some((TrackerMember::LogParameterStoreParameterAlias, s, t)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statetrace_core::ir::{Expr, MethodBuilder, StateMachineKind, Stmt};
    use statetrace_core::{FieldDef, TypeDef, TypeFlags, primitives};

    fn module_with(methods: Vec<MethodDecl>) -> Module {
        let mut module = Module::new(TypeTable::new());
        for m in methods {
            module.add_method(m);
        }
        module
    }

    #[test]
    fn ordinary_method_is_traced() {
        let method = MethodBuilder::new(MethodId::new(1), "F").build(Stmt::nop());
        let module = module_with(vec![method.clone()]);
        assert_eq!(
            classify_method(&method, &module),
            Eligibility::Traced(ActivationKind::Method {
                method: MethodId::new(1)
            })
        );
    }

    #[test]
    fn exclusions() {
        let module = module_with(vec![]);
        let abstract_method = MethodBuilder::new(MethodId::new(1), "A").build_abstract();
        assert_eq!(
            classify_method(&abstract_method, &module),
            Eligibility::Excluded(Exclusion::NoBody)
        );

        let accessor = MethodBuilder::new(MethodId::new(2), "get_P")
            .kind(MethodKind::Accessor)
            .flags(MethodFlags::AUTO_ACCESSOR)
            .build(Stmt::nop());
        assert_eq!(
            classify_method(&accessor, &module),
            Eligibility::Excluded(Exclusion::AutoAccessor)
        );

        let tree = MethodBuilder::new(MethodId::new(3), "<F>b__0")
            .flags(MethodFlags::EXPRESSION_TREE)
            .build(Stmt::nop());
        assert_eq!(
            classify_method(&tree, &module),
            Eligibility::Excluded(Exclusion::ExpressionTree)
        );

        let kickoff = MethodBuilder::new(MethodId::new(4), "G")
            .kind(MethodKind::StateMachineKickoff)
            .build(Stmt::nop());
        assert_eq!(
            classify_method(&kickoff, &module),
            Eligibility::Excluded(Exclusion::StateMachineKickoff)
        );
    }

    #[test]
    fn tracker_type_and_nested_types_excluded() {
        let mut types = TypeTable::new();
        let tracker = TypeDef::ref_struct("LocalStoreTracker", 8, 8).with_flags(TypeFlags::TRACKER);
        let nested = TypeDef::class("Cache").nested_in(&tracker);
        let tracker_hash = types.register(tracker);
        let nested_hash = types.register(nested);
        let module = Module::new(types);

        for ty in [tracker_hash, nested_hash] {
            let method = MethodBuilder::new(MethodId::new(1), "M")
                .in_type(ty)
                .build(Stmt::nop());
            assert_eq!(
                classify_method(&method, &module),
                Eligibility::Excluded(Exclusion::TrackerType)
            );
        }
    }

    #[test]
    fn nested_lambda_reports_top_level_method() {
        let outer = MethodBuilder::new(MethodId::new(1), "F").build(Stmt::nop());
        let lambda = MethodBuilder::new(MethodId::new(2), "<F>b__0")
            .kind(MethodKind::Lambda {
                containing: MethodId::new(1),
                lambda: LambdaId::new(0),
            })
            .build(Stmt::nop());
        let inner = MethodBuilder::new(MethodId::new(3), "<F>b__1")
            .kind(MethodKind::LocalFunction {
                containing: MethodId::new(2),
                lambda: LambdaId::new(1),
            })
            .build(Stmt::nop());
        let module = module_with(vec![outer, lambda, inner.clone()]);

        assert_eq!(
            classify_method(&inner, &module),
            Eligibility::Traced(ActivationKind::Lambda {
                method: MethodId::new(1),
                lambda: LambdaId::new(1),
            })
        );
    }

    #[test]
    fn async_lambda_state_machine() {
        let outer = MethodBuilder::new(MethodId::new(1), "F").build(Stmt::nop());
        let lambda = MethodBuilder::new(MethodId::new(2), "<F>b__0")
            .kind(MethodKind::Lambda {
                containing: MethodId::new(1),
                lambda: LambdaId::new(4),
            })
            .build(Stmt::nop());
        let info = StateMachineInfo {
            kind: StateMachineKind::Async,
            kickoff: MethodId::new(2),
            instance_id: FieldId::new(10),
            dispose_mode: None,
        };
        let resume = MethodBuilder::new(MethodId::new(3), "MoveNext")
            .kind(MethodKind::StateMachineResume(info))
            .build(Stmt::nop());
        let module = module_with(vec![outer, lambda, resume.clone()]);

        assert_eq!(
            classify_method(&resume, &module),
            Eligibility::Traced(ActivationKind::StateMachine {
                method: MethodId::new(1),
                lambda: Some(LambdaId::new(4)),
                info,
            })
        );
    }

    #[test]
    fn store_targets() {
        let mut types = TypeTable::new();
        types.register(
            TypeDef::class("<>c__DisplayClass0_0")
                .with_field(FieldDef::hoisted(
                    FieldId::new(5),
                    "a",
                    primitives::INT32,
                    HoistedFrom::Local,
                ))
                .with_field(FieldDef::hoisted(
                    FieldId::new(6),
                    "p",
                    primitives::INT32,
                    HoistedFrom::Parameter,
                ))
                .with_field(FieldDef::new(FieldId::new(7), "x", primitives::INT32)),
        );
        let mut b = MethodBuilder::new(MethodId::new(1), "F");
        let p = b.param("p", primitives::INT32);
        let a = b.local("a", primitives::INT64);
        let t = b.synthesized("$t", primitives::INT32);
        let method = b.build(Stmt::nop());
        let indexer = EntityIndexer::new(&method);
        let classifier = StoreClassifier::new(&method, &types, &indexer);

        let local = classifier.store_target(&Place::Local(a)).unwrap();
        assert_eq!(local.entity, TrackedEntity::Local { id: a, index: 0 });
        assert_eq!(local.ty, primitives::INT64);
        assert!(classifier.store_target(&Place::Local(t)).is_none());

        let param = classifier.store_target(&Place::Param(p)).unwrap();
        assert_eq!(param.entity.family(), StoreFamily::Parameter);

        let hoisted = classifier
            .store_target(&Place::this_field(FieldId::new(5)))
            .unwrap();
        assert_eq!(hoisted.entity.index(), 0x10005);
        assert_eq!(hoisted.entity.family(), StoreFamily::Local);
        let hoisted_param = classifier
            .store_target(&Place::this_field(FieldId::new(6)))
            .unwrap();
        assert_eq!(hoisted_param.entity.family(), StoreFamily::Parameter);

        assert!(classifier.store_target(&Place::this_field(FieldId::new(7))).is_none());
        assert!(classifier.store_target(&Place::This).is_none());
        assert!(
            classifier
                .store_target(&Place::element(Expr::local(a), Expr::int(0)))
                .is_none()
        );
        assert!(
            classifier
                .store_target(&Place::deref(Expr::local(a)))
                .is_none()
        );
    }

    #[test]
    fn alias_members() {
        let types = TypeTable::new();
        let mut b = MethodBuilder::new(MethodId::new(1), "F");
        let p = b.param_with("p", primitives::INT32, statetrace_core::ir::RefKind::Ref);
        let q = b.param_with("q", primitives::INT32, statetrace_core::ir::RefKind::Ref);
        let a = b.local("a", primitives::INT32);
        let r = b.ref_local("r", primitives::INT32);
        let method = b.build(Stmt::nop());
        let indexer = EntityIndexer::new(&method);
        let classifier = StoreClassifier::new(&method, &types, &indexer);

        assert_eq!(
            classifier.alias(&Place::Local(r), &Place::Local(a)),
            Some((TrackerMember::LogLocalStoreLocalAlias, 0, 1))
        );
        assert_eq!(
            classifier.alias(&Place::Local(r), &Place::Param(q)),
            Some((TrackerMember::LogLocalStoreParameterAlias, 1, 1))
        );
        assert_eq!(
            classifier.alias(&Place::Param(p), &Place::Param(q)),
            Some((TrackerMember::LogParameterStoreParameterAlias, 1, 0))
        );
        assert_eq!(classifier.alias(&Place::Param(p), &Place::Local(a)), None);
    }
}
