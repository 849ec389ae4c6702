//! Building tracker calls.
//!
//! Every call is checked against the [`TrackerContract`] before it is built.
//! A missing member produces one diagnostic per (span, member) and no call;
//! the caller carries on without it.
//!
//! Entry calls assign the activation's tracker slot. Every other call takes
//! the slot by reference as its receiver. When the activation has a dispose
//! guard, each call is wrapped in `when($active, ...)`.

use statetrace_core::ir::{Arg, Call, CallTarget, Conversion, Expr, Place, Stmt, UnaryOp};
use statetrace_core::{FieldId, LocalId, MethodId, Span, TrackerMember, TypeHash, TypeTable, primitives};

use crate::classify::{ActivationKind, StoreTarget};
use crate::diagnostics::DiagnosticBag;
use crate::overload::{StorePlan, ValueConversion, resolve_store};
use crate::slot::TrackerSlot;
use crate::stats::InstrumentationStats;
use crate::tracker::TrackerContract;

/// A store that resolved to an available overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedStore {
    member: TrackerMember,
    shape: StoreShape,
    index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreShape {
    Scalar {
        conversion: ValueConversion,
        pointer: bool,
    },
    Unmanaged(TypeHash),
}

impl PreparedStore {
    pub fn member(&self) -> TrackerMember {
        self.member
    }
}

pub struct CallSynthesizer<'a> {
    contract: &'a TrackerContract,
    types: &'a TypeTable,
    method: MethodId,
    slot: TrackerSlot,
    active: Option<LocalId>,
    diagnostics: &'a mut DiagnosticBag,
    stats: &'a mut InstrumentationStats,
}

impl<'a> CallSynthesizer<'a> {
    pub fn new(
        contract: &'a TrackerContract,
        types: &'a TypeTable,
        method: MethodId,
        slot: TrackerSlot,
        diagnostics: &'a mut DiagnosticBag,
        stats: &'a mut InstrumentationStats,
    ) -> Self {
        Self {
            contract,
            types,
            method,
            slot,
            active: None,
            diagnostics,
            stats,
        }
    }

    /// Guard every call on the boolean local `active`.
    pub fn with_guard(mut self, active: LocalId) -> Self {
        self.active = Some(active);
        self
    }

    fn require(&mut self, member: TrackerMember, span: Span) -> bool {
        if self.contract.provides(member) {
            return true;
        }
        self.diagnostics.missing_member(self.method, member, span);
        false
    }

    fn guard(&self, call: Expr) -> Expr {
        match self.active {
            Some(active) => Expr::when(Expr::local(active), call),
            None => call,
        }
    }

    fn instance_call(&self, member: TrackerMember, args: Vec<Expr>) -> Expr {
        self.guard(Expr::from_call(Call {
            target: CallTarget::Tracker(member),
            receiver: Some(self.slot.by_ref()),
            args: args.into_iter().map(Arg::Value).collect(),
            ret: primitives::VOID,
        }))
    }

    // ==========================================================================
    // Entry and exit
    // ==========================================================================

    /// `$tracker = Tracker::Log*Entry(...)`
    pub fn entry(&mut self, activation: &ActivationKind, span: Span) -> Option<Stmt> {
        let (member, args) = match *activation {
            ActivationKind::Method { method } => {
                (TrackerMember::LogMethodEntry, vec![Expr::u32(method.index())])
            }
            ActivationKind::Lambda { method, lambda } => (
                TrackerMember::LogLambdaEntry,
                vec![Expr::u32(method.index()), Expr::u32(lambda.index())],
            ),
            ActivationKind::StateMachine {
                method,
                lambda,
                info,
            } => {
                let instance = Expr::Load(Place::this_field(info.instance_id));
                match lambda {
                    None => (
                        TrackerMember::LogStateMachineMethodEntry,
                        vec![Expr::u32(method.index()), instance],
                    ),
                    Some(lambda) => (
                        TrackerMember::LogStateMachineLambdaEntry,
                        vec![
                            Expr::u32(method.index()),
                            Expr::u32(lambda.index()),
                            instance,
                        ],
                    ),
                }
            }
        };
        if !self.require(member, span) {
            return None;
        }
        self.stats.entries += 1;
        tracing::trace!(method = %self.method, %member, "entry call");
        let call = Expr::from_call(Call {
            target: CallTarget::Tracker(member),
            receiver: None,
            args: args.into_iter().map(Arg::Value).collect(),
            ret: self.slot.ty(),
        });
        Some(Stmt::expr(self.guard(Expr::assign(self.slot.place(), call))))
    }

    /// `$tracker.LogReturn()`
    pub fn ret(&mut self, span: Span) -> Option<Stmt> {
        if !self.require(TrackerMember::LogReturn, span) {
            return None;
        }
        self.stats.returns += 1;
        Some(Stmt::expr(
            self.instance_call(TrackerMember::LogReturn, Vec::new()),
        ))
    }

    // ==========================================================================
    // Stores
    // ==========================================================================

    /// Resolve the overload for a store into `target`.
    ///
    /// Returns `None` when the type has no loggable form or the overload is
    /// missing from the tracker type.
    pub fn prepare_store(&mut self, target: &StoreTarget, span: Span) -> Option<PreparedStore> {
        let plan = resolve_store(target.ty, self.types);
        let family = target.entity.family();
        let (member, shape) = match plan {
            StorePlan::Scalar {
                category,
                conversion,
            } => (
                TrackerMember::LogStore { family, category },
                StoreShape::Scalar {
                    conversion,
                    pointer: plan.uses_pointer(),
                },
            ),
            StorePlan::Unmanaged { ty } => (
                TrackerMember::LogStoreUnmanaged { family },
                StoreShape::Unmanaged(ty),
            ),
            StorePlan::Skip(reason) => {
                self.stats.skipped_stores += 1;
                tracing::debug!(
                    method = %self.method,
                    ty = %self.types.name_of(target.ty),
                    ?reason,
                    "store not tracked"
                );
                return None;
            }
        };
        if !self.require(member, span) {
            return None;
        }
        Some(PreparedStore {
            member,
            shape,
            index: target.entity.index(),
        })
    }

    /// The store call, reading the logged value from `value`.
    pub fn emit_store(&mut self, store: PreparedStore, value: Place) -> Expr {
        self.stats.stores += 1;
        tracing::trace!(method = %self.method, member = %store.member, index = store.index, "store call");
        let index = Expr::u32(store.index);
        let args = match store.shape {
            StoreShape::Scalar {
                conversion,
                pointer,
            } => {
                if pointer {
                    self.stats.verification_warnings += 1;
                }
                vec![convert_value(conversion, value), index]
            }
            StoreShape::Unmanaged(ty) => {
                self.stats.verification_warnings += 1;
                vec![Expr::AddressOf(value), Expr::SizeOf(ty), index]
            }
        };
        self.instance_call(store.member, args)
    }

    /// Resolve and build a store call in one step.
    pub fn store(&mut self, target: &StoreTarget, value: Place, span: Span) -> Option<Expr> {
        let store = self.prepare_store(target, span)?;
        Some(self.emit_store(store, value))
    }

    /// `$tracker.Log*Alias(source, target)`
    pub fn alias(
        &mut self,
        member: TrackerMember,
        source: u32,
        target: u32,
        span: Span,
    ) -> Option<Expr> {
        if !self.require(member, span) {
            return None;
        }
        self.stats.aliases += 1;
        tracing::trace!(method = %self.method, %member, source, target, "alias call");
        Some(self.instance_call(member, vec![Expr::u32(source), Expr::u32(target)]))
    }
}

fn convert_value(conversion: ValueConversion, place: Place) -> Expr {
    match conversion {
        ValueConversion::None => Expr::Load(place),
        ValueConversion::Reinterpret(kind) => {
            Expr::convert(Conversion::Reinterpret(kind), Expr::Load(place))
        }
        ValueConversion::Box(ty) => Expr::convert(Conversion::Box(ty), Expr::Load(place)),
        ValueConversion::ToString(ty) => Expr::from_call(Call {
            target: CallTarget::ToString {
                constrained: Some(ty),
            },
            receiver: Some(Arg::by_ref(place)),
            args: Vec::new(),
            ret: primitives::STRING,
        }),
    }
}

/// `this.<id> = Tracker::GetNewStateMachineInstanceId()`, for a state
/// machine's constructor.
pub fn mint_instance_id(
    contract: &TrackerContract,
    method: MethodId,
    field: FieldId,
    span: Span,
    diagnostics: &mut DiagnosticBag,
    stats: &mut InstrumentationStats,
) -> Option<Stmt> {
    let member = TrackerMember::GetNewStateMachineInstanceId;
    if !contract.provides(member) {
        diagnostics.missing_member(method, member, span);
        return None;
    }
    stats.instance_ids += 1;
    let call = Expr::from_call(Call {
        target: CallTarget::Tracker(member),
        receiver: None,
        args: Vec::new(),
        ret: primitives::UINT64,
    });
    Some(Stmt::expr(Expr::assign(Place::this_field(field), call)))
}

/// `$active = !this.<disposeMode>`
pub fn dispose_guard(active: LocalId, dispose_mode: FieldId) -> Stmt {
    Stmt::expr(Expr::assign(
        Place::Local(active),
        Expr::unary(UnaryOp::Not, Expr::Load(Place::this_field(dispose_mode))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TrackedEntity;
    use statetrace_core::ir::{MethodBuilder, Module, StateMachineInfo, StateMachineKind, StmtKind};
    use statetrace_core::{IrPrinter, LambdaId, StoreFamily, TypeDef, ValueCategory};

    struct Fixture {
        module: Module,
        contract: TrackerContract,
        diagnostics: DiagnosticBag,
        stats: InstrumentationStats,
        slot: TrackerSlot,
    }

    fn fixture(contract: TrackerContract) -> Fixture {
        let mut types = TypeTable::new();
        types.register(TypeDef::ref_struct("LocalStoreTracker", 8, 8));
        types.register(TypeDef::structure("Point", 8, 4));
        let mut b = MethodBuilder::new(MethodId::new(1), "F");
        b.local("a", primitives::INT8);
        let mut method = b.build(Stmt::nop());
        let slot = TrackerSlot::allocate(&mut method, contract.tracker_type());
        let mut module = Module::new(types);
        module.add_method(method);
        Fixture {
            module,
            contract,
            diagnostics: DiagnosticBag::new(),
            stats: InstrumentationStats::default(),
            slot,
        }
    }

    fn render(module: &Module, expr: &Expr) -> String {
        let method = module.method(MethodId::new(1)).unwrap();
        IrPrinter::new(module, method).expr(expr)
    }

    fn local_target(ty: TypeHash) -> StoreTarget {
        StoreTarget {
            entity: TrackedEntity::Local {
                id: LocalId::new(0),
                index: 0,
            },
            ty,
        }
    }

    #[test]
    fn signed_store_reinterprets() {
        let mut fx = fixture(TrackerContract::default());
        let mut synth = CallSynthesizer::new(
            &fx.contract,
            &fx.module.types,
            MethodId::new(1),
            fx.slot,
            &mut fx.diagnostics,
            &mut fx.stats,
        );
        let call = synth
            .store(
                &local_target(primitives::INT8),
                Place::Local(LocalId::new(0)),
                Span::point(1, 1),
            )
            .unwrap();
        assert_eq!(
            render(&fx.module, &call),
            "$tracker.LogLocalStore<u8>(reinterpret<uint8>(a), 0u32)"
        );
        assert_eq!(fx.stats.stores, 1);
    }

    #[test]
    fn unmanaged_store_passes_address_and_size() {
        let mut fx = fixture(TrackerContract::default());
        let point = TypeHash::from_name("Point");
        let mut synth = CallSynthesizer::new(
            &fx.contract,
            &fx.module.types,
            MethodId::new(1),
            fx.slot,
            &mut fx.diagnostics,
            &mut fx.stats,
        );
        let call = synth
            .store(&local_target(point), Place::Local(LocalId::new(0)), Span::point(1, 1))
            .unwrap();
        assert_eq!(
            render(&fx.module, &call),
            "$tracker.LogLocalStoreUnmanaged(&a, sizeof(Point), 0u32)"
        );
        assert_eq!(fx.stats.verification_warnings, 1);
    }

    #[test]
    fn missing_overload_reports_once() {
        let member = TrackerMember::LogStore {
            family: StoreFamily::Local,
            category: ValueCategory::U8,
        };
        let mut fx = fixture(TrackerContract::default().without(member));
        let mut synth = CallSynthesizer::new(
            &fx.contract,
            &fx.module.types,
            MethodId::new(1),
            fx.slot,
            &mut fx.diagnostics,
            &mut fx.stats,
        );
        let target = local_target(primitives::INT8);
        let span = Span::new(3, 5, 4);
        assert!(synth.store(&target, Place::Local(LocalId::new(0)), span).is_none());
        assert!(synth.store(&target, Place::Local(LocalId::new(0)), span).is_none());
        assert_eq!(fx.diagnostics.len(), 1);
        assert_eq!(fx.stats.stores, 0);
    }

    #[test]
    fn state_machine_lambda_entry() {
        let mut fx = fixture(TrackerContract::default());
        let info = StateMachineInfo {
            kind: StateMachineKind::Async,
            kickoff: MethodId::new(2),
            instance_id: FieldId::new(9),
            dispose_mode: None,
        };
        let mut synth = CallSynthesizer::new(
            &fx.contract,
            &fx.module.types,
            MethodId::new(1),
            fx.slot,
            &mut fx.diagnostics,
            &mut fx.stats,
        );
        let stmt = synth
            .entry(
                &ActivationKind::StateMachine {
                    method: MethodId::new(1),
                    lambda: Some(LambdaId::new(2)),
                    info,
                },
                Span::point(1, 1),
            )
            .unwrap();
        let StmtKind::Expr(expr) = stmt.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(
            render(&fx.module, &expr),
            "$tracker = Tracker::LogStateMachineLambdaEntry(1u32, 2u32, this.f9)"
        );
    }

    #[test]
    fn guarded_calls() {
        let mut fx = fixture(TrackerContract::default());
        let active = LocalId::new(0);
        let mut synth = CallSynthesizer::new(
            &fx.contract,
            &fx.module.types,
            MethodId::new(1),
            fx.slot,
            &mut fx.diagnostics,
            &mut fx.stats,
        )
        .with_guard(active);
        let stmt = synth.ret(Span::point(1, 1)).unwrap();
        let StmtKind::Expr(expr) = stmt.kind else {
            panic!("expected expression statement");
        };
        assert_eq!(render(&fx.module, &expr), "when(a, $tracker.LogReturn())");
    }

    #[test]
    fn instance_id_requires_member() {
        let contract =
            TrackerContract::default().without(TrackerMember::GetNewStateMachineInstanceId);
        let mut diagnostics = DiagnosticBag::new();
        let mut stats = InstrumentationStats::default();
        let stmt = mint_instance_id(
            &contract,
            MethodId::new(1),
            FieldId::new(1),
            Span::point(2, 2),
            &mut diagnostics,
            &mut stats,
        );
        assert!(stmt.is_none());
        assert_eq!(diagnostics.len(), 1);

        let stmt = mint_instance_id(
            &TrackerContract::default(),
            MethodId::new(1),
            FieldId::new(1),
            Span::point(2, 2),
            &mut diagnostics,
            &mut stats,
        );
        assert!(stmt.is_some());
        assert_eq!(stats.instance_ids, 1);
    }
}
