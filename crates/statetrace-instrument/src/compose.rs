//! Composition of instrumentation kinds around one body.
//!
//! Each enabled kind is an [`Aspect`]. Aspects run in a fixed order and each
//! may rewrite the body and contribute statements to one shared [`Frame`]:
//!
//! | order | aspect                  | prologue                       | setup (in try)          | finally       |
//! |-------|-------------------------|--------------------------------|-------------------------|---------------|
//! | 1     | [`CancellationAspect`]  | `ThrowIfCancellationRequested` |                         |               |
//! | 2     | [`StackProbeAspect`]    | `EnsureSufficientExecutionStack` |                       |               |
//! | 3     | [`TracingAspect`]       | `$tracker = Log*Entry(..)`     |                         | `LogReturn()` |
//! | 4     | [`CoverageAspect`]      |                                | `CreateCoveragePayload` |               |
//!
//! Because contributions are concatenated in this order, the entry call
//! always follows the checks and precedes any other setup, and every finally
//! action shares the single outer try/finally.

use statetrace_core::ir::{
    Call, CallTarget, Expr, Intrinsic, MethodDecl, MethodFlags, Place, RefKind, Stmt,
};
use statetrace_core::{HoistedFrom, ParamId, TypeFlags, TypeTable, primitives};

use crate::classify::{ActivationKind, Eligibility, Exclusion, StoreClassifier};
use crate::config::{InstrumentationConfig, InstrumentationKinds};
use crate::diagnostics::DiagnosticBag;
use crate::index::EntityIndexer;
use crate::rewrite::BodyRewriter;
use crate::slot::{TempAllocator, TrackerSlot, allocate_synthesized};
use crate::stats::InstrumentationStats;
use crate::synth::{CallSynthesizer, dispose_guard, mint_instance_id};
use crate::wrap::{Frame, wrap_body};

/// Name of the local holding the dispose guard.
pub const ACTIVE_GUARD_NAME: &str = "$active";

/// Everything an aspect can see and change while instrumenting one method.
pub struct MethodContext<'a> {
    /// The method; its body has been taken out and is passed separately.
    pub method: &'a mut MethodDecl,
    pub types: &'a TypeTable,
    pub eligibility: Eligibility,
    pub config: &'a InstrumentationConfig,
    pub diagnostics: &'a mut DiagnosticBag,
    pub stats: &'a mut InstrumentationStats,
}

/// One instrumentation kind's contribution to a method.
pub trait Aspect {
    fn kind(&self) -> InstrumentationKinds;

    /// Rewrite `body` and return this aspect's part of the frame, or `None`
    /// if the aspect does not apply to the method.
    fn apply(&self, cx: &mut MethodContext<'_>, body: &mut Stmt) -> Option<Frame>;
}

fn intrinsic(intrinsic: Intrinsic) -> Stmt {
    Stmt::expr(Expr::from_call(Call {
        target: CallTarget::Intrinsic(intrinsic),
        receiver: None,
        args: Vec::new(),
        ret: primitives::VOID,
    }))
}

/// Whether prologue checks belong in a method at all.
fn has_runtime_body(eligibility: Eligibility) -> bool {
    !matches!(
        eligibility,
        Eligibility::Excluded(
            Exclusion::NoBody
                | Exclusion::TrackerType
                | Exclusion::ExpressionTree
                | Exclusion::FilteredOut
        )
    )
}

// ============================================================================
// Sibling kinds
// ============================================================================

/// Checks the module's cancellation token on entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancellationAspect;

impl Aspect for CancellationAspect {
    fn kind(&self) -> InstrumentationKinds {
        InstrumentationKinds::MODULE_CANCELLATION
    }

    fn apply(&self, cx: &mut MethodContext<'_>, _body: &mut Stmt) -> Option<Frame> {
        has_runtime_body(cx.eligibility).then(|| Frame {
            prologue: vec![intrinsic(Intrinsic::ThrowIfCancellationRequested)],
            ..Frame::default()
        })
    }
}

/// Probes the remaining stack on entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackProbeAspect;

impl Aspect for StackProbeAspect {
    fn kind(&self) -> InstrumentationKinds {
        InstrumentationKinds::STACK_OVERFLOW_PROBING
    }

    fn apply(&self, cx: &mut MethodContext<'_>, _body: &mut Stmt) -> Option<Frame> {
        has_runtime_body(cx.eligibility).then(|| Frame {
            prologue: vec![intrinsic(Intrinsic::EnsureSufficientExecutionStack)],
            ..Frame::default()
        })
    }
}

/// Creates the method's coverage payload inside the protected region.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageAspect;

impl Aspect for CoverageAspect {
    fn kind(&self) -> InstrumentationKinds {
        InstrumentationKinds::TEST_COVERAGE
    }

    fn apply(&self, cx: &mut MethodContext<'_>, _body: &mut Stmt) -> Option<Frame> {
        if !matches!(cx.eligibility, Eligibility::Traced(_)) {
            return None;
        }
        let method = &*cx.method;
        if method
            .flags
            .intersects(MethodFlags::EXCLUDE_FROM_COVERAGE | MethodFlags::IMPLICIT)
        {
            return None;
        }
        let type_excluded = method
            .containing_type
            .and_then(|ty| cx.types.get(ty))
            .is_some_and(|def| def.flags.contains(TypeFlags::EXCLUDE_FROM_COVERAGE));
        if type_excluded {
            return None;
        }
        Some(Frame {
            setup: vec![intrinsic(Intrinsic::CreateCoveragePayload { method: method.id })],
            ..Frame::default()
        })
    }
}

// ============================================================================
// Local-state tracing
// ============================================================================

/// Local-state tracing: entry, stores, aliases and return.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAspect;

impl TracingAspect {
    /// Places logged as parameter snapshots for this activation.
    fn snapshot_places(cx: &MethodContext<'_>, activation: &ActivationKind) -> Vec<Place> {
        if !cx.config.snapshot_parameters {
            return Vec::new();
        }
        match activation {
            ActivationKind::StateMachine { .. } => {
                // Parameters of a state machine live in hoisted fields.
                let Some(def) = cx.method.containing_type.and_then(|ty| cx.types.get(ty)) else {
                    return Vec::new();
                };
                def.fields
                    .iter()
                    .filter(|f| f.hoisted == Some(HoistedFrom::Parameter) && !f.is_ref)
                    .map(|f| Place::this_field(f.id))
                    .collect()
            }
            _ => cx
                .method
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| !p.is_discard && p.ref_kind != RefKind::Out)
                .map(|(i, _)| Place::Param(ParamId::new(i as u32)))
                .collect(),
        }
    }

    fn trace(cx: &mut MethodContext<'_>, activation: ActivationKind, body: &mut Stmt) -> Frame {
        let tracker_ty = cx.config.tracker.tracker_type();
        let slot = TrackerSlot::allocate(cx.method, tracker_ty);
        let dispose_mode = match activation {
            ActivationKind::StateMachine { info, .. } => info.dispose_mode,
            _ => None,
        };
        let active = dispose_mode
            .map(|field| (allocate_synthesized(cx.method, ACTIVE_GUARD_NAME, primitives::BOOL), field));
        let snapshots = Self::snapshot_places(cx, &activation);
        let leading_snapshots = !matches!(activation, ActivationKind::StateMachine { .. });
        let span = cx.method.diagnostic_span();

        let mut temps = TempAllocator::new(cx.method);
        let mut frame = Frame::default();
        let original = std::mem::replace(body, Stmt::nop());
        {
            let method = &*cx.method;
            let indexer = EntityIndexer::new(method);
            let classifier = StoreClassifier::new(method, cx.types, &indexer);
            let mut synth = CallSynthesizer::new(
                &cx.config.tracker,
                cx.types,
                method.id,
                slot,
                &mut *cx.diagnostics,
                &mut *cx.stats,
            );
            if let Some((active, field)) = active {
                frame.prologue.push(dispose_guard(active, field));
                synth = synth.with_guard(active);
            }
            frame.prologue.extend(synth.entry(&activation, span));
            frame.finally.extend(synth.ret(span));

            let rewriter =
                BodyRewriter::new(method, classifier, synth, &mut temps).with_snapshots(snapshots);
            *body = if leading_snapshots {
                rewriter.rewrite_with_leading_snapshots(original)
            } else {
                rewriter.rewrite(original)
            };
        }
        temps.commit(cx.method);
        frame
    }
}

impl Aspect for TracingAspect {
    fn kind(&self) -> InstrumentationKinds {
        InstrumentationKinds::LOCAL_STATE_TRACING
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn apply(&self, cx: &mut MethodContext<'_>, body: &mut Stmt) -> Option<Frame> {
        match cx.eligibility {
            Eligibility::Excluded(reason) => {
                tracing::debug!(method = %cx.method.name, ?reason, "not traced");
                None
            }
            Eligibility::StateMachineConstructor { instance_id } => {
                let init = mint_instance_id(
                    &cx.config.tracker,
                    cx.method.id,
                    instance_id,
                    cx.method.diagnostic_span(),
                    cx.diagnostics,
                    cx.stats,
                )?;
                Some(Frame {
                    prologue: vec![init],
                    ..Frame::default()
                })
            }
            Eligibility::Traced(activation) => {
                tracing::debug!(method = %cx.method.name, ?activation, "tracing");
                Some(Self::trace(cx, activation, body))
            }
        }
    }
}

// ============================================================================
// Composition
// ============================================================================

/// The enabled aspects, in their fixed order.
pub struct Composition {
    aspects: Vec<Box<dyn Aspect>>,
}

impl Composition {
    /// Aspects for every kind in `kinds`.
    pub fn for_kinds(kinds: InstrumentationKinds) -> Self {
        let all: [Box<dyn Aspect>; 4] = [
            Box::new(CancellationAspect),
            Box::new(StackProbeAspect),
            Box::new(TracingAspect),
            Box::new(CoverageAspect),
        ];
        Self {
            aspects: all
                .into_iter()
                .filter(|aspect| kinds.contains(aspect.kind()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }

    /// The enabled kinds, in application order.
    pub fn kinds(&self) -> impl Iterator<Item = InstrumentationKinds> + '_ {
        self.aspects.iter().map(|aspect| aspect.kind())
    }

    /// Apply every aspect to the method in `cx` and wrap its body once.
    ///
    /// Returns whether any aspect applied.
    pub fn instrument(&self, cx: &mut MethodContext<'_>) -> bool {
        let Some(mut body) = cx.method.body.take() else {
            return false;
        };
        let mut frame = Frame::default();
        let mut applied = false;
        for aspect in &self.aspects {
            if let Some(contribution) = aspect.apply(cx, &mut body) {
                frame.merge(contribution);
                applied = true;
            }
        }
        cx.method.body = Some(wrap_body(frame, body));
        applied
    }
}

impl std::fmt::Debug for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}
