//! Local-state tracing instrumentation.
//!
//! Rewrites lowered method bodies so that every store into a local, a
//! parameter, or a field hoisted from one, every ref rebind between them,
//! and every activation's entry and exit call into an external tracker type.
//!
//! ## Architecture
//!
//! ```text
//! pass ─→ classify ─→ compose ─→ rewrite ─→ wrap
//!                        │          │
//!                        │          ├─→ index, overload
//!                        └──────────┴─→ synth, slot
//! ```
//!
//! ## Modules
//!
//! - [`classify`]: which methods are traced and which places are tracked
//! - [`index`]: stable per-activation indices
//! - [`overload`]: static type to tracker overload
//! - [`synth`]: building tracker calls, checked against the contract
//! - [`slot`]: the tracker slot and temporaries
//! - [`rewrite`]: interleaving calls with a body
//! - [`wrap`]: the shared try/finally frame
//! - [`compose`]: ordering with cancellation, stack probing and coverage
//! - [`pass`]: running it all over a module
//!
//! ## Example
//!
//! ```
//! use statetrace_core::ir::{Expr, MethodBuilder, Module, Place, Stmt};
//! use statetrace_core::{MethodId, TypeTable, primitives};
//! use statetrace_instrument::{InstrumentationConfig, InstrumentationPass};
//!
//! let mut b = MethodBuilder::new(MethodId::new(1), "F");
//! let a = b.local("a", primitives::INT32);
//! let mut module = Module::new(TypeTable::new());
//! module.add_method(b.build(Stmt::block(vec![Stmt::expr(Expr::assign(
//!     Place::Local(a),
//!     Expr::int(1),
//! ))])));
//!
//! let config = InstrumentationConfig::tracing();
//! let output = InstrumentationPass::new(&config).run(module);
//! assert!(!output.has_errors());
//! assert_eq!(output.stats.stores, 1);
//! ```

pub mod classify;
pub mod compose;
pub mod config;
pub mod diagnostics;
pub mod index;
pub mod overload;
pub mod pass;
pub mod rewrite;
pub mod slot;
pub mod stats;
pub mod synth;
pub mod tracker;
pub mod wrap;

pub use classify::{
    ActivationKind, Eligibility, Exclusion, StoreClassifier, StoreTarget, TrackedEntity,
    classify_method,
};
pub use compose::{
    Aspect, CancellationAspect, Composition, CoverageAspect, MethodContext, StackProbeAspect,
    TracingAspect,
};
pub use config::{InstrumentationConfig, InstrumentationKinds};
pub use diagnostics::{Diagnostic, DiagnosticBag};
pub use index::EntityIndexer;
pub use overload::{OverloadKey, SkipReason, StorePlan, ValueConversion, resolve_store};
pub use pass::{InstrumentationOutput, InstrumentationPass};
pub use stats::InstrumentationStats;
pub use tracker::{DEFAULT_TRACKER_NAME, TrackerContract};
pub use wrap::{Frame, wrap_body};
