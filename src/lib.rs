//! Local-state tracing for lowered method bodies.
//!
//! Rewrites each eligible method so every store into a user local, a
//! parameter, or a field hoisted from one calls into an external tracker,
//! alongside entry and exit of every activation. The facade re-exports the
//! three workspace crates:
//!
//! - [`core`]: the IR, type table and tracker contract vocabulary
//! - [`instrument`]: the instrumentation pass
//! - [`vm`]: a reference evaluator that records tracker calls
//!
//! ## Example
//!
//! ```
//! use statetrace::prelude::*;
//!
//! let mut b = MethodBuilder::new(MethodId::new(1), "F");
//! let a = b.local("a", primitives::INT32);
//! let mut module = Module::new(TypeTable::new());
//! module.add_method(b.build(Stmt::block(vec![Stmt::expr(Expr::assign(
//!     Place::Local(a),
//!     Expr::int(1),
//! ))])));
//!
//! let output = statetrace::instrument_module(module, &InstrumentationConfig::tracing());
//! let mut vm = Vm::new(&output.module);
//! vm.call(MethodId::new(1), vec![]).unwrap();
//!
//! let events: Vec<String> = vm.events().iter().map(|e| e.to_string()).collect();
//! assert_eq!(events, ["#1 enter 1", "#1 local[0] = 1", "#1 return"]);
//! ```

pub use statetrace_core as core;
pub use statetrace_instrument as instrument;
pub use statetrace_vm as vm;

use statetrace_core::ir::Module;
use statetrace_instrument::{InstrumentationConfig, InstrumentationOutput, InstrumentationPass};

/// Run the instrumentation pass over `module` with `config`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn instrument_module(module: Module, config: &InstrumentationConfig) -> InstrumentationOutput {
    tracing::debug!(kinds = ?config.kinds, methods = module.methods().len(), "instrumenting module");
    InstrumentationPass::new(config).run(module)
}

pub mod prelude {
    pub use statetrace_core::ir::{
        Arg, CatchClause, Expr, MethodBuilder, MethodFlags, MethodKind, Module, Place, RefKind,
        StateMachineInfo, StateMachineKind, Stmt,
    };
    pub use statetrace_core::{
        FieldDef, FieldId, HoistedFrom, IrPrinter, LambdaId, MethodId, StoreFamily, TrackerMember,
        TypeDef, TypeFlags, TypeHash, TypeTable, primitives,
    };
    pub use statetrace_instrument::{
        Diagnostic, InstrumentationConfig, InstrumentationKinds, InstrumentationOutput,
        TrackerContract,
    };
    pub use statetrace_vm::{RuntimeError, TraceEvent, TraceValue, Value, Vm};
}
