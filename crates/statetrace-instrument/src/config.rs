//! Instrumentation configuration.
//!
//! ```
//! use statetrace_instrument::{InstrumentationConfig, InstrumentationKinds};
//!
//! let config = InstrumentationConfig::new(
//!     InstrumentationKinds::LOCAL_STATE_TRACING | InstrumentationKinds::MODULE_CANCELLATION,
//! )
//! .with_parameter_snapshots(true);
//! assert!(config.is_enabled(InstrumentationKinds::LOCAL_STATE_TRACING));
//! ```

use bitflags::bitflags;
use rustc_hash::FxHashSet;
use statetrace_core::MethodId;

use crate::tracker::TrackerContract;

bitflags! {
    /// Instrumentation kinds that may be enabled together.
    ///
    /// When several are enabled they share one prologue and one outer
    /// try/finally; see [`crate::compose`] for the fixed order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstrumentationKinds: u32 {
        /// Log local, parameter and alias stores plus entry and exit.
        const LOCAL_STATE_TRACING = 1 << 0;
        /// Create a coverage payload on entry.
        const TEST_COVERAGE = 1 << 1;
        /// Check the module cancellation token on entry.
        const MODULE_CANCELLATION = 1 << 2;
        /// Probe the remaining stack on entry.
        const STACK_OVERFLOW_PROBING = 1 << 3;
    }
}

/// Settings for one run of the pass.
#[derive(Debug, Clone, Default)]
pub struct InstrumentationConfig {
    pub kinds: InstrumentationKinds,
    pub tracker: TrackerContract,
    /// Log each parameter's incoming value where the user body begins.
    pub snapshot_parameters: bool,
    /// Restrict instrumentation to these methods.
    pub methods: Option<FxHashSet<MethodId>>,
}

impl InstrumentationConfig {
    /// Enable `kinds` with a complete tracker contract.
    pub fn new(kinds: InstrumentationKinds) -> Self {
        Self {
            kinds,
            ..Self::default()
        }
    }

    /// Only local-state tracing.
    pub fn tracing() -> Self {
        Self::new(InstrumentationKinds::LOCAL_STATE_TRACING)
    }

    pub fn with_tracker(mut self, tracker: TrackerContract) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_parameter_snapshots(mut self, enabled: bool) -> Self {
        self.snapshot_parameters = enabled;
        self
    }

    /// Instrument only `methods`; others pass through unchanged.
    pub fn only_methods(mut self, methods: impl IntoIterator<Item = MethodId>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    pub fn is_enabled(&self, kind: InstrumentationKinds) -> bool {
        self.kinds.contains(kind)
    }

    /// Whether the method filter admits `method`.
    pub fn includes(&self, method: MethodId) -> bool {
        self.methods.as_ref().is_none_or(|set| set.contains(&method))
    }
}
