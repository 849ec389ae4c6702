//! Counters collected while instrumenting a module.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentationStats {
    /// Methods that received at least one aspect.
    pub methods_instrumented: usize,
    /// Methods left alone by every aspect.
    pub methods_excluded: usize,
    /// Methods skipped because their IR failed validation.
    pub methods_malformed: usize,
    pub entries: usize,
    pub stores: usize,
    pub aliases: usize,
    pub returns: usize,
    /// Stores whose type has no loggable representation.
    pub skipped_stores: usize,
    /// State-machine constructors that mint a correlation id.
    pub instance_ids: usize,
    /// Calls passing an unmanaged address; unverifiable but valid.
    pub verification_warnings: usize,
}

impl InstrumentationStats {
    /// Total tracker calls emitted.
    pub fn tracker_calls(&self) -> usize {
        self.entries + self.stores + self.aliases + self.returns + self.instance_ids
    }
}

impl fmt::Display for InstrumentationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} methods instrumented, {} excluded, {} malformed; {} tracker calls ({} stores, {} aliases)",
            self.methods_instrumented,
            self.methods_excluded,
            self.methods_malformed,
            self.tracker_calls(),
            self.stores,
            self.aliases
        )
    }
}
