//! The instrumentation pass over a whole module.
//!
//! ## Per method
//!
//! 1. Skip methods outside the configured filter; they are left untouched.
//! 2. Validate the IR. A malformed method is reported and left untouched.
//! 3. Classify the method and run the enabled aspects.
//!
//! Methods are independent: no state is shared between two methods' rewrites
//! apart from the diagnostics and counters they append to.

use statetrace_core::ir::{Module, validate_method};

use crate::classify::{Eligibility, Exclusion, classify_method};
use crate::compose::{Composition, MethodContext};
use crate::config::InstrumentationConfig;
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::stats::InstrumentationStats;

/// Output of the pass.
#[derive(Debug)]
pub struct InstrumentationOutput {
    /// The module with rewritten bodies.
    pub module: Module,
    /// Collected diagnostics; the module is complete even when non-empty.
    pub diagnostics: Vec<Diagnostic>,
    pub stats: InstrumentationStats,
}

impl InstrumentationOutput {
    /// Whether any diagnostic was reported.
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Rewrites every eligible method of a module.
pub struct InstrumentationPass<'a> {
    config: &'a InstrumentationConfig,
    composition: Composition,
}

impl<'a> InstrumentationPass<'a> {
    pub fn new(config: &'a InstrumentationConfig) -> Self {
        Self {
            config,
            composition: Composition::for_kinds(config.kinds),
        }
    }

    /// Run the pass on `module`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(self, mut module: Module) -> InstrumentationOutput {
        let mut diagnostics = DiagnosticBag::new();
        let mut stats = InstrumentationStats::default();

        if self.composition.is_empty() {
            tracing::debug!("no instrumentation kinds enabled");
            return InstrumentationOutput {
                module,
                diagnostics: Vec::new(),
                stats,
            };
        }

        let eligibility: Vec<Eligibility> = module
            .methods()
            .iter()
            .map(|method| {
                if self.config.includes(method.id) {
                    classify_method(method, &module)
                } else {
                    Eligibility::Excluded(Exclusion::FilteredOut)
                }
            })
            .collect();

        let (types, methods) = module.split_mut();
        for (method, eligibility) in methods.iter_mut().zip(eligibility) {
            if eligibility == Eligibility::Excluded(Exclusion::FilteredOut) {
                stats.methods_excluded += 1;
                continue;
            }
            if let Err(err) = validate_method(method, types) {
                tracing::warn!(method = %method.name, error = %err, "malformed method left untouched");
                diagnostics.push(err.into());
                stats.methods_malformed += 1;
                continue;
            }

            let mut cx = MethodContext {
                method,
                types,
                eligibility,
                config: self.config,
                diagnostics: &mut diagnostics,
                stats: &mut stats,
            };
            if self.composition.instrument(&mut cx) {
                stats.methods_instrumented += 1;
            } else {
                stats.methods_excluded += 1;
            }
        }

        tracing::debug!(%stats, diagnostics = diagnostics.len(), "instrumentation done");
        InstrumentationOutput {
            module,
            diagnostics: diagnostics.into_vec(),
            stats,
        }
    }
}
