//! Operator-facing counters (this expansion's "Metrics surface" supplement),
//! matching `sequencer_store::metrics`: `prometheus`-backed, unregistered
//! per instance.

use prometheus::IntCounter;

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric initialization failed")
}

pub struct AcsMetrics {
    pub changes_applied: IntCounter,
    pub warnings_raised: IntCounter,
    pub fatal_errors: IntCounter,
    pub contracts_pruned: IntCounter,
}

impl Default for AcsMetrics {
    fn default() -> Self {
        Self {
            changes_applied: counter(
                "acs_changes_applied_total",
                "Active contract set changes applied",
            ),
            warnings_raised: counter(
                "acs_warnings_raised_total",
                "Late or skipped-timestamp warnings raised",
            ),
            fatal_errors: counter("acs_fatal_errors_total", "Fatal active contract set errors"),
            contracts_pruned: counter("acs_contracts_pruned_total", "Contracts pruned"),
        }
    }
}

impl AcsMetrics {
    pub fn record_change_applied(&self) {
        self.changes_applied.inc();
    }

    pub fn record_warning(&self) {
        self.warnings_raised.inc();
    }

    pub fn record_fatal_error(&self) {
        self.fatal_errors.inc();
    }

    pub fn record_contracts_pruned(&self, n: u64) {
        self.contracts_pruned.inc_by(n);
    }
}
