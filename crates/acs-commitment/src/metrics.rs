//! Operator-facing counters (this expansion's "Metrics surface" supplement),
//! matching `sequencer_store::metrics`: `prometheus`-backed, unregistered
//! per instance.

use prometheus::IntCounter;

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric initialization failed")
}

pub struct AcsCommitmentMetrics {
    pub commitments_computed_stored: IntCounter,
    pub commitments_received_stored: IntCounter,
    pub reconciliation_matches: IntCounter,
    pub reconciliation_mismatches: IntCounter,
    pub periods_marked_safe: IntCounter,
}

impl Default for AcsCommitmentMetrics {
    fn default() -> Self {
        Self {
            commitments_computed_stored: counter(
                "acs_commitment_computed_stored_total",
                "Locally computed commitments stored",
            ),
            commitments_received_stored: counter(
                "acs_commitment_received_stored_total",
                "Counter-participant commitments stored",
            ),
            reconciliation_matches: counter(
                "acs_commitment_reconciliation_matches_total",
                "Commitment reconciliations that matched",
            ),
            reconciliation_mismatches: counter(
                "acs_commitment_reconciliation_mismatches_total",
                "Commitment reconciliations that mismatched",
            ),
            periods_marked_safe: counter(
                "acs_commitment_periods_marked_safe_total",
                "Commitment periods marked safe to prune",
            ),
        }
    }
}

impl AcsCommitmentMetrics {
    pub fn record_computed_stored(&self) {
        self.commitments_computed_stored.inc();
    }

    pub fn record_received_stored(&self) {
        self.commitments_received_stored.inc();
    }

    pub fn record_match(&self) {
        self.reconciliation_matches.inc();
    }

    pub fn record_mismatch(&self) {
        self.reconciliation_mismatches.inc();
    }

    pub fn record_marked_safe(&self) {
        self.periods_marked_safe.inc();
    }
}
