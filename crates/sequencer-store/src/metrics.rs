//! Operator-facing counters for this store's invariants, backed by
//! `prometheus`. Each instance owns its own unregistered counters rather
//! than publishing into a global `Registry`: wiring a `/metrics` scrape
//! endpoint is out of scope here, but the counter types match what a real
//! deployment would register.

use prometheus::IntCounter;

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric initialization failed")
}

pub struct SequencerStoreMetrics {
    pub events_appended: IntCounter,
    pub payloads_saved: IntCounter,
    pub conflicting_payload_ids: IntCounter,
    pub watermark_writes: IntCounter,
    pub events_pruned: IntCounter,
    pub payloads_pruned: IntCounter,
}

impl Default for SequencerStoreMetrics {
    fn default() -> Self {
        Self {
            events_appended: counter(
                "sequencer_store_events_appended_total",
                "Sequenced events appended to the log",
            ),
            payloads_saved: counter(
                "sequencer_store_payloads_saved_total",
                "Deduplicated payloads persisted",
            ),
            conflicting_payload_ids: counter(
                "sequencer_store_conflicting_payload_ids_total",
                "Payload ids reused with different content",
            ),
            watermark_writes: counter(
                "sequencer_store_watermark_writes_total",
                "Recipient watermark writes",
            ),
            events_pruned: counter(
                "sequencer_store_events_pruned_total",
                "Sequenced events pruned",
            ),
            payloads_pruned: counter(
                "sequencer_store_payloads_pruned_total",
                "Payloads pruned",
            ),
        }
    }
}

impl SequencerStoreMetrics {
    pub fn record_events_appended(&self, n: u64) {
        self.events_appended.inc_by(n);
    }

    pub fn record_payload_saved(&self) {
        self.payloads_saved.inc();
    }

    pub fn record_conflicting_payload_id(&self) {
        self.conflicting_payload_ids.inc();
    }

    pub fn record_watermark_write(&self) {
        self.watermark_writes.inc();
    }

    pub fn record_events_pruned(&self, n: u64) {
        self.events_pruned.inc_by(n);
    }

    pub fn record_payloads_pruned(&self, n: u64) {
        self.payloads_pruned.inc_by(n);
    }
}
