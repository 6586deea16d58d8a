//! Operator-facing counters (this expansion's "Metrics surface" supplement),
//! matching `sequencer_store::metrics`/`acs::metrics`: `prometheus`-backed,
//! unregistered per instance.

use prometheus::{
    IntCounter,
    IntGauge,
};

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric initialization failed")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::new(name, help).expect("metric initialization failed")
}

pub struct PublisherMetrics {
    pub records_published: IntCounter,
    pub dedup_hits: IntCounter,
    pub last_global_offset: IntGauge,
}

impl Default for PublisherMetrics {
    fn default() -> Self {
        Self {
            records_published: counter(
                "multi_log_publisher_records_published_total",
                "Records published to the multi-participant log",
            ),
            dedup_hits: counter(
                "multi_log_publisher_dedup_hits_total",
                "Publish calls deduplicated against an existing global offset",
            ),
            last_global_offset: gauge(
                "multi_log_publisher_last_global_offset",
                "Global offset of the most recently published record",
            ),
        }
    }
}

impl PublisherMetrics {
    pub fn record_published(&self, global_offset: u64) {
        self.records_published.inc();
        self.last_global_offset.set(global_offset as i64);
    }

    pub fn record_dedup_hit(&self) {
        self.dedup_hits.inc();
    }
}
