//! Multi-Log Publisher: fan-in of
//! per-domain logs to a single global offset stream with deduplication.
//!
//! Each domain this participant is connected to produces its own
//! monotonically-increasing **local offset** sequence (derived from that
//! domain's request journal / sequencer counter by the caller — opaque to
//! this crate). This store assigns each distinct `(domainId, localOffset)`
//! pair exactly one dense **global offset**, in publish order, so a single
//! downstream consumer (the participant's own indexer) can observe a total
//! order across every domain without caring which domain a record came
//! from. Republishing an already-assigned pair after a crash-recovery
//! replay is idempotent and returns the previously-assigned global offset,
//! the same "retry-safe insert" idiom `sequencer_store::save_payloads` uses
//! for payload ids.
//!
//! A single global write sequence plus durable-then-notify ordering,
//! generalized from a single-writer log into an explicit N-domain fan-in
//! with a persisted dedup table.

use domain::{
    acs::DomainId,
    Timestamp,
};
use persistence::{
    ConflictStrategy,
    Persistence,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    config::Config,
    cursor::GlobalOffsetCursor,
    errors::LocalOffsetOutOfOrder,
    keys,
    metrics::PublisherMetrics,
};

const GLOBAL_LOG_TABLE: &str = "multi_log_global";
const DEDUP_TABLE: &str = "multi_log_dedup";
const DOMAIN_WATERMARKS_TABLE: &str = "multi_log_domain_watermarks";
const META_TABLE: &str = "multi_log_meta";
const NEXT_GLOBAL_OFFSET_KEY: &str = "next_global_offset";

/// A single record in the global, fanned-in offset stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub global_offset: u64,
    pub domain_id: DomainId,
    pub local_offset: u64,
    pub recorded_at: Timestamp,
}

pub struct MultiLogPublisher {
    persistence: Box<dyn Persistence>,
    config: Config,
    cursor: GlobalOffsetCursor,
    metrics: PublisherMetrics,
}

impl MultiLogPublisher {
    /// Constructs a publisher and primes its cursor from whatever is
    /// already durable.
    pub async fn load(persistence: Box<dyn Persistence>, config: Config) -> anyhow::Result<Self> {
        let publisher =
            Self { persistence, config, cursor: GlobalOffsetCursor::new(), metrics: PublisherMetrics::default() };
        let next = publisher.next_global_offset().await?;
        if next > 0 {
            publisher.cursor.advance(next - 1);
        }
        Ok(publisher)
    }

    pub fn cursor(&self) -> &GlobalOffsetCursor {
        &self.cursor
    }

    pub async fn next_global_offset(&self) -> anyhow::Result<u64> {
        let mut tx = self.persistence.begin().await?;
        let next = match tx.get(META_TABLE, NEXT_GLOBAL_OFFSET_KEY).await? {
            Some(v) => serde_json::from_value::<u64>(v)?,
            None => 0,
        };
        self.persistence.commit(tx).await?;
        Ok(next)
    }

    /// Assigns a global offset to `(domain_id, local_offset)`, idempotently.
    ///
    /// - If this exact pair was already published, returns the previously
    ///   assigned global offset without writing anything (dedup).
    /// - Otherwise requires `local_offset` to be strictly greater than the
    ///   last local offset published for this domain, assigns the next
    ///   dense global offset, and persists the record.
    pub async fn publish(
        &self,
        domain_id: &DomainId,
        local_offset: u64,
        recorded_at: Timestamp,
    ) -> anyhow::Result<u64> {
        let dedup_key = keys::dedup_key(domain_id, local_offset);
        let mut tx = self.persistence.begin().await?;
        if let Some(existing) = tx.get(DEDUP_TABLE, &dedup_key).await? {
            let global_offset: u64 = serde_json::from_value(existing)?;
            self.persistence.commit(tx).await?;
            self.metrics.record_dedup_hit();
            tracing::debug!(
                domain.id = %domain_id.0,
                local_offset,
                global_offset,
                "duplicate publish, returning previously assigned global offset"
            );
            return Ok(global_offset);
        }

        let watermark_key = keys::domain_key(domain_id);
        let last_published = match tx.get(DOMAIN_WATERMARKS_TABLE, &watermark_key).await? {
            Some(v) => Some(serde_json::from_value::<u64>(v)?),
            None => None,
        };
        if last_published.is_some_and(|last| local_offset <= last) {
            self.persistence.commit(tx).await?;
            anyhow::bail!(LocalOffsetOutOfOrder { domain_id: domain_id.clone(), local_offset, last_published });
        }

        let global_offset = match tx.get(META_TABLE, NEXT_GLOBAL_OFFSET_KEY).await? {
            Some(v) => serde_json::from_value::<u64>(v)?,
            None => 0,
        };
        let record = LogRecord { global_offset, domain_id: domain_id.clone(), local_offset, recorded_at };
        tx.put(GLOBAL_LOG_TABLE, keys::global_offset_key(global_offset), serde_json::to_value(&record)?).await?;
        tx.put(DEDUP_TABLE, dedup_key, serde_json::to_value(global_offset)?).await?;
        tx.put(DOMAIN_WATERMARKS_TABLE, watermark_key, serde_json::to_value(local_offset)?).await?;
        tx.put(META_TABLE, NEXT_GLOBAL_OFFSET_KEY.to_string(), serde_json::to_value(global_offset + 1)?).await?;
        self.persistence.commit(tx).await?;

        self.metrics.record_published(global_offset);
        self.cursor.advance(global_offset);
        tracing::debug!(domain.id = %domain_id.0, local_offset, global_offset, "published record to global log");
        Ok(global_offset)
    }

    /// Returns up to `limit` records in global-offset order, starting after
    /// `from_exclusive` (`None` reads from the beginning of the log).
    pub async fn read_from(&self, from_exclusive: Option<u64>, limit: usize) -> anyhow::Result<Vec<LogRecord>> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(GLOBAL_LOG_TABLE, "").await?;
        self.persistence.commit(tx).await?;
        let mut records = Vec::with_capacity(rows.len().min(limit));
        for (_, v) in rows {
            let record: LogRecord = serde_json::from_value(v)?;
            if from_exclusive.is_some_and(|bound| record.global_offset <= bound) {
                continue;
            }
            records.push(record);
            if records.len() >= limit {
                break;
            }
        }
        Ok(records)
    }

    pub async fn wait_for_global_offset(&self, target: u64) {
        self.cursor.wait_for(target).await
    }

    /// Bulk variant of [`Self::publish`], used by a domain's reconnect/replay
    /// path to fan in a contiguous batch of already-known local offsets in
    /// one round trip.
    pub async fn publish_batch(
        &self,
        domain_id: &DomainId,
        entries: Vec<(u64, Timestamp)>,
    ) -> anyhow::Result<Vec<u64>> {
        let mut assigned = Vec::with_capacity(entries.len());
        for chunk in entries.chunks(self.config.max_batch_size) {
            for (local_offset, recorded_at) in chunk {
                assigned.push(self.publish(domain_id, *local_offset, *recorded_at).await?);
            }
        }
        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use persistence_memory::MemoryPersistence;

    use super::*;

    async fn publisher() -> MultiLogPublisher {
        MultiLogPublisher::load(Box::new(MemoryPersistence::new()), Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn publish_assigns_dense_global_offsets_across_domains() {
        let publisher = publisher().await;
        let a = DomainId("domainA".to_string());
        let b = DomainId("domainB".to_string());

        let ga0 = publisher.publish(&a, 0, Timestamp::from_micros(1)).await.unwrap();
        let gb0 = publisher.publish(&b, 0, Timestamp::from_micros(2)).await.unwrap();
        let ga1 = publisher.publish(&a, 1, Timestamp::from_micros(3)).await.unwrap();

        assert_eq!(vec![ga0, gb0, ga1], vec![0, 1, 2]);
        assert_eq!(publisher.next_global_offset().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn republishing_the_same_pair_is_idempotent() {
        let publisher = publisher().await;
        let a = DomainId("domainA".to_string());
        let first = publisher.publish(&a, 0, Timestamp::from_micros(1)).await.unwrap();
        let second = publisher.publish(&a, 0, Timestamp::from_micros(1)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(publisher.next_global_offset().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_local_offset_is_ordering_violation() {
        let publisher = publisher().await;
        let a = DomainId("domainA".to_string());
        publisher.publish(&a, 5, Timestamp::from_micros(1)).await.unwrap();
        let err = publisher.publish(&a, 3, Timestamp::from_micros(2)).await.unwrap_err();
        assert!(err.downcast::<LocalOffsetOutOfOrder>().is_ok());
    }

    #[tokio::test]
    async fn read_from_respects_exclusive_lower_bound_and_limit() {
        let publisher = publisher().await;
        let a = DomainId("domainA".to_string());
        for i in 0..5u64 {
            publisher.publish(&a, i, Timestamp::from_micros(i as i64)).await.unwrap();
        }
        let records = publisher.read_from(Some(1), 2).await.unwrap();
        assert_eq!(records.iter().map(|r| r.global_offset).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn cursor_advances_only_after_publish_commits() {
        let publisher = publisher().await;
        let a = DomainId("domainA".to_string());
        assert_eq!(publisher.cursor().current(), None);
        publisher.publish(&a, 0, Timestamp::from_micros(1)).await.unwrap();
        assert_eq!(publisher.cursor().current(), Some(0));
    }

    #[tokio::test]
    async fn publish_batch_is_sequential_and_idempotent() {
        let publisher = publisher().await;
        let a = DomainId("domainA".to_string());
        let entries = vec![(0u64, Timestamp::from_micros(1)), (1, Timestamp::from_micros(2)), (2, Timestamp::from_micros(3))];
        let first = publisher.publish_batch(&a, entries.clone()).await.unwrap();
        let second = publisher.publish_batch(&a, entries).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![0, 1, 2]);
    }
}
