//! Sequencer Store: the durable, multi-writer log of
//! ordered, timestamped events with member registration, watermark-based HA
//! coordination, payload deduplication, per-member counter checkpoints,
//! acknowledgements, and pruning.
//!
//! Append-only log writes plus a chunked-delete pruning loop, generalized
//! from a single-writer document log to a multi-writer, watermark-gated
//! one.

use std::{
    collections::HashSet,
    sync::Arc,
};

use domain::{
    checkpoint::{
        Acknowledgement,
        MemberCounterCheckpoint,
    },
    errors::{
        CounterCheckpointInconsistent,
        WatermarkError,
    },
    event::{
        SequencedEvent,
        Watermark,
        WriterIndex,
    },
    member::{
        Member,
        MemberId,
        MemberName,
    },
    payload::{
        Payload,
        PayloadId,
    },
    Timestamp,
};
use errors::ErrorMetadata;
use persistence::{
    BatchError,
    ConflictStrategy,
    Persistence,
};
use runtime::{
    InstanceDiscriminator,
    Runtime,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::{
    config::Config,
    keys,
    metrics::SequencerStoreMetrics,
};

const MEMBERS_BY_NAME_TABLE: &str = "members_by_name";
const MEMBERS_BY_ID_TABLE: &str = "members_by_id";
const MEMBERS_META_TABLE: &str = "members_meta";
const NEXT_ID_KEY: &str = "next_id";
const PAYLOADS_TABLE: &str = "payloads";
const EVENTS_TABLE: &str = "events";
const WATERMARKS_TABLE: &str = "watermarks";
const CHECKPOINTS_TABLE: &str = "counter_checkpoints";
const ACKS_TABLE: &str = "acks";
const LOWER_BOUND_TABLE: &str = "lower_bound";
const LOWER_BOUND_KEY: &str = "_";

/// Payload content plus the fencing metadata needed to classify a
/// primary-key conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPayload {
    ts: Timestamp,
    content: Vec<u8>,
    instance_discriminator: Uuid,
}

#[derive(Clone)]
pub struct SequencerStore<RT: Runtime> {
    persistence: Box<dyn Persistence>,
    rt: RT,
    config: Config,
    metrics: Arc<SequencerStoreMetrics>,
}

impl<RT: Runtime> SequencerStore<RT> {
    pub fn new(persistence: Box<dyn Persistence>, rt: RT, config: Config) -> Self {
        Self { persistence, rt, config, metrics: Arc::new(SequencerStoreMetrics::default()) }
    }

    pub fn metrics(&self) -> &SequencerStoreMetrics {
        &self.metrics
    }

    pub fn runtime(&self) -> &RT {
        &self.rt
    }

    // ---- Members ----

    /// Idempotent: re-registration of an already-known name returns the
    /// existing id and leaves `registered_at` unchanged.
    pub async fn register_member(&self, name: &MemberName, ts: Timestamp) -> anyhow::Result<MemberId> {
        let mut tx = self.persistence.begin().await?;
        if let Some(existing) = tx.get(MEMBERS_BY_NAME_TABLE, &name.0).await? {
            let member: Member = serde_json::from_value(existing)?;
            self.persistence.commit(tx).await?;
            return Ok(member.id);
        }
        let next_id = match tx.get(MEMBERS_META_TABLE, NEXT_ID_KEY).await? {
            Some(v) => serde_json::from_value::<u64>(v)?,
            None => 0,
        };
        let id = MemberId(next_id);
        let member = Member { id, name: name.clone(), registered_at: ts, enabled: true };
        let encoded = serde_json::to_value(&member)?;
        tx.put(MEMBERS_BY_NAME_TABLE, name.0.clone(), encoded.clone()).await?;
        tx.put(MEMBERS_BY_ID_TABLE, keys::member_id_key(id), encoded).await?;
        tx.put(MEMBERS_META_TABLE, NEXT_ID_KEY.to_string(), serde_json::to_value(next_id + 1)?).await?;
        self.persistence.commit(tx).await?;
        tracing::info!(member.name = %name, member.id = %id, "registered new member");
        Ok(id)
    }

    pub async fn lookup_member(&self, id: MemberId) -> anyhow::Result<Option<Member>> {
        let mut tx = self.persistence.begin().await?;
        let row = tx.get(MEMBERS_BY_ID_TABLE, &keys::member_id_key(id)).await?;
        self.persistence.commit(tx).await?;
        row.map(|v| serde_json::from_value(v)).transpose().map_err(Into::into)
    }

    pub async fn lookup_member_by_name(&self, name: &MemberName) -> anyhow::Result<Option<Member>> {
        let mut tx = self.persistence.begin().await?;
        let row = tx.get(MEMBERS_BY_NAME_TABLE, &name.0).await?;
        self.persistence.commit(tx).await?;
        row.map(|v| serde_json::from_value(v)).transpose().map_err(Into::into)
    }

    /// A never-seen member is treated the same as a disabled one.
    pub async fn is_enabled(&self, id: MemberId) -> anyhow::Result<bool> {
        Ok(self.lookup_member(id).await?.map(|m| m.is_enabled()).unwrap_or(false))
    }

    /// Soft-disable; members are never deleted.
    pub async fn disable_member(&self, id: MemberId) -> anyhow::Result<()> {
        let mut tx = self.persistence.begin().await?;
        let key = keys::member_id_key(id);
        let Some(v) = tx.get(MEMBERS_BY_ID_TABLE, &key).await? else {
            self.persistence.commit(tx).await?;
            return Ok(());
        };
        let mut member: Member = serde_json::from_value(v)?;
        member.enabled = false;
        let encoded = serde_json::to_value(&member)?;
        tx.put(MEMBERS_BY_ID_TABLE, key, encoded.clone()).await?;
        tx.put(MEMBERS_BY_NAME_TABLE, member.name.0.clone(), encoded).await?;
        self.persistence.commit(tx).await
    }

    // ---- Payloads ----

    /// Persists each `(PayloadId, bytes, instanceDiscriminator)`. On
    /// primary-key conflict, re-reads the existing row and classifies: same
    /// discriminator present means the insert already happened (retry is a
    /// no-op success); a different discriminator is a fatal
    /// `ConflictingPayloadId`; absent means the row was deleted or never
    /// landed and the remaining subset is retried.
    pub async fn save_payloads(&self, payloads: &[Payload]) -> anyhow::Result<()> {
        let mut rows: Vec<(String, serde_json::Value)> = Vec::with_capacity(payloads.len());
        let mut by_index: Vec<&Payload> = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let stored = StoredPayload {
                ts: payload.id.0,
                content: payload.content.clone(),
                instance_discriminator: payload.instance_discriminator.0,
            };
            rows.push((keys::ts_key(payload.id.0), serde_json::to_value(&stored)?));
            by_index.push(payload);
        }

        loop {
            if rows.is_empty() {
                return Ok(());
            }
            match self
                .persistence
                .bulk_insert(PAYLOADS_TABLE, rows.clone(), ConflictStrategy::Error, self.config.max_batch_size)
                .await
            {
                Ok(outcome) => {
                    self.metrics.record_payload_saved();
                    tracing::debug!(rows.written = outcome.rows_written, "saved payloads");
                    return Ok(());
                },
                Err(e) => {
                    let Some(batch_err) = e.downcast_ref::<BatchError>() else {
                        return Err(e);
                    };
                    let idx = batch_err.failed_row_index;
                    let conflicting = by_index[idx];
                    let key = rows[idx].0.clone();
                    let mut tx = self.persistence.begin().await?;
                    let existing = tx.get(PAYLOADS_TABLE, &key).await?;
                    self.persistence.commit(tx).await?;
                    match existing {
                        None => {
                            // Row not actually there yet: treat as a transient
                            // conflict and retry everything from this index on.
                            rows.drain(0..idx);
                            by_index.drain(0..idx);
                        },
                        Some(v) => {
                            let stored: StoredPayload = serde_json::from_value(v)?;
                            if stored.instance_discriminator == conflicting.instance_discriminator.0 {
                                rows.drain(0..=idx);
                                by_index.drain(0..=idx);
                            } else {
                                self.metrics.record_conflicting_payload_id();
                                return Err(domain::errors::ConflictingPayloadId {
                                    id: conflicting.id.0,
                                    other_discriminator: InstanceDiscriminator(stored.instance_discriminator),
                                }
                                .into());
                            }
                        },
                    }
                },
            }
        }
    }

    pub async fn fetch_payload(&self, id: PayloadId) -> anyhow::Result<Option<Vec<u8>>> {
        let mut tx = self.persistence.begin().await?;
        let row = tx.get(PAYLOADS_TABLE, &keys::ts_key(id.0)).await?;
        self.persistence.commit(tx).await?;
        row.map(|v| serde_json::from_value::<StoredPayload>(v).map(|s| s.content)).transpose().map_err(Into::into)
    }

    // ---- Events & watermarks ----

    /// Bulk idempotent insert keyed by `ts`. Events from the same writer
    /// must be strictly increasing in `ts`.
    pub async fn save_events(&self, writer_index: WriterIndex, events: &[SequencedEvent]) -> anyhow::Result<()> {
        for pair in events.windows(2) {
            if pair[0].ts >= pair[1].ts {
                anyhow::bail!(ErrorMetadata::ordering_violation(
                    "EventsNotStrictlyIncreasing",
                    format!("writer {writer_index:?} events must be strictly increasing in ts, got {:?} then {:?}", pair[0].ts, pair[1].ts),
                ));
            }
        }
        for event in events {
            if event.writer_index != writer_index {
                anyhow::bail!(ErrorMetadata::ordering_violation(
                    "WriterIndexMismatch",
                    format!("event tagged with writer {:?}, expected {writer_index:?}", event.writer_index),
                ));
            }
        }
        let rows: Vec<(String, serde_json::Value)> =
            events.iter().map(|e| Ok::<_, anyhow::Error>((keys::ts_key(e.ts), serde_json::to_value(e)?))).collect::<anyhow::Result<_>>()?;
        let outcome = self
            .persistence
            .bulk_insert(EVENTS_TABLE, rows, ConflictStrategy::Overwrite, self.config.max_batch_size)
            .await?;
        self.metrics.record_events_appended(outcome.rows_written as u64);
        Ok(())
    }

    /// Upserts; only advances if the writer is online and hasn't been
    /// flagged offline by another writer. Reads back and verifies `(ts,
    /// online)` afterwards to detect a second writer racing on the same
    /// index.
    pub async fn save_watermark(&self, writer_index: WriterIndex, ts: Timestamp) -> anyhow::Result<()> {
        if self.persistence.is_read_only() {
            anyhow::bail!(ErrorMetadata::conflict("ReadOnly", "sequencer store is in read-only mode"));
        }
        let key = keys::writer_key(writer_index);
        let mut tx = self.persistence.begin().await?;
        let existing: Option<Watermark> =
            tx.get(WATERMARKS_TABLE, &key).await?.map(serde_json::from_value).transpose()?;
        if let Some(w) = &existing {
            if !w.online {
                self.persistence.commit(tx).await?;
                anyhow::bail!(WatermarkError::FlaggedOffline { writer_index });
            }
            if ts <= w.ts {
                self.persistence.commit(tx).await?;
                return Ok(());
            }
        }
        let new_watermark = Watermark { writer_index, ts, online: true };
        tx.put(WATERMARKS_TABLE, key.clone(), serde_json::to_value(&new_watermark)?).await?;
        self.persistence.commit(tx).await?;

        let mut verify_tx = self.persistence.begin().await?;
        let verify: Watermark = verify_tx
            .get(WATERMARKS_TABLE, &key)
            .await?
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| anyhow::anyhow!("watermark row for writer {writer_index:?} vanished after write"))?;
        self.persistence.commit(verify_tx).await?;
        if verify.ts != ts || !verify.online {
            anyhow::bail!(WatermarkError::UnexpectedlyChanged { writer_index, expected_ts: ts, actual_ts: verify.ts });
        }
        self.metrics.record_watermark_write();
        Ok(())
    }

    /// Under a logically serialisable transaction: reads the max watermark
    /// across all writers and sets this writer's watermark to
    /// `max(globalMax, now)`, online. Returns the effective timestamp.
    pub async fn go_online(&self, writer_index: WriterIndex, now: Timestamp) -> anyhow::Result<Timestamp> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(WATERMARKS_TABLE, "").await?;
        let mut global_max = Timestamp::MIN;
        for (_, v) in &rows {
            let w: Watermark = serde_json::from_value(v.clone())?;
            if w.ts > global_max {
                global_max = w.ts;
            }
        }
        let effective = std::cmp::max(global_max, now);
        let watermark = Watermark { writer_index, ts: effective, online: true };
        tx.put(WATERMARKS_TABLE, keys::writer_key(writer_index), serde_json::to_value(&watermark)?).await?;
        self.persistence.commit(tx).await?;
        self.metrics.record_watermark_write();
        tracing::info!(writer.index = writer_index.0, effective.ts = %effective, "writer went online");
        Ok(effective)
    }

    pub async fn go_offline(&self, writer_index: WriterIndex) -> anyhow::Result<()> {
        let mut tx = self.persistence.begin().await?;
        let key = keys::writer_key(writer_index);
        if let Some(v) = tx.get(WATERMARKS_TABLE, &key).await? {
            let mut w: Watermark = serde_json::from_value(v)?;
            w.online = false;
            tx.put(WATERMARKS_TABLE, key, serde_json::to_value(&w)?).await?;
        }
        self.persistence.commit(tx).await?;
        tracing::info!(writer.index = writer_index.0, "writer went offline");
        Ok(())
    }

    /// Flips online writers whose watermark is at or before `cutoff` to
    /// offline; the HA successor's signal that a fatal writer error has
    /// gone unrecovered.
    pub async fn mark_lagging_sequencers_offline(&self, cutoff: Timestamp) -> anyhow::Result<Vec<WriterIndex>> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(WATERMARKS_TABLE, "").await?;
        let mut flipped = Vec::new();
        for (key, v) in rows {
            let mut w: Watermark = serde_json::from_value(v)?;
            if w.online && w.ts <= cutoff {
                w.online = false;
                flipped.push(w.writer_index);
                tx.put(WATERMARKS_TABLE, key, serde_json::to_value(&w)?).await?;
            }
        }
        self.persistence.commit(tx).await?;
        if !flipped.is_empty() {
            tracing::warn!(writers = ?flipped, cutoff = %cutoff, "marked lagging sequencers offline");
        }
        Ok(flipped)
    }

    /// On recovery: removes events strictly newer than this writer's own
    /// watermark, so a crashed writer that wrote past its last confirmed
    /// watermark doesn't resurface torn events.
    pub async fn delete_events_past_watermark(&self, writer_index: WriterIndex) -> anyhow::Result<usize> {
        let mut tx = self.persistence.begin().await?;
        let key = keys::writer_key(writer_index);
        let Some(watermark_ts) =
            tx.get(WATERMARKS_TABLE, &key).await?.map(serde_json::from_value::<Watermark>).transpose()?.map(|w| w.ts)
        else {
            self.persistence.commit(tx).await?;
            return Ok(0);
        };
        let events = tx.scan_prefix(EVENTS_TABLE, "").await?;
        let mut deleted = 0;
        for (event_key, v) in events {
            let event: SequencedEvent = serde_json::from_value(v)?;
            if event.writer_index == writer_index && event.ts > watermark_ts {
                tx.delete(EVENTS_TABLE, &event_key).await?;
                deleted += 1;
            }
        }
        self.persistence.commit(tx).await?;
        Ok(deleted)
    }

    /// Visibility rule: an event at writer `w`, time `t` is
    /// visible iff `t <= min(onlineWatermarks)` AND (`w` is online OR `t <=
    /// watermark(w)`).
    pub async fn read_events(
        &self,
        member_id: MemberId,
        from_ts_exclusive: Option<Timestamp>,
        limit: usize,
    ) -> anyhow::Result<Vec<SequencedEvent>> {
        let member = self
            .lookup_member(member_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("member {member_id} is not registered"))?;
        let mut tx = self.persistence.begin().await?;
        let watermark_rows = tx.scan_prefix(WATERMARKS_TABLE, "").await?;
        let mut watermarks = Vec::with_capacity(watermark_rows.len());
        for (_, v) in watermark_rows {
            watermarks.push(serde_json::from_value::<Watermark>(v)?);
        }
        let Some(online_min) = watermarks.iter().filter(|w| w.online).map(|w| w.ts).min() else {
            self.persistence.commit(tx).await?;
            return Ok(vec![]);
        };
        let lower = match from_ts_exclusive {
            Some(t) => t.succ()?,
            None => Timestamp::MIN,
        };
        let event_rows = tx.scan_prefix(EVENTS_TABLE, "").await?;
        self.persistence.commit(tx).await?;

        let mut out = Vec::new();
        for (_, v) in event_rows {
            let event: SequencedEvent = serde_json::from_value(v)?;
            if event.ts < lower || event.ts > online_min {
                continue;
            }
            let writer_watermark = watermarks.iter().find(|w| w.writer_index == event.writer_index);
            let visible = match writer_watermark {
                Some(w) if w.online => true,
                Some(w) => event.ts <= w.ts,
                None => false,
            };
            if !visible || !event.is_addressed_to(&member.name) {
                continue;
            }
            out.push(event);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    // ---- Counter checkpoints ----

    /// Idempotent for equal `(ts, latestTopologyClientTs)`; otherwise fails
    /// with `CounterCheckpointInconsistent` carrying the stored values.
    pub async fn save_counter_checkpoint(
        &self,
        member_id: MemberId,
        counter: u64,
        ts: Timestamp,
        latest_topology_client_ts: Option<Timestamp>,
    ) -> anyhow::Result<()> {
        let key = keys::checkpoint_key(member_id, counter);
        let mut tx = self.persistence.begin().await?;
        if let Some(v) = tx.get(CHECKPOINTS_TABLE, &key).await? {
            let existing: MemberCounterCheckpoint = serde_json::from_value(v)?;
            self.persistence.commit(tx).await?;
            if existing.ts == ts && existing.latest_topology_client_ts == latest_topology_client_ts {
                return Ok(());
            }
            return Err(CounterCheckpointInconsistent {
                member_id,
                counter,
                stored_ts: existing.ts,
                stored_topology_client_ts: existing.latest_topology_client_ts,
            }
            .into());
        }
        let checkpoint = MemberCounterCheckpoint { member_id, counter, ts, latest_topology_client_ts };
        tx.put(CHECKPOINTS_TABLE, key, serde_json::to_value(&checkpoint)?).await?;
        self.persistence.commit(tx).await
    }

    /// The highest `(counter' < counter)` row for this member.
    pub async fn fetch_closest_checkpoint_before(
        &self,
        member_id: MemberId,
        counter: u64,
    ) -> anyhow::Result<Option<MemberCounterCheckpoint>> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(CHECKPOINTS_TABLE, &keys::checkpoint_prefix(member_id)).await?;
        self.persistence.commit(tx).await?;
        let mut best = None;
        for (_, v) in rows {
            let cp: MemberCounterCheckpoint = serde_json::from_value(v)?;
            if cp.counter < counter {
                best = Some(cp);
            } else {
                break;
            }
        }
        Ok(best)
    }

    // ---- Acknowledgements ----

    /// Upserts with `ts = max(existing, new)`.
    pub async fn acknowledge(&self, member_id: MemberId, ts: Timestamp) -> anyhow::Result<()> {
        let key = keys::member_id_key(member_id);
        let mut tx = self.persistence.begin().await?;
        let existing = tx.get(ACKS_TABLE, &key).await?.map(serde_json::from_value::<Acknowledgement>).transpose()?;
        let new_ts = match existing {
            Some(a) => std::cmp::max(a.ts, ts),
            None => ts,
        };
        tx.put(ACKS_TABLE, key, serde_json::to_value(&Acknowledgement { member_id, ts: new_ts })?).await?;
        self.persistence.commit(tx).await
    }

    pub async fn fetch_acknowledgement(&self, member_id: MemberId) -> anyhow::Result<Option<Timestamp>> {
        let mut tx = self.persistence.begin().await?;
        let row = tx.get(ACKS_TABLE, &keys::member_id_key(member_id)).await?;
        self.persistence.commit(tx).await?;
        row.map(|v| serde_json::from_value::<Acknowledgement>(v).map(|a| a.ts)).transpose().map_err(Into::into)
    }

    // ---- Pruning ----

    /// Monotonic: rejects lower bounds below the previously saved one.
    pub async fn save_lower_bound(&self, ts: Timestamp) -> anyhow::Result<()> {
        let mut tx = self.persistence.begin().await?;
        if let Some(v) = tx.get(LOWER_BOUND_TABLE, LOWER_BOUND_KEY).await? {
            let existing: Timestamp = serde_json::from_value(v)?;
            if ts < existing {
                self.persistence.commit(tx).await?;
                anyhow::bail!(ErrorMetadata::ordering_violation(
                    "PruningLowerBoundRegressed",
                    format!("new pruning lower bound {ts} is before existing {existing}"),
                ));
            }
        }
        tx.put(LOWER_BOUND_TABLE, LOWER_BOUND_KEY.to_string(), serde_json::to_value(ts)?).await?;
        self.persistence.commit(tx).await
    }

    pub async fn fetch_lower_bound(&self) -> anyhow::Result<Option<Timestamp>> {
        let mut tx = self.persistence.begin().await?;
        let row = tx.get(LOWER_BOUND_TABLE, LOWER_BOUND_KEY).await?;
        self.persistence.commit(tx).await?;
        row.map(|v| serde_json::from_value(v)).transpose().map_err(Into::into)
    }

    /// `min` over `max(checkpoint.ts before ts, member.registeredAt)` for
    /// each enabled member; `None` if that set is empty.
    pub async fn adjust_pruning_timestamp_for_counter_checkpoints(
        &self,
        ts: Timestamp,
        disabled: &HashSet<MemberId>,
    ) -> anyhow::Result<Option<Timestamp>> {
        let mut tx = self.persistence.begin().await?;
        let member_rows = tx.scan_prefix(MEMBERS_BY_ID_TABLE, "").await?;
        self.persistence.commit(tx).await?;
        let mut bound: Option<Timestamp> = None;
        for (_, v) in member_rows {
            let member: Member = serde_json::from_value(v)?;
            if disabled.contains(&member.id) {
                continue;
            }
            let checkpoint_ts = self.latest_checkpoint_ts_before(member.id, ts).await?;
            let candidate = match checkpoint_ts {
                Some(c) => std::cmp::max(c, member.registered_at),
                None => member.registered_at,
            };
            bound = Some(match bound {
                Some(b) => std::cmp::min(b, candidate),
                None => candidate,
            });
        }
        Ok(bound)
    }

    async fn latest_checkpoint_ts_before(&self, member_id: MemberId, ts: Timestamp) -> anyhow::Result<Option<Timestamp>> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(CHECKPOINTS_TABLE, &keys::checkpoint_prefix(member_id)).await?;
        self.persistence.commit(tx).await?;
        let mut best = None;
        for (_, v) in rows {
            let cp: MemberCounterCheckpoint = serde_json::from_value(v)?;
            if cp.ts < ts {
                best = Some(match best {
                    Some(b) => std::cmp::max(b, cp.ts),
                    None => cp.ts,
                });
            }
        }
        Ok(best)
    }

    pub async fn prune_events(&self, bound: Timestamp) -> anyhow::Result<usize> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(EVENTS_TABLE, "").await?;
        let mut n = 0;
        for (k, v) in rows {
            let event: SequencedEvent = serde_json::from_value(v)?;
            if event.ts < bound {
                tx.delete(EVENTS_TABLE, &k).await?;
                n += 1;
            } else {
                break;
            }
        }
        self.persistence.commit(tx).await?;
        self.metrics.record_events_pruned(n as u64);
        Ok(n)
    }

    pub async fn prune_payloads(&self, bound: Timestamp) -> anyhow::Result<usize> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(PAYLOADS_TABLE, "").await?;
        let mut n = 0;
        for (k, v) in rows {
            let payload: StoredPayload = serde_json::from_value(v)?;
            if payload.ts < bound {
                tx.delete(PAYLOADS_TABLE, &k).await?;
                n += 1;
            } else {
                break;
            }
        }
        self.persistence.commit(tx).await?;
        self.metrics.record_payloads_pruned(n as u64);
        Ok(n)
    }

    pub async fn prune_checkpoints(&self, bound: Timestamp) -> anyhow::Result<usize> {
        let mut tx = self.persistence.begin().await?;
        let rows = tx.scan_prefix(CHECKPOINTS_TABLE, "").await?;
        let mut n = 0;
        for (k, v) in rows {
            let cp: MemberCounterCheckpoint = serde_json::from_value(v)?;
            if cp.ts < bound {
                tx.delete(CHECKPOINTS_TABLE, &k).await?;
                n += 1;
            }
        }
        self.persistence.commit(tx).await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use domain::event::EventKind;
    use persistence_memory::MemoryPersistence;
    use runtime::testing::TestRuntime;

    use super::*;

    fn store() -> SequencerStore<TestRuntime> {
        SequencerStore::new(Box::new(MemoryPersistence::new()), TestRuntime::new(), Config::default())
    }

    fn payload(ts: i64, content: &[u8], disc: Uuid) -> Payload {
        Payload { id: PayloadId(Timestamp::from_micros(ts)), content: content.to_vec(), instance_discriminator: InstanceDiscriminator(disc) }
    }

    #[tokio::test]
    async fn register_member_is_idempotent() {
        let store = store();
        let name = MemberName::from("alice");
        let id1 = store.register_member(&name, Timestamp::from_micros(1)).await.unwrap();
        let id2 = store.register_member(&name, Timestamp::from_micros(999)).await.unwrap();
        assert_eq!(id1, id2);
        let member = store.lookup_member(id1).await.unwrap().unwrap();
        assert_eq!(member.registered_at, Timestamp::from_micros(1));
    }

    #[tokio::test]
    async fn distinct_members_get_dense_ids() {
        let store = store();
        let a = store.register_member(&MemberName::from("a"), Timestamp::from_micros(0)).await.unwrap();
        let b = store.register_member(&MemberName::from("b"), Timestamp::from_micros(0)).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.0 + 1, b.0);
    }

    #[tokio::test]
    async fn never_seen_member_is_treated_as_disabled() {
        let store = store();
        assert!(!store.is_enabled(MemberId(42)).await.unwrap());
    }

    /// Two writers, different discriminators, one wins.
    #[tokio::test]
    async fn conflicting_payload_id_is_detected() {
        let store = store();
        let disc_a = Uuid::from_u128(1);
        let disc_b = Uuid::from_u128(2);
        store.save_payloads(&[payload(100, b"first", disc_a)]).await.unwrap();
        // Same discriminator retried: idempotent success.
        store.save_payloads(&[payload(100, b"first", disc_a)]).await.unwrap();
        // Different discriminator: fatal conflict.
        let err = store.save_payloads(&[payload(100, b"second", disc_b)]).await.unwrap_err();
        let conflict = err.downcast::<domain::errors::ConflictingPayloadId>().unwrap();
        assert_eq!(conflict.other_discriminator.0, disc_a);
    }

    #[tokio::test]
    async fn save_events_rejects_non_increasing_ts() {
        let store = store();
        let w = WriterIndex(0);
        let events = vec![
            SequencedEvent {
                ts: Timestamp::from_micros(5),
                writer_index: w,
                kind: EventKind::Deliver,
                message_id: None,
                sender: None,
                recipients: None,
                payload_id: None,
                signing_ts: None,
                error_message: None,
                trace_context: Default::default(),
            },
            SequencedEvent {
                ts: Timestamp::from_micros(5),
                writer_index: w,
                kind: EventKind::Deliver,
                message_id: None,
                sender: None,
                recipients: None,
                payload_id: None,
                signing_ts: None,
                error_message: None,
                trace_context: Default::default(),
            },
        ];
        assert!(store.save_events(w, &events).await.is_err());
    }

    #[tokio::test]
    async fn watermark_gates_event_visibility() {
        let store = store();
        let alice = store.register_member(&MemberName::from("alice"), Timestamp::from_micros(0)).await.unwrap();
        let w = WriterIndex(0);
        let event = SequencedEvent {
            ts: Timestamp::from_micros(10),
            writer_index: w,
            kind: EventKind::Deliver,
            message_id: Some("m1".into()),
            sender: Some(MemberName::from("alice")),
            recipients: Some(vec![MemberName::from("alice")]),
            payload_id: None,
            signing_ts: None,
            error_message: None,
            trace_context: Default::default(),
        };
        store.save_events(w, &[event]).await.unwrap();

        // No online watermark yet: nothing visible.
        assert!(store.read_events(alice, None, 10).await.unwrap().is_empty());

        store.go_online(w, Timestamp::from_micros(5)).await.unwrap();
        store.save_watermark(w, Timestamp::from_micros(10)).await.unwrap();
        let visible = store.read_events(alice, None, 10).await.unwrap();
        assert_eq!(visible.len(), 1);
    }

    #[tokio::test]
    async fn second_writer_flipping_watermark_offline_is_detected() {
        let store = store();
        let w = WriterIndex(1);
        store.go_online(w, Timestamp::from_micros(1)).await.unwrap();
        store.go_offline(w).await.unwrap();
        let err = store.save_watermark(w, Timestamp::from_micros(2)).await.unwrap_err();
        assert!(err.downcast::<WatermarkError>().unwrap().to_string().contains("offline"));
    }

    /// Identical checkpoint values are idempotent; differing ones conflict.
    #[tokio::test]
    async fn counter_checkpoint_idempotent_then_conflicting() {
        let store = store();
        let member = MemberId(0);
        store.save_counter_checkpoint(member, 1, Timestamp::from_micros(10), None).await.unwrap();
        store.save_counter_checkpoint(member, 1, Timestamp::from_micros(10), None).await.unwrap();
        let err = store.save_counter_checkpoint(member, 1, Timestamp::from_micros(11), None).await.unwrap_err();
        let inconsistent = err.downcast::<CounterCheckpointInconsistent>().unwrap();
        assert_eq!(inconsistent.stored_ts, Timestamp::from_micros(10));
    }

    #[tokio::test]
    async fn fetch_closest_checkpoint_before_finds_predecessor() {
        let store = store();
        let member = MemberId(0);
        for (counter, ts) in [(1u64, 10i64), (2, 20), (5, 50)] {
            store.save_counter_checkpoint(member, counter, Timestamp::from_micros(ts), None).await.unwrap();
        }
        let closest = store.fetch_closest_checkpoint_before(member, 5).await.unwrap().unwrap();
        assert_eq!(closest.counter, 2);
        assert!(store.fetch_closest_checkpoint_before(member, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acknowledgement_is_monotonic() {
        let store = store();
        let member = MemberId(3);
        store.acknowledge(member, Timestamp::from_micros(10)).await.unwrap();
        store.acknowledge(member, Timestamp::from_micros(5)).await.unwrap();
        assert_eq!(store.fetch_acknowledgement(member).await.unwrap(), Some(Timestamp::from_micros(10)));
        store.acknowledge(member, Timestamp::from_micros(20)).await.unwrap();
        assert_eq!(store.fetch_acknowledgement(member).await.unwrap(), Some(Timestamp::from_micros(20)));
    }

    #[tokio::test]
    async fn lower_bound_rejects_regression() {
        let store = store();
        store.save_lower_bound(Timestamp::from_micros(10)).await.unwrap();
        assert!(store.save_lower_bound(Timestamp::from_micros(5)).await.is_err());
        store.save_lower_bound(Timestamp::from_micros(20)).await.unwrap();
        assert_eq!(store.fetch_lower_bound().await.unwrap(), Some(Timestamp::from_micros(20)));
    }

    #[tokio::test]
    async fn prune_events_removes_strictly_below_bound() {
        let store = store();
        let w = WriterIndex(0);
        let events: Vec<_> = (0..5)
            .map(|i| SequencedEvent {
                ts: Timestamp::from_micros(i),
                writer_index: w,
                kind: EventKind::Deliver,
                message_id: None,
                sender: None,
                recipients: None,
                payload_id: None,
                signing_ts: None,
                error_message: None,
                trace_context: Default::default(),
            })
            .collect();
        store.save_events(w, &events).await.unwrap();
        let pruned = store.prune_events(Timestamp::from_micros(3)).await.unwrap();
        assert_eq!(pruned, 3);
    }

    #[tokio::test]
    async fn mark_lagging_sequencers_offline_only_flips_stale_online_writers() {
        let store = store();
        let fresh = WriterIndex(0);
        let stale = WriterIndex(1);
        // Bring `stale` online first so its effective timestamp isn't
        // bumped up by `fresh`'s later, higher watermark.
        store.go_online(stale, Timestamp::from_micros(1)).await.unwrap();
        store.go_online(fresh, Timestamp::from_micros(100)).await.unwrap();
        let flipped = store.mark_lagging_sequencers_offline(Timestamp::from_micros(50)).await.unwrap();
        assert_eq!(flipped, vec![stale]);
    }
}
