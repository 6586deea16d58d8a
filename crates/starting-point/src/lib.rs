//! Starting-Point Calculator: on startup, derives the four
//! crash-recovery coordinates a participant node replays from, by combining
//! the request journal's clean prehead with the sequencer store's
//! per-sequencer-counter prehead.
//!
//! Implemented as pure functions over already-fetched state, no I/O of
//! their own — callers assemble the inputs from `request-journal`/
//! `sequencer-store` queries and hand them to [`compute_starting_point`].

pub mod config;

use domain::{
    request::{
        RepairContext,
        RequestCounter,
    },
    Timestamp,
};
use serde::{
    Deserialize,
    Serialize,
};

pub use config::Config;

/// A sequencer's locally-assigned per-event counter, monotonically
/// increasing within a single sequencer (distinct from the request
/// counter, which is domain-wide).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequencerCounter(pub u64);

impl SequencerCounter {
    pub fn pred(&self) -> SequencerCounter {
        SequencerCounter(self.0.saturating_sub(1))
    }
}

/// The clean prehead's stored data, as read from the request journal.
#[derive(Debug, Clone)]
pub struct CleanRequestInfo {
    pub rc: RequestCounter,
    pub request_ts: Timestamp,
    pub commit_ts: Timestamp,
    pub repair_context: Option<RepairContext>,
}

/// The journal row immediately above `cleanRc`, if one has been inserted.
#[derive(Debug, Clone)]
pub struct JournalSuccessor {
    pub rc: RequestCounter,
    pub request_ts: Timestamp,
    /// The sequencer counter associated with this request's events, as
    /// looked up from the sequencer store by `request_ts`.
    pub sc: SequencerCounter,
}

/// The sequencer store's durable per-sequencer-counter prehead at startup.
#[derive(Debug, Clone, Copy)]
pub struct SequencerCounterPrehead {
    pub sc: SequencerCounter,
    pub ts: Timestamp,
}

/// `(rc, sequencerCounter, ts)` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayPoint {
    pub rc: RequestCounter,
    pub sc: SequencerCounter,
    pub ts: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartingPoints {
    pub clean_replay: ReplayPoint,
    pub processing: ReplayPoint,
    pub event_publishing_next_local_offset: u64,
    pub rewound_sequencer_counter_prehead: SequencerCounterPrehead,
}

/// Derives the four crash-recovery coordinates from clean-prehead and
/// sequencer-counter-prehead state.
///
/// `next_local_offset` is the multi-log publisher's own durable cursor;
/// this calculator passes it through unchanged since no rewind logic
/// applies to it — the publisher's own dedup-by-offset makes
/// re-publishing idempotent.
pub fn compute_starting_point(
    clean: Option<CleanRequestInfo>,
    successor: Option<JournalSuccessor>,
    prehead: SequencerCounterPrehead,
    next_local_offset: u64,
    config: &Config,
) -> anyhow::Result<StartingPoints> {
    // Rule 1: no clean request yet.
    let Some(clean) = clean else {
        let genesis = ReplayPoint { rc: config.genesis_rc, sc: config.genesis_sc, ts: config.genesis_ts() };
        return Ok(StartingPoints {
            clean_replay: genesis,
            processing: genesis,
            event_publishing_next_local_offset: 0,
            rewound_sequencer_counter_prehead: SequencerCounterPrehead { sc: config.genesis_sc, ts: config.genesis_ts() },
        });
    };

    // Rule 4: repair requests replay from their shared tombstone timestamp
    // and never rewind the sequencer-counter prehead — the repair was
    // already applied out of band.
    if let Some(repair) = &clean.repair_context {
        let point = ReplayPoint { rc: clean.rc.succ(), sc: prehead.sc, ts: repair.tombstone_ts };
        return Ok(StartingPoints {
            clean_replay: point,
            processing: point,
            event_publishing_next_local_offset: next_local_offset,
            rewound_sequencer_counter_prehead: prehead,
        });
    }

    let commit_ts = clean.commit_ts;

    // Rule 2 bullet 2: the next request is unambiguously past commitTs with
    // nothing else in flight in between — skip the clean request itself.
    let unambiguous_skip = prehead.ts >= commit_ts
        && successor.as_ref().is_some_and(|s| s.request_ts > commit_ts);

    if let Some(successor) = &successor {
        if unambiguous_skip {
            let point = ReplayPoint { rc: successor.rc, sc: successor.sc, ts: successor.request_ts };
            return Ok(StartingPoints {
                clean_replay: point,
                processing: point,
                event_publishing_next_local_offset: next_local_offset,
                rewound_sequencer_counter_prehead: prehead,
            });
        }
    }

    // Rule 2 bullet 1, and rule 3's ambiguous/overlapping fallback: rewind to
    // the clean request's own timestamp. Applies both when the prehead is
    // strictly before commitTs, and when it is not but no unambiguous
    // successor rules out overlap (multiple in-flight commits racing the
    // clean prehead).
    let rewound_sc = prehead.sc.pred();
    let clean_replay = ReplayPoint { rc: clean.rc, sc: rewound_sc, ts: clean.request_ts.pred()? };
    let processing = ReplayPoint { rc: clean.rc.succ(), sc: prehead.sc, ts: clean.request_ts };
    let rewound_prehead = SequencerCounterPrehead { sc: rewound_sc, ts: clean.request_ts };

    Ok(StartingPoints {
        clean_replay,
        processing,
        event_publishing_next_local_offset: next_local_offset,
        rewound_sequencer_counter_prehead: rewound_prehead,
    })
}

#[cfg(test)]
mod tests {
    use domain::request::RequestCounter;

    use super::*;

    /// Starting point when the sequencer-counter prehead is still in flight
    /// relative to the clean request's commit time.
    #[test]
    fn s2_starting_point_with_in_flight_sequencer_counter() {
        let clean = CleanRequestInfo {
            rc: RequestCounter(0),
            request_ts: Timestamp::from_micros(0),
            commit_ts: Timestamp::from_micros(5),
            repair_context: None,
        };
        let prehead = SequencerCounterPrehead { sc: SequencerCounter(11), ts: Timestamp::from_micros(1) };
        let points = compute_starting_point(Some(clean), None, prehead, 0, &Config::default()).unwrap();

        assert_eq!(points.clean_replay.rc, RequestCounter(0));
        assert_eq!(points.clean_replay.sc, SequencerCounter(10));
        assert_eq!(points.clean_replay.ts, Timestamp::from_micros(0).pred().unwrap());

        assert_eq!(points.processing.rc, RequestCounter(1));
        assert_eq!(points.processing.sc, SequencerCounter(11));
        assert_eq!(points.processing.ts, Timestamp::from_micros(0));

        assert_eq!(points.rewound_sequencer_counter_prehead.sc, SequencerCounter(10));
        assert_eq!(points.rewound_sequencer_counter_prehead.ts, Timestamp::from_micros(0));
    }

    #[test]
    fn rule1_no_clean_request_uses_genesis_defaults() {
        let config = Config { genesis_rc: RequestCounter(7), genesis_sc: SequencerCounter(3) };
        let prehead = SequencerCounterPrehead { sc: SequencerCounter(99), ts: Timestamp::from_micros(100) };
        let points = compute_starting_point(None, None, prehead, 42, &config).unwrap();
        assert_eq!(points.clean_replay, ReplayPoint { rc: RequestCounter(7), sc: SequencerCounter(3), ts: Timestamp::MIN });
        assert_eq!(points.processing, points.clean_replay);
        assert_eq!(points.event_publishing_next_local_offset, 0);
    }

    #[test]
    fn rule2_bullet2_skips_clean_request_when_successor_unambiguously_past_commit() {
        let clean = CleanRequestInfo {
            rc: RequestCounter(4),
            request_ts: Timestamp::from_micros(40),
            commit_ts: Timestamp::from_micros(45),
            repair_context: None,
        };
        let successor = JournalSuccessor { rc: RequestCounter(5), request_ts: Timestamp::from_micros(50), sc: SequencerCounter(20) };
        let prehead = SequencerCounterPrehead { sc: SequencerCounter(20), ts: Timestamp::from_micros(50) };
        let points = compute_starting_point(Some(clean), Some(successor), prehead, 7, &Config::default()).unwrap();

        assert_eq!(points.clean_replay, points.processing);
        assert_eq!(points.clean_replay.rc, RequestCounter(5));
        assert_eq!(points.clean_replay.ts, Timestamp::from_micros(50));
        assert_eq!(points.rewound_sequencer_counter_prehead.ts, Timestamp::from_micros(50));
    }

    #[test]
    fn rule3_overlapping_successor_forces_rewind() {
        let clean = CleanRequestInfo {
            rc: RequestCounter(4),
            request_ts: Timestamp::from_micros(40),
            commit_ts: Timestamp::from_micros(45),
            repair_context: None,
        };
        // Successor's request_ts <= commitTs: overlapping, not unambiguous.
        let successor = JournalSuccessor { rc: RequestCounter(5), request_ts: Timestamp::from_micros(42), sc: SequencerCounter(12) };
        let prehead = SequencerCounterPrehead { sc: SequencerCounter(12), ts: Timestamp::from_micros(46) };
        let points = compute_starting_point(Some(clean), Some(successor), prehead, 0, &Config::default()).unwrap();

        assert_eq!(points.clean_replay.rc, RequestCounter(4));
        assert_eq!(points.clean_replay.ts, Timestamp::from_micros(40).pred().unwrap());
        assert_eq!(points.processing.rc, RequestCounter(5));
    }

    #[test]
    fn rule4_repair_advances_without_rewinding_prehead() {
        let clean = CleanRequestInfo {
            rc: RequestCounter(2),
            request_ts: Timestamp::from_micros(20),
            commit_ts: Timestamp::from_micros(20),
            repair_context: Some(RepairContext { tombstone_ts: Timestamp::from_micros(25), description: "fix".into() }),
        };
        let prehead = SequencerCounterPrehead { sc: SequencerCounter(9), ts: Timestamp::from_micros(30) };
        let points = compute_starting_point(Some(clean), None, prehead, 3, &Config::default()).unwrap();

        assert_eq!(points.clean_replay.ts, Timestamp::from_micros(25));
        assert_eq!(points.clean_replay, points.processing);
        assert_eq!(points.rewound_sequencer_counter_prehead.sc, SequencerCounter(9));
        assert_eq!(points.rewound_sequencer_counter_prehead.ts, Timestamp::from_micros(30));
    }
}
