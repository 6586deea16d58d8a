//! A totally-ordered instant with microsecond resolution, the single
//! currency every engine in this workspace orders events, watermarks,
//! checkpoints, and commitments by.
//!
//! A newtype'd `u64` with an explicit smallest-unit `succ`/`pred` for the
//! "add one tick at the caller's boundary" idiom used when turning an
//! inclusive bound into an exclusive one.

use std::{
    fmt,
    ops::{
        Add,
        Sub,
    },
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct Timestamp(i64);

impl Timestamp {
    /// Distinguished minimum, used as the default starting point when no
    /// clean request has ever been recorded.
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// The smallest representable unit, added at a caller's boundary to turn
    /// an inclusive lower bound into `fromTsExclusive`.
    pub fn succ(&self) -> anyhow::Result<Timestamp> {
        self.0.checked_add(1).map(Timestamp).ok_or_else(|| anyhow::anyhow!("timestamp overflow on succ()"))
    }

    pub fn pred(&self) -> anyhow::Result<Timestamp> {
        self.0.checked_sub(1).map(Timestamp).ok_or_else(|| anyhow::anyhow!("timestamp underflow on pred()"))
    }

    /// Aligns down to the nearest multiple-of-`interval_secs` tick, for
    /// commitment-period bookkeeping.
    pub fn align_down(&self, interval: Duration) -> Timestamp {
        let interval_micros = interval.as_micros() as i64;
        if interval_micros <= 0 {
            return *self;
        }
        Timestamp(self.0.div_euclid(interval_micros) * interval_micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(v: i64) -> Self {
        Timestamp(v)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs.as_micros() as i64)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 - rhs.as_micros() as i64)
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        Duration::from_micros((self.0 - rhs.0).max(0) as u64)
    }
}

impl TryFrom<std::time::SystemTime> for Timestamp {
    type Error = anyhow::Error;

    fn try_from(t: std::time::SystemTime) -> anyhow::Result<Self> {
        let dur = t.duration_since(std::time::UNIX_EPOCH)?;
        Ok(Timestamp(dur.as_micros() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succ_pred_roundtrip() {
        let t = Timestamp::from_micros(100);
        assert_eq!(t.succ().unwrap().pred().unwrap(), t);
    }

    #[test]
    fn align_down_is_idempotent() {
        let t = Timestamp::from_micros(12_345_678);
        let interval = Duration::from_secs(5);
        let aligned = t.align_down(interval);
        assert_eq!(aligned, aligned.align_down(interval));
        assert!(aligned <= t);
    }

    #[test]
    fn min_is_less_than_everything() {
        assert!(Timestamp::MIN < Timestamp::from_micros(0));
        assert!(Timestamp::MIN < Timestamp::MAX);
    }
}
