//! Ordering keys for the global event order
//!
//! An ordering key is a plain string whose lexicographic order equals the
//! chronological order of events. Canonical keys are 30 ASCII digits:
//!
//! ```text
//! 0638412345678901234 00012345678
//! └── 19-digit ticks ─┘└ 11-digit tie-breaker ┘
//! ```
//!
//! Ticks are 100 ns intervals since 0001-01-01T00:00:00Z. The tie-breaker is
//! derived from the event UUID, so two events written in the same tick still
//! get distinct, stable keys.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of digits used for the tick component
pub const TICK_DIGITS: usize = 19;

/// Number of digits used for the tie-breaker component
pub const TIE_BREAKER_DIGITS: usize = 11;

/// Ticks between 0001-01-01 and the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;

const TIE_BREAKER_MODULUS: u128 = 100_000_000_000;

/// A totally ordered, string-comparable event position
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingKey(String);

impl OrderingKey {
    /// Wrap an existing key without validation
    ///
    /// Any string is accepted; only canonical keys (see [`OrderingKey::generate`])
    /// can be decoded back into a timestamp.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build the canonical key for an event written at `time` with id `id`
    pub fn generate(time: DateTime<Utc>, id: Uuid) -> Self {
        let ticks = to_ticks(time);
        let tie = (id.as_u128() % TIE_BREAKER_MODULUS) as u64;
        Self(format!(
            "{:0tw$}{:0bw$}",
            ticks,
            tie,
            tw = TICK_DIGITS,
            bw = TIE_BREAKER_DIGITS
        ))
    }

    /// Canonical key for an event written now
    pub fn now(id: Uuid) -> Self {
        Self::generate(Utc::now(), id)
    }

    /// The smallest canonical key at `now - window`
    ///
    /// Every event written at or before that instant compares less than or
    /// equal to the returned key's tick prefix, which makes it usable as a
    /// "settled up to here" threshold.
    pub fn safe_threshold(now: DateTime<Utc>, window: Duration) -> Self {
        Self::generate(now - window, Uuid::nil())
    }

    /// Borrow the raw string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the raw string
    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether this key follows the 30-digit canonical layout
    pub fn is_canonical(&self) -> bool {
        self.0.len() == TICK_DIGITS + TIE_BREAKER_DIGITS && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    /// Decode the write time of a canonical key
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if !self.is_canonical() {
            return None;
        }
        let ticks: i64 = self.0[..TICK_DIGITS].parse().ok()?;
        from_ticks(ticks)
    }

    /// Strictly earlier in the global order
    pub fn is_earlier_than(&self, other: &OrderingKey) -> bool {
        self < other
    }

    /// Strictly later in the global order
    pub fn is_later_than(&self, other: &OrderingKey) -> bool {
        self > other
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderingKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OrderingKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for OrderingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn to_ticks(time: DateTime<Utc>) -> i64 {
    let seconds = time.timestamp();
    let sub_ticks = i64::from(time.timestamp_subsec_nanos() / 100);
    let ticks = UNIX_EPOCH_TICKS + seconds * TICKS_PER_SECOND + sub_ticks;
    ticks.max(0)
}

fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks - UNIX_EPOCH_TICKS;
    let seconds = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::<Utc>::from_timestamp(seconds, nanos)
}
