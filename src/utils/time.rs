//! Clock helpers

use chrono::{DateTime, Utc};

/// Milliseconds from `earlier` to `later`, zero if the clock went backwards
pub fn elapsed_ms(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    (later - earlier).num_milliseconds().max(0) as u64
}

/// Fractional seconds from `earlier` to `later`, zero if negative
pub fn elapsed_secs_f64(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    elapsed_ms(earlier, later) as f64 / 1000.0
}
