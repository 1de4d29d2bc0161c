//! Safe/unsafe consistency window
//!
//! Tracks two cursors over a feed that may deliver events slightly out of
//! global order:
//!
//! - `unsafe_key` moves to the highest key received, immediately.
//! - `safe_key` moves only when the host promotes an event that has been
//!   observed for at least the effective window.
//!
//! With dynamic extension enabled, the effective window grows by an
//! exponential moving average of the delivery lag (capped), which decays
//! while no events arrive. Neither cursor ever moves backwards.

use chrono::{DateTime, Duration, Utc};

use crate::config::ConsistencyWindowConfig;
use crate::types::OrderingKey;
use crate::utils::{elapsed_ms, elapsed_secs_f64};

/// Cursor pair plus lag estimate for one multi-stream projection
#[derive(Debug, Clone)]
pub struct ConsistencyWindow {
    config: ConsistencyWindowConfig,
    safe_key: Option<OrderingKey>,
    unsafe_key: Option<OrderingKey>,
    lag_ema_ms: f64,
    last_lag_update: Option<DateTime<Utc>>,
}

impl ConsistencyWindow {
    pub fn new(config: ConsistencyWindowConfig) -> Self {
        Self {
            config,
            safe_key: None,
            unsafe_key: None,
            lag_ema_ms: 0.0,
            last_lag_update: None,
        }
    }

    pub fn config(&self) -> &ConsistencyWindowConfig {
        &self.config
    }

    pub fn safe_key(&self) -> Option<&OrderingKey> {
        self.safe_key.as_ref()
    }

    pub fn unsafe_key(&self) -> Option<&OrderingKey> {
        self.unsafe_key.as_ref()
    }

    /// Raw lag average at the last update (not decayed)
    pub fn lag_ema_ms(&self) -> f64 {
        self.lag_ema_ms
    }

    /// Record that an event with `key` was received at `now`
    ///
    /// `measure_lag` is false for events replayed from the store, whose age
    /// says nothing about delivery lag.
    pub fn observe_at(&mut self, key: &OrderingKey, now: DateTime<Utc>, measure_lag: bool) {
        if self.unsafe_key.as_ref().map_or(true, |current| key > current) {
            self.unsafe_key = Some(key.clone());
        }

        if !(measure_lag && self.config.enable_dynamic) {
            return;
        }
        let Some(written_at) = key.timestamp() else {
            return;
        };

        let lag = elapsed_ms(written_at, now) as f64;
        let alpha = self.config.alpha();
        self.lag_ema_ms = alpha * lag + (1.0 - alpha) * self.decayed_lag_at(now);
        self.last_lag_update = Some(now);
    }

    /// Lag average decayed for the idle time since the last update
    pub fn decayed_lag_at(&self, now: DateTime<Utc>) -> f64 {
        match self.last_lag_update {
            Some(at) => {
                let idle = elapsed_secs_f64(at, now);
                self.lag_ema_ms * self.config.decay_per_second().powf(idle)
            }
            None => self.lag_ema_ms,
        }
    }

    /// Extra milliseconds added to the base window
    pub fn dynamic_extension_ms_at(&self, now: DateTime<Utc>) -> u64 {
        if !self.config.enable_dynamic {
            return 0;
        }
        let extra = self.decayed_lag_at(now).max(0.0).round() as u64;
        extra.min(self.config.max_extra_window_ms)
    }

    /// Base window plus the capped dynamic extension
    pub fn effective_window_ms_at(&self, now: DateTime<Utc>) -> u64 {
        self.config.safe_window_ms + self.dynamic_extension_ms_at(now)
    }

    /// Whether an event observed at `observed_at` counts as settled at `now`
    pub fn is_settled_at(&self, observed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        elapsed_ms(observed_at, now) >= self.effective_window_ms_at(now)
    }

    /// Canonical key of the instant `now - effective window`
    pub fn safe_threshold_at(&self, now: DateTime<Utc>) -> OrderingKey {
        let window = Duration::milliseconds(self.effective_window_ms_at(now) as i64);
        OrderingKey::safe_threshold(now, window)
    }

    /// Move the safe cursor forward to `key`; never backwards
    pub fn advance_safe(&mut self, key: &OrderingKey) -> bool {
        if self.safe_key.as_ref().is_some_and(|current| key <= current) {
            return false;
        }
        self.safe_key = Some(key.clone());
        if self.unsafe_key.as_ref().map_or(true, |current| key > current) {
            self.unsafe_key = Some(key.clone());
        }
        true
    }

    /// Whether `key` is at or behind the safe cursor
    pub fn is_behind_safe(&self, key: &OrderingKey) -> bool {
        self.safe_key.as_ref().is_some_and(|safe| key <= safe)
    }
}

impl Default for ConsistencyWindow {
    fn default() -> Self {
        Self::new(ConsistencyWindowConfig::default())
    }
}
