//! Tracing subscriber setup
//!
//! The library only emits `tracing` events. Hosts that do not install their
//! own subscriber can call [`init_tracing`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directive (e.g. `hybrid_replay=debug`)
pub const LOG_ENV: &str = "HYBRID_REPLAY_LOG";

/// Install a fmt subscriber filtered by `HYBRID_REPLAY_LOG`, or `default_filter`
///
/// Returns `false` when a global subscriber was already installed, which
/// makes the call safe to repeat from tests.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
