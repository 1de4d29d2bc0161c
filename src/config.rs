//! Engine configuration
//!
//! Defaults suit a single-process deployment; every knob can be overridden
//! from the environment or a JSON file.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::utils::atomic_write;

/// Environment variable naming the durable data directory
pub const DATA_DIR_ENV: &str = "HYBRID_REPLAY_DATA_DIR";

/// Environment variable toggling the hybrid cache ("0"/"false" disables)
pub const HYBRID_ENV: &str = "HYBRID_REPLAY_HYBRID";

/// Environment variable overriding the base safe window in milliseconds
pub const SAFE_WINDOW_ENV: &str = "HYBRID_REPLAY_SAFE_WINDOW_MS";

/// Storage policy for one stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPolicy {
    /// Mirror durable partitions in the temporary store
    #[serde(default)]
    pub hybrid: bool,
    /// Never touch the durable tier (state is lost on restart)
    #[serde(default)]
    pub in_memory_only: bool,
}

impl StreamPolicy {
    /// Durable writes, no mirroring
    pub const fn durable() -> Self {
        Self {
            hybrid: false,
            in_memory_only: false,
        }
    }

    /// Durable writes with hybrid mirroring
    pub const fn hybrid() -> Self {
        Self {
            hybrid: true,
            in_memory_only: false,
        }
    }

    /// Temporary store only
    pub const fn in_memory() -> Self {
        Self {
            hybrid: false,
            in_memory_only: true,
        }
    }
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self::durable()
    }
}

/// Per-stream-kind storage policies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSettings {
    /// Applied to stream kinds without an explicit entry
    #[serde(default)]
    pub default_policy: StreamPolicy,
    /// Explicit policies keyed by stream kind
    #[serde(default)]
    pub streams: HashMap<String, StreamPolicy>,
}

impl AggregateSettings {
    /// Settings where every stream kind uses `policy`
    pub fn with_default(policy: StreamPolicy) -> Self {
        Self {
            default_policy: policy,
            streams: HashMap::new(),
        }
    }

    /// Set the policy for one stream kind
    pub fn with_stream(mut self, stream_kind: impl Into<String>, policy: StreamPolicy) -> Self {
        self.streams.insert(stream_kind.into(), policy);
        self
    }

    /// Policy in effect for a stream kind
    pub fn policy_for(&self, stream_kind: &str) -> StreamPolicy {
        self.streams
            .get(stream_kind)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Whether durable partitions of this kind may be mirrored in memory
    pub fn can_use_hybrid(&self, stream_kind: &str) -> bool {
        let policy = self.policy_for(stream_kind);
        policy.hybrid && !policy.in_memory_only
    }

    /// Whether this kind lives in the temporary store only
    pub fn is_in_memory_only(&self, stream_kind: &str) -> bool {
        self.policy_for(stream_kind).in_memory_only
    }
}

/// Safe/unsafe window parameters for multi-stream projections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyWindowConfig {
    /// Base settle time before an event counts as safe
    pub safe_window_ms: u64,
    /// Extend the window by the observed delivery lag
    pub enable_dynamic: bool,
    /// Upper bound for the dynamic extension
    pub max_extra_window_ms: u64,
    /// EMA smoothing factor, clamped to [0.01, 1.0]
    pub lag_ema_alpha: f64,
    /// Per-second decay of the EMA while idle, clamped to [0.5, 1.0]
    pub lag_decay_per_second: f64,
}

impl Default for ConsistencyWindowConfig {
    fn default() -> Self {
        Self {
            safe_window_ms: 20_000,
            enable_dynamic: false,
            max_extra_window_ms: 30_000,
            lag_ema_alpha: 0.3,
            lag_decay_per_second: 0.98,
        }
    }
}

impl ConsistencyWindowConfig {
    /// Fixed window without dynamic extension
    pub fn fixed(safe_window_ms: u64) -> Self {
        Self {
            safe_window_ms,
            ..Default::default()
        }
    }

    /// Enable dynamic extension with the given cap
    pub fn with_dynamic(mut self, max_extra_window_ms: u64) -> Self {
        self.enable_dynamic = true;
        self.max_extra_window_ms = max_extra_window_ms;
        self
    }

    /// Smoothing factor actually used
    pub fn alpha(&self) -> f64 {
        self.lag_ema_alpha.clamp(0.01, 1.0)
    }

    /// Decay factor actually used
    pub fn decay_per_second(&self) -> f64 {
        self.lag_decay_per_second.clamp(0.5, 1.0)
    }
}

/// Top-level configuration for an engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Directory of the JSONL durable store
    pub data_dir: PathBuf,
    /// Master switch for the hybrid manager
    pub hybrid_enabled: bool,
    /// Per-stream-kind storage policies
    #[serde(default)]
    pub streams: AggregateSettings,
    /// Safe/unsafe window for multi-stream projections
    #[serde(default)]
    pub window: ConsistencyWindowConfig,
    /// Capacity of the append broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            hybrid_enabled: true,
            streams: AggregateSettings::with_default(StreamPolicy::hybrid()),
            window: ConsistencyWindowConfig::default(),
            broadcast_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Create config with custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Read overrides from the environment on top of the defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            let path = PathBuf::from(dir);
            config.data_dir = if path.is_absolute() {
                path
            } else {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(path)
            };
        }

        if let Ok(flag) = env::var(HYBRID_ENV) {
            config.hybrid_enabled = parse_flag(&flag).unwrap_or(config.hybrid_enabled);
        }

        if let Some(ms) = env::var(SAFE_WINDOW_ENV).ok().and_then(|v| v.trim().parse().ok()) {
            config.window.safe_window_ms = ms;
        }

        config
    }

    /// Load from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write as pretty JSON, replacing any existing file atomically
    pub fn save_json_file<P: AsRef<Path>>(&self, path: P) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, &content)
    }

    pub fn with_hybrid_enabled(mut self, enabled: bool) -> Self {
        self.hybrid_enabled = enabled;
        self
    }

    pub fn with_streams(mut self, streams: AggregateSettings) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_window(mut self, window: ConsistencyWindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Get path to events.jsonl
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Get path to snapshots directory
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
