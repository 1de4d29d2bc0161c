//! Error types for storage and replay

use uuid::Uuid;

use crate::types::OrderingKey;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for replay operations
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Errors raised by the temporary or durable tier
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The durable backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted document could not be interpreted
    #[error("document corrupted: {0}")]
    Corrupted(String),
}

/// Errors raised while rebuilding projection state
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Lifecycle flag disagrees with the state version. The instance must be
    /// discarded and rebuilt.
    #[error(
        "invalid event sequence for aggregate {aggregate_id}: event {event_id} \
         has is_initial_event={is_initial_event} at version {version}"
    )]
    InvalidEventSequence {
        aggregate_id: Uuid,
        event_id: Uuid,
        version: u64,
        is_initial_event: bool,
    },

    /// An event arrived at or behind the last applied ordering key
    #[error("event {event_id} at {ordering_key} is not after last applied key {last_ordering_key}")]
    EventOrderMixedUp {
        event_id: Uuid,
        ordering_key: OrderingKey,
        last_ordering_key: OrderingKey,
    },

    /// An event for a different aggregate was fed to a per-aggregate state
    #[error("event {event_id} belongs to aggregate {event_aggregate_id}, not {aggregate_id}")]
    ForeignEvent {
        event_id: Uuid,
        event_aggregate_id: Uuid,
        aggregate_id: Uuid,
    },

    /// No transition is registered for the payload type
    #[error("unknown payload type '{0}'")]
    UnknownPayloadType(String),

    #[error("failed to deserialize payload '{payload_type}': {source}")]
    PayloadDeserialization {
        payload_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to deserialize snapshot payload: {0}")]
    SnapshotPayload(#[source] serde_json::Error),

    /// The stream ended before reaching the requested version
    #[error("requested version {requested} but the stream ends at version {reached}")]
    VersionNotReached { requested: u64, reached: u64 },

    /// The host asked this projection instance to stop
    #[error("projection '{0}' is deactivated")]
    Deactivated(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReplayError {
    /// Whether the projection instance that raised this must be rebuilt from scratch
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplayError::InvalidEventSequence { .. }
                | ReplayError::EventOrderMixedUp { .. }
                | ReplayError::ForeignEvent { .. }
                | ReplayError::UnknownPayloadType(_)
                | ReplayError::PayloadDeserialization { .. }
        )
    }
}
