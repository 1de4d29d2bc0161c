//! Event documents for Event Sourcing
//!
//! Events are immutable facts. The write path creates them once; stores hand
//! out clones, never references into their own buffers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ordering_key::OrderingKey;
use super::partition;

/// Kind of persisted document, stored as the indexed `documentTypeName` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// An event in an aggregate's ordered run
    Event,
    /// A fast-forward checkpoint of a projection
    Snapshot,
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentType::Event => write!(f, "Event"),
            DocumentType::Snapshot => write!(f, "Snapshot"),
        }
    }
}

/// An immutable event in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id
    pub id: Uuid,

    /// Position in the global order
    pub ordering_key: OrderingKey,

    /// Aggregate this event belongs to
    pub aggregate_id: Uuid,

    /// Stream kind (aggregate type name)
    pub stream_kind: String,

    /// Derived from root tenant + stream kind + aggregate id
    pub partition_key: String,

    /// Root tenant
    pub root_partition_key: String,

    /// Always [`DocumentType::Event`]
    pub document_type_name: DocumentType,

    /// Type tag used to dispatch to a transition handler
    pub payload_type: String,

    /// Opaque payload
    pub payload: serde_json::Value,

    /// 1-based position within the aggregate
    pub version: u64,

    /// Whether this event starts the aggregate's lifecycle
    #[serde(default)]
    pub is_initial_event: bool,

    /// Wall-clock write time
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create the event at `version` for an aggregate, keyed at the current time
    ///
    /// `version == 1` marks the event as the aggregate's initial event.
    pub fn new(
        stream_kind: impl Into<String>,
        aggregate_id: Uuid,
        root_partition_key: impl Into<String>,
        payload_type: impl Into<String>,
        payload: serde_json::Value,
        version: u64,
    ) -> Self {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let stream_kind = stream_kind.into();
        let root_partition_key = root_partition_key.into();
        Self {
            id,
            ordering_key: OrderingKey::generate(created_at, id),
            aggregate_id,
            partition_key: partition::for_aggregate(&root_partition_key, &stream_kind, aggregate_id),
            stream_kind,
            root_partition_key,
            document_type_name: DocumentType::Event,
            payload_type: payload_type.into(),
            payload,
            version,
            is_initial_event: version == 1,
            created_at,
        }
    }

    /// Override the id (the ordering key is left untouched)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Override the ordering key (tests, migrations)
    pub fn with_ordering_key(mut self, key: impl Into<OrderingKey>) -> Self {
        self.ordering_key = key.into();
        self
    }

    /// Override the write time and regenerate the canonical ordering key
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.ordering_key = OrderingKey::generate(created_at, self.id);
        self
    }

    /// Override the initial-event flag
    pub fn with_initial_flag(mut self, is_initial_event: bool) -> Self {
        self.is_initial_event = is_initial_event;
        self
    }

    /// Parse the payload as a specific type
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Serialize event to JSON string (for JSONL)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
