//! Snapshot documents
//!
//! A snapshot is a fast-forward seed for replay. It is produced from a
//! projection state by a snapshot job and is only ever applied when its
//! payload version identifier matches the projector that reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::DocumentType;
use super::ordering_key::OrderingKey;

/// A persisted checkpoint of a projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    /// Unique snapshot id
    pub id: Uuid,

    /// Aggregate the snapshot belongs to (nil for multi-stream projections)
    pub aggregate_id: Uuid,

    /// Stream kind the projection reads
    pub stream_kind: String,

    /// Projection that produced the payload
    pub projection_name: String,

    /// Snapshot partition (see [`crate::types::partition::for_snapshot`])
    pub partition_key: String,

    /// Root tenant
    pub root_partition_key: String,

    /// Always [`DocumentType::Snapshot`]
    pub document_type_name: DocumentType,

    /// Equals `last_ordering_key`; indexed like event keys
    pub ordering_key: OrderingKey,

    /// Serialized projection payload
    pub payload: serde_json::Value,

    /// Version of the projection when captured
    pub saved_version: u64,

    /// Id of the last event folded into the payload
    pub last_event_id: Uuid,

    /// Ordering key of the last event folded into the payload
    pub last_ordering_key: OrderingKey,

    /// Schema identifier of the payload shape
    pub payload_version_identifier: String,

    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl SnapshotDocument {
    /// Whether a projector with `identifier` may apply this snapshot
    pub fn is_compatible_with(&self, identifier: &str) -> bool {
        self.payload_version_identifier == identifier
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}
