//! Event and snapshot storage
//!
//! Two tiers hold the same documents:
//! - the durable tier (`JsonlDocumentStore`, or any backend implementing
//!   [`DocumentRepository`] + [`DocumentWriter`])
//! - the temporary tier (`TemporaryStore`), a process-local mirror
//!
//! `HybridStoreManager` records which partitions the temporary tier can
//! answer for, and the split repository/writer route every call.
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌──────────┐    ┌────────────┐    ┌───────────────────────┐    ┌───────────┐
//! │ append   │───►│ durable    │───►│ mirror if initial or  │───►│ publish   │
//! │ event    │    │ store      │    │ partition already kept│    │ broadcast │
//! └──────────┘    └────────────┘    └───────────────────────┘    └───────────┘
//!
//! Read Path:
//! ┌──────────────┐  hit   ┌─────────────────┐
//! │ hybrid check │───────►│ temporary store │
//! └──────┬───────┘        └─────────────────┘
//!        │ miss
//!        ▼
//! ┌──────────────┐    ┌───────────────────────────┐
//! │ durable query│───►│ backfill + record cursor  │
//! └──────────────┘    └───────────────────────────┘
//! ```

mod hybrid;
mod jsonl;
mod split;
mod stats;
mod temporary;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{partition, Event, OrderingKey, SnapshotDocument};

pub use hybrid::{HybridStatus, HybridStoreManager};
pub use jsonl::JsonlDocumentStore;
pub use split::{SplitRepository, SplitWriter, StoreTiers};
pub use stats::{DiskSize, StoreStats};
pub use temporary::TemporaryStore;

/// Which events to fetch
///
/// A query either targets one partition (`partition_key` set) or scans a
/// tenant, optionally narrowed to some stream kinds. Results are always in
/// ascending ordering-key order and strictly after `since` when given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub root_partition_key: String,
    pub stream_kinds: Vec<String>,
    pub aggregate_id: Option<Uuid>,
    pub partition_key: Option<String>,
    pub since: Option<OrderingKey>,
    pub max_count: Option<usize>,
}

impl EventQuery {
    /// All events of one aggregate
    pub fn for_aggregate(root_partition_key: &str, stream_kind: &str, aggregate_id: Uuid) -> Self {
        Self {
            root_partition_key: root_partition_key.to_string(),
            stream_kinds: vec![stream_kind.to_string()],
            aggregate_id: Some(aggregate_id),
            partition_key: Some(partition::for_aggregate(root_partition_key, stream_kind, aggregate_id)),
            since: None,
            max_count: None,
        }
    }

    /// Broad scan over some stream kinds of a tenant (empty = every kind)
    pub fn for_streams(root_partition_key: &str, stream_kinds: &[String]) -> Self {
        Self {
            root_partition_key: root_partition_key.to_string(),
            stream_kinds: stream_kinds.to_vec(),
            aggregate_id: None,
            partition_key: None,
            since: None,
            max_count: None,
        }
    }

    /// Only events strictly after `since`
    pub fn since(mut self, since: Option<OrderingKey>) -> Self {
        self.since = since;
        self
    }

    /// Cap the number of returned events
    pub fn limit(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// The single stream kind of a per-aggregate query
    pub fn stream_kind(&self) -> Option<&str> {
        match self.stream_kinds.as_slice() {
            [kind] => Some(kind.as_str()),
            _ => None,
        }
    }

    /// Whether an event falls inside this query (ignores `max_count`)
    pub fn matches(&self, event: &Event) -> bool {
        if event.root_partition_key != self.root_partition_key {
            return false;
        }
        if let Some(partition_key) = &self.partition_key {
            if &event.partition_key != partition_key {
                return false;
            }
        }
        if let Some(aggregate_id) = self.aggregate_id {
            if event.aggregate_id != aggregate_id {
                return false;
            }
        }
        if !self.stream_kinds.is_empty() && !self.stream_kinds.iter().any(|k| k == &event.stream_kind) {
            return false;
        }
        match &self.since {
            Some(since) => event.ordering_key > *since,
            None => true,
        }
    }
}

/// Lookup key for the newest compatible snapshot of an aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotQuery {
    pub root_partition_key: String,
    pub stream_kind: String,
    pub projection_name: String,
    pub aggregate_id: Uuid,
    pub payload_version_identifier: String,
}

impl SnapshotQuery {
    /// Snapshot partition this query reads
    pub fn partition_key(&self) -> String {
        partition::for_snapshot(&self.root_partition_key, &self.projection_name, self.aggregate_id)
    }

    /// Whether a stored snapshot answers this query
    pub fn matches(&self, snapshot: &SnapshotDocument) -> bool {
        snapshot.aggregate_id == self.aggregate_id
            && snapshot.root_partition_key == self.root_partition_key
            && snapshot.projection_name == self.projection_name
            && snapshot.is_compatible_with(&self.payload_version_identifier)
    }
}

/// Read side of a store
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Events matching the query, ascending by ordering key
    async fn get_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>>;

    /// Newest snapshot (highest saved version) matching the query
    async fn latest_snapshot(&self, query: &SnapshotQuery) -> StoreResult<Option<SnapshotDocument>>;

    /// Whether a matching snapshot exists at exactly `version`
    async fn snapshot_exists(&self, query: &SnapshotQuery, version: u64) -> StoreResult<bool>;
}

/// Write side of a store
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Append one event
    async fn save_event(&self, event: &Event) -> StoreResult<()>;

    /// Append many events in order
    async fn save_events(&self, events: &[Event]) -> StoreResult<()> {
        for event in events {
            self.save_event(event).await?;
        }
        Ok(())
    }

    /// Store a snapshot document
    async fn save_snapshot(&self, snapshot: &SnapshotDocument) -> StoreResult<()>;

    /// Delete every document (test/reset scenarios)
    async fn remove_all(&self) -> StoreResult<()>;
}

/// A backend offering both sides
pub trait DocumentStore: DocumentRepository + DocumentWriter {}

impl<T: DocumentRepository + DocumentWriter> DocumentStore for T {}

/// Sort ascending by ordering key and apply `max_count`
pub(crate) fn finish_query(mut events: Vec<Event>, query: &EventQuery) -> Vec<Event> {
    events.sort_by(|a, b| a.ordering_key.cmp(&b.ordering_key));
    if let Some(max) = query.max_count {
        events.truncate(max);
    }
    events
}
