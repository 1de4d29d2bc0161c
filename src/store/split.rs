//! Repository/writer split
//!
//! Routes every read and write to the temporary tier, the durable tier, or
//! both, consulting the per-stream-kind policy and the hybrid manager.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::config::AggregateSettings;
use crate::error::StoreResult;
use crate::publish::EventPublisher;
use crate::types::{Event, OrderingKey, SnapshotDocument};

use super::hybrid::HybridStoreManager;
use super::temporary::TemporaryStore;
use super::{finish_query, DocumentRepository, DocumentStore, DocumentWriter, EventQuery, SnapshotQuery};

/// The collaborators shared by the split repository and writer
#[derive(Clone)]
pub struct StoreTiers {
    pub temporary: Arc<TemporaryStore>,
    pub durable: Arc<dyn DocumentStore>,
    pub hybrid: Arc<HybridStoreManager>,
    pub settings: Arc<AggregateSettings>,
}

impl StoreTiers {
    pub fn new(
        temporary: Arc<TemporaryStore>,
        durable: Arc<dyn DocumentStore>,
        hybrid: Arc<HybridStoreManager>,
        settings: AggregateSettings,
    ) -> Self {
        Self {
            temporary,
            durable,
            hybrid,
            settings: Arc::new(settings),
        }
    }

    fn in_memory_only(&self, stream_kind: &str) -> bool {
        self.settings.is_in_memory_only(stream_kind)
    }

    fn hybrid_for(&self, stream_kind: &str) -> bool {
        self.hybrid.is_enabled() && self.settings.can_use_hybrid(stream_kind)
    }
}

/// Read side of the split
#[derive(Clone)]
pub struct SplitRepository {
    tiers: StoreTiers,
}

impl SplitRepository {
    pub fn new(tiers: StoreTiers) -> Self {
        Self { tiers }
    }

    /// Whether the temporary tier may answer this partition read
    fn is_hybrid_hit(&self, root: &str, partition_key: &str, since: Option<&OrderingKey>) -> bool {
        let Some(status) = self.tiers.hybrid.status_for(partition_key) else {
            return false;
        };
        match since {
            None => status.from_initial,
            Some(since) => {
                status.cursor.as_ref() == Some(since)
                    || self.tiers.temporary.has_ordering_key(root, partition_key, since)
            }
        }
    }

    async fn partition_events(&self, query: &EventQuery, partition_key: &str, stream_kind: &str) -> StoreResult<Vec<Event>> {
        let tiers = &self.tiers;
        let root = query.root_partition_key.as_str();

        if tiers.in_memory_only(stream_kind) {
            return Ok(tiers.temporary.query(query));
        }

        let use_hybrid = tiers.hybrid_for(stream_kind);
        if use_hybrid && self.is_hybrid_hit(root, partition_key, query.since.as_ref()) {
            trace!(partition_key, since = ?query.since, "hybrid hit");
            return Ok(tiers.temporary.query(query));
        }

        if !use_hybrid {
            return tiers.durable.get_events(query).await;
        }

        // Backfill needs the whole range, so the limit is applied afterwards
        let mut full_range = query.clone();
        full_range.max_count = None;
        let events = tiers.durable.get_events(&full_range).await?;

        let added = tiers.temporary.add_events(events.iter().cloned());
        let improved = tiers.hybrid.improve_partition(partition_key, query.since.as_ref());
        debug!(
            partition_key,
            since = ?query.since,
            fetched = events.len(),
            added,
            improved,
            "hybrid miss, backfilled from durable store"
        );

        Ok(finish_query(events, query))
    }

    async fn broad_scan(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let tiers = &self.tiers;

        let (memory_kinds, durable_kinds): (Vec<String>, Vec<String>) = query
            .stream_kinds
            .iter()
            .cloned()
            .partition(|kind| tiers.in_memory_only(kind));

        let mut events = Vec::new();

        if query.stream_kinds.is_empty() {
            let mut unlimited = query.clone();
            unlimited.max_count = None;
            events.extend(tiers.durable.get_events(&unlimited).await?);
            events.extend(
                tiers
                    .temporary
                    .query(&unlimited)
                    .into_iter()
                    .filter(|e| tiers.in_memory_only(&e.stream_kind)),
            );
        } else {
            if !durable_kinds.is_empty() {
                let mut durable_query = query.clone();
                durable_query.stream_kinds = durable_kinds;
                durable_query.max_count = None;
                events.extend(tiers.durable.get_events(&durable_query).await?);
            }
            if !memory_kinds.is_empty() {
                let mut memory_query = query.clone();
                memory_query.stream_kinds = memory_kinds;
                memory_query.max_count = None;
                events.extend(tiers.temporary.query(&memory_query));
            }
        }

        let mut seen = HashSet::new();
        events.retain(|e| seen.insert(e.id));
        Ok(finish_query(events, query))
    }
}

#[async_trait]
impl DocumentRepository for SplitRepository {
    /// Events for a partition or a broad scan, ascending by ordering key
    async fn get_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        match (&query.partition_key, query.stream_kind()) {
            (Some(partition_key), Some(stream_kind)) => {
                self.partition_events(query, partition_key, stream_kind).await
            }
            _ => self.broad_scan(query).await,
        }
    }

    async fn latest_snapshot(&self, query: &SnapshotQuery) -> StoreResult<Option<SnapshotDocument>> {
        if let Some(snapshot) = self.tiers.temporary.find_latest_snapshot(query) {
            return Ok(Some(snapshot));
        }
        if self.tiers.in_memory_only(&query.stream_kind) {
            return Ok(None);
        }
        self.tiers.durable.latest_snapshot(query).await
    }

    async fn snapshot_exists(&self, query: &SnapshotQuery, version: u64) -> StoreResult<bool> {
        if self.tiers.in_memory_only(&query.stream_kind) {
            return Ok(false);
        }
        self.tiers.durable.snapshot_exists(query, version).await
    }
}

/// Write side of the split
#[derive(Clone)]
pub struct SplitWriter {
    tiers: StoreTiers,
    publisher: Arc<EventPublisher>,
}

impl SplitWriter {
    pub fn new(tiers: StoreTiers, publisher: Arc<EventPublisher>) -> Self {
        Self { tiers, publisher }
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Mirror a durably written event if the partition rules allow it
    fn mirror(&self, event: &Event) {
        let tiers = &self.tiers;
        if !tiers.hybrid_for(&event.stream_kind) {
            return;
        }

        if event.is_initial_event {
            // Events first, then the claim
            tiers.temporary.add_event(event.clone());
            tiers.hybrid.add_partition_key(&event.partition_key, None, true);
        } else if tiers.hybrid.has_partition(&event.partition_key) {
            tiers.temporary.add_event(event.clone());
        }
    }

    /// Persist one event, mirror it where allowed, then publish it
    pub async fn append_event(&self, event: &Event) -> StoreResult<()> {
        if self.tiers.in_memory_only(&event.stream_kind) {
            self.tiers.temporary.add_event(event.clone());
        } else {
            self.tiers.durable.save_event(event).await?;
            self.mirror(event);
        }
        self.publisher.publish(event);
        Ok(())
    }

    /// Persist a batch; durable kinds are written in one call
    pub async fn append_events(&self, events: &[Event]) -> StoreResult<()> {
        let durable: Vec<Event> = events
            .iter()
            .filter(|e| !self.tiers.in_memory_only(&e.stream_kind))
            .cloned()
            .collect();
        if !durable.is_empty() {
            self.tiers.durable.save_events(&durable).await?;
        }

        for event in events {
            if self.tiers.in_memory_only(&event.stream_kind) {
                self.tiers.temporary.add_event(event.clone());
            } else {
                self.mirror(event);
            }
        }
        for event in events {
            self.publisher.publish(event);
        }
        Ok(())
    }

    /// Snapshots skip the hybrid manager; in-memory-only kinds keep them in memory
    pub async fn write_snapshot(&self, snapshot: &SnapshotDocument) -> StoreResult<()> {
        if self.tiers.in_memory_only(&snapshot.stream_kind) {
            self.tiers.temporary.add_snapshot(snapshot.clone());
            return Ok(());
        }
        self.tiers.durable.save_snapshot(snapshot).await
    }

    /// Wipe both tiers and every hybrid claim
    pub async fn clear_all(&self) -> StoreResult<()> {
        self.tiers.hybrid.clear();
        self.tiers.temporary.clear();
        self.tiers.durable.remove_all().await
    }
}

#[async_trait]
impl DocumentWriter for SplitWriter {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        self.append_event(event).await
    }

    async fn save_events(&self, events: &[Event]) -> StoreResult<()> {
        self.append_events(events).await
    }

    async fn save_snapshot(&self, snapshot: &SnapshotDocument) -> StoreResult<()> {
        self.write_snapshot(snapshot).await
    }

    async fn remove_all(&self) -> StoreResult<()> {
        self.clear_all().await
    }
}
