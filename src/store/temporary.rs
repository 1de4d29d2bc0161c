//! Temporary (in-memory) store
//!
//! Holds events per root tenant, both as one ordered "all events" run and as
//! ordered per-partition runs. A single write lock covers the insert into
//! both lists, so readers never see an event in one list but not the other.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{Event, OrderingKey, SnapshotDocument};

use super::stats::StoreStats;
use super::{finish_query, DocumentRepository, DocumentWriter, EventQuery, SnapshotQuery};

#[derive(Debug, Default)]
struct TenantEvents {
    all: Vec<Event>,
    by_partition: HashMap<String, Vec<Event>>,
    ids: HashSet<Uuid>,
}

impl TenantEvents {
    fn insert(&mut self, event: Event) -> bool {
        if !self.ids.insert(event.id) {
            return false;
        }
        let run = self.by_partition.entry(event.partition_key.clone()).or_default();
        insert_sorted(run, event.clone());
        insert_sorted(&mut self.all, event);
        true
    }
}

/// Keep `run` ascending by ordering key; appends are the common case
fn insert_sorted(run: &mut Vec<Event>, event: Event) {
    match run.last() {
        Some(last) if last.ordering_key > event.ordering_key => {
            let at = run.partition_point(|e| e.ordering_key <= event.ordering_key);
            run.insert(at, event);
        }
        _ => run.push(event),
    }
}

/// Events strictly after `since` from an ascending run
fn after<'a>(run: &'a [Event], since: Option<&OrderingKey>) -> &'a [Event] {
    match since {
        Some(since) => {
            let start = run.partition_point(|e| e.ordering_key <= *since);
            &run[start..]
        }
        None => run,
    }
}

/// Process-local event and snapshot container
#[derive(Debug, Default)]
pub struct TemporaryStore {
    tenants: RwLock<HashMap<String, TenantEvents>>,
    snapshots: RwLock<HashMap<String, Vec<SnapshotDocument>>>,
}

impl TemporaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one event; returns false if an event with the same id is present
    pub fn add_event(&self, event: Event) -> bool {
        let mut tenants = self.tenants.write();
        tenants
            .entry(event.root_partition_key.clone())
            .or_default()
            .insert(event)
    }

    /// Add many events under one lock; returns how many were new
    pub fn add_events<I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = Event>,
    {
        let mut tenants = self.tenants.write();
        events
            .into_iter()
            .filter(|event| {
                tenants
                    .entry(event.root_partition_key.clone())
                    .or_default()
                    .insert(event.clone())
            })
            .count()
    }

    /// Whether an event with this id is already held for the tenant
    pub fn has_event_id(&self, root_partition_key: &str, id: Uuid) -> bool {
        self.tenants
            .read()
            .get(root_partition_key)
            .is_some_and(|tenant| tenant.ids.contains(&id))
    }

    /// Ordered events of one partition, strictly after `since`
    pub fn partition_events(
        &self,
        root_partition_key: &str,
        partition_key: &str,
        since: Option<&OrderingKey>,
    ) -> Vec<Event> {
        let tenants = self.tenants.read();
        tenants
            .get(root_partition_key)
            .and_then(|tenant| tenant.by_partition.get(partition_key))
            .map(|run| after(run, since).to_vec())
            .unwrap_or_default()
    }

    /// Whether the partition holds an event at exactly `key`
    pub fn has_ordering_key(&self, root_partition_key: &str, partition_key: &str, key: &OrderingKey) -> bool {
        let tenants = self.tenants.read();
        tenants
            .get(root_partition_key)
            .and_then(|tenant| tenant.by_partition.get(partition_key))
            .is_some_and(|run| run.binary_search_by(|e| e.ordering_key.cmp(key)).is_ok())
    }

    /// Events matching an arbitrary query, ascending
    pub fn query(&self, query: &EventQuery) -> Vec<Event> {
        let tenants = self.tenants.read();
        let Some(tenant) = tenants.get(&query.root_partition_key) else {
            return Vec::new();
        };

        let run: &[Event] = match &query.partition_key {
            Some(partition_key) => match tenant.by_partition.get(partition_key) {
                Some(run) => run.as_slice(),
                None => return Vec::new(),
            },
            None => tenant.all.as_slice(),
        };

        let events = after(run, query.since.as_ref())
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        finish_query(events, query)
    }

    /// Store a snapshot document
    pub fn add_snapshot(&self, snapshot: SnapshotDocument) {
        let mut snapshots = self.snapshots.write();
        let entries = snapshots.entry(snapshot.partition_key.clone()).or_default();
        entries.retain(|s| s.id != snapshot.id);
        entries.push(snapshot);
    }

    /// Newest compatible snapshot for the query
    pub fn find_latest_snapshot(&self, query: &SnapshotQuery) -> Option<SnapshotDocument> {
        let snapshots = self.snapshots.read();
        snapshots
            .get(&query.partition_key())?
            .iter()
            .filter(|s| query.matches(s))
            .max_by(|a, b| {
                a.saved_version
                    .cmp(&b.saved_version)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
            .cloned()
    }

    /// Whether a compatible snapshot exists at `version`
    pub fn has_snapshot(&self, query: &SnapshotQuery, version: u64) -> bool {
        let snapshots = self.snapshots.read();
        snapshots
            .get(&query.partition_key())
            .is_some_and(|entries| entries.iter().any(|s| query.matches(s) && s.saved_version == version))
    }

    /// Drop every event and snapshot
    pub fn clear(&self) {
        self.tenants.write().clear();
        self.snapshots.write().clear();
    }

    /// Total number of events across tenants
    pub fn len(&self) -> usize {
        self.tenants.read().values().map(|t| t.all.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters for this tier
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        {
            let tenants = self.tenants.read();
            for tenant in tenants.values() {
                stats.partition_count += tenant.by_partition.len();
                for event in &tenant.all {
                    stats.record_event(&event.payload_type);
                }
            }
        }
        stats.snapshot_count = self.snapshots.read().values().map(Vec::len).sum();
        stats
    }
}

#[async_trait]
impl DocumentRepository for TemporaryStore {
    async fn get_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        Ok(self.query(query))
    }

    async fn latest_snapshot(&self, query: &SnapshotQuery) -> StoreResult<Option<SnapshotDocument>> {
        Ok(self.find_latest_snapshot(query))
    }

    async fn snapshot_exists(&self, query: &SnapshotQuery, version: u64) -> StoreResult<bool> {
        Ok(self.has_snapshot(query, version))
    }
}

#[async_trait]
impl DocumentWriter for TemporaryStore {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        self.add_event(event.clone());
        Ok(())
    }

    async fn save_events(&self, events: &[Event]) -> StoreResult<()> {
        self.add_events(events.iter().cloned());
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &SnapshotDocument) -> StoreResult<()> {
        self.add_snapshot(snapshot.clone());
        Ok(())
    }

    async fn remove_all(&self) -> StoreResult<()> {
        self.clear();
        Ok(())
    }
}
