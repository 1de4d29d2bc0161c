//! JSONL durable store
//!
//! The durable tier used when no external document database is wired in.
//!
//! # File Structure
//!
//! ```text
//! data/
//! ├── events.jsonl                         # append-only event log
//! └── snapshots/
//!     ├── {partition}__{version}.json           # latest snapshot
//!     └── {partition}__{version}.previous.json  # backup of the one before
//! ```
//!
//! Both name parts are hex-escaped (`_XX` per byte outside `[A-Za-z0-9-]`),
//! so distinct keys never share a file and `__` only ever separates them.
//!
//! Every append is fsynced before the in-memory index is updated. The index
//! is rebuilt from the log on open; lines that fail to parse are skipped with
//! a warning so one torn write cannot take the whole log down. A backup whose
//! latest file is missing or unreadable is loaded in its place.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{StoreError, StoreResult};
use crate::types::{Event, SnapshotDocument};
use crate::utils::{cleanup_temp_files, replace_with_backup};

use super::stats::StoreStats;
use super::temporary::TemporaryStore;
use super::{DocumentRepository, DocumentWriter, EventQuery, SnapshotQuery};

const BACKUP_SUFFIX: &str = ".previous.json";

/// File-backed event log plus snapshot directory
#[derive(Debug)]
pub struct JsonlDocumentStore {
    events_path: PathBuf,
    snapshots_dir: PathBuf,
    /// Serializes file writes with their index updates
    write_lock: Mutex<()>,
    index: TemporaryStore,
}

impl JsonlDocumentStore {
    /// Open (or create) a store rooted at `data_dir`
    pub fn open<P: AsRef<Path>>(data_dir: P) -> StoreResult<Self> {
        Self::from_config(&EngineConfig::new(data_dir))
    }

    /// Open the store at the paths named by `config`
    pub fn from_config(config: &EngineConfig) -> StoreResult<Self> {
        let store = Self {
            events_path: config.events_path(),
            snapshots_dir: config.snapshots_dir(),
            write_lock: Mutex::new(()),
            index: TemporaryStore::new(),
        };

        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(&store.snapshots_dir)?;

        let cleaned = cleanup_temp_files(&store.snapshots_dir)?;
        if cleaned > 0 {
            warn!(cleaned, "removed leftover snapshot temp files");
        }

        let events = store.read_event_log()?;
        let loaded = store.index.add_events(events);
        let snapshots = store.read_snapshots()?;
        let snapshot_count = snapshots.len();
        for snapshot in snapshots {
            store.index.add_snapshot(snapshot);
        }

        info!(
            path = %store.events_path.display(),
            events = loaded,
            snapshots = snapshot_count,
            "opened JSONL document store"
        );
        Ok(store)
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    fn read_event_log(&self) -> StoreResult<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.events_path)?);
        let mut events = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            match Event::from_json_line(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(line = line_num + 1, error = %e, "skipping unreadable event line"),
            }
        }

        Ok(events)
    }

    fn read_snapshots(&self) -> StoreResult<Vec<SnapshotDocument>> {
        let mut snapshots = Vec::new();

        for entry in fs::read_dir(&self.snapshots_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(BACKUP_SUFFIX) {
                if !path.with_file_name(format!("{}.json", stem)).exists() {
                    match read_snapshot_file(&path) {
                        Ok(snapshot) => {
                            warn!(path = %path.display(), "latest snapshot missing, using backup");
                            snapshots.push(snapshot);
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "no usable snapshot backup"),
                    }
                }
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }

            match read_snapshot_file(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "snapshot unreadable, trying backup");
                    let backup = backup_path_for(&path);
                    match read_snapshot_file(&backup) {
                        Ok(snapshot) => snapshots.push(snapshot),
                        Err(e) => warn!(path = %backup.display(), error = %e, "no usable snapshot backup"),
                    }
                }
            }
        }

        Ok(snapshots)
    }

    /// Path of the snapshot file for a (partition, payload version) pair
    pub fn snapshot_path(&self, snapshot: &SnapshotDocument) -> PathBuf {
        self.snapshots_dir.join(format!(
            "{}__{}.json",
            encode_file_component(&snapshot.partition_key),
            encode_file_component(&snapshot.payload_version_identifier)
        ))
    }

    fn append_lines(&self, events: &[Event]) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        let fresh: Vec<&Event> = events
            .iter()
            .filter(|e| {
                let known = self.index.has_event_id(&e.root_partition_key, e.id);
                if known {
                    debug!(event_id = %e.id, "event already persisted, skipping");
                }
                !known
            })
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;
        for event in &fresh {
            writeln!(file, "{}", event.to_json_line()?)?;
        }
        file.sync_all()?;

        self.index.add_events(fresh.into_iter().cloned());
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &SnapshotDocument) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        let stored = self.index.find_latest_snapshot(&SnapshotQuery {
            root_partition_key: snapshot.root_partition_key.clone(),
            stream_kind: snapshot.stream_kind.clone(),
            projection_name: snapshot.projection_name.clone(),
            aggregate_id: snapshot.aggregate_id,
            payload_version_identifier: snapshot.payload_version_identifier.clone(),
        });
        if let Some(stored) = stored.filter(|s| s.saved_version > snapshot.saved_version) {
            debug!(
                partition_key = %snapshot.partition_key,
                version = snapshot.saved_version,
                stored = stored.saved_version,
                "newer snapshot already on disk, skipping"
            );
            return Ok(());
        }

        let path = self.snapshot_path(snapshot);
        let json = snapshot.to_json()?;
        replace_with_backup(&path, Some(backup_path_for(&path)), |file| {
            file.write_all(json.as_bytes())
        })?;

        self.index.add_snapshot(snapshot.clone());
        debug!(
            partition_key = %snapshot.partition_key,
            version = snapshot.saved_version,
            "snapshot written"
        );
        Ok(())
    }

    fn wipe(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        if self.events_path.exists() {
            fs::remove_file(&self.events_path)?;
        }
        if self.snapshots_dir.exists() {
            fs::remove_dir_all(&self.snapshots_dir)?;
        }
        fs::create_dir_all(&self.snapshots_dir)?;
        self.index.clear();

        info!(path = %self.events_path.display(), "removed all documents");
        Ok(())
    }

    /// Counters plus on-disk size
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let mut stats = self.index.stats();
        if self.events_path.exists() {
            stats.size_bytes += fs::metadata(&self.events_path)?.len();
        }
        for entry in fs::read_dir(&self.snapshots_dir)? {
            stats.size_bytes += entry?.metadata()?.len();
        }
        Ok(stats)
    }
}

fn read_snapshot_file(path: &Path) -> StoreResult<SnapshotDocument> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(StoreError::Corrupted(format!("empty snapshot file {}", path.display())));
    }
    Ok(SnapshotDocument::from_json(&content)?)
}

fn backup_path_for(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("snapshot");
    path.with_file_name(format!("{}{}", stem, BACKUP_SUFFIX))
}

fn encode_file_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{:02X}", byte));
        }
    }
    encoded
}

#[async_trait]
impl DocumentRepository for JsonlDocumentStore {
    async fn get_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        Ok(self.index.query(query))
    }

    async fn latest_snapshot(&self, query: &SnapshotQuery) -> StoreResult<Option<SnapshotDocument>> {
        Ok(self.index.find_latest_snapshot(query))
    }

    async fn snapshot_exists(&self, query: &SnapshotQuery, version: u64) -> StoreResult<bool> {
        Ok(self.index.has_snapshot(query, version))
    }
}

#[async_trait]
impl DocumentWriter for JsonlDocumentStore {
    async fn save_event(&self, event: &Event) -> StoreResult<()> {
        self.append_lines(std::slice::from_ref(event))
    }

    async fn save_events(&self, events: &[Event]) -> StoreResult<()> {
        self.append_lines(events)
    }

    async fn save_snapshot(&self, snapshot: &SnapshotDocument) -> StoreResult<()> {
        self.write_snapshot(snapshot)
    }

    async fn remove_all(&self) -> StoreResult<()> {
        self.wipe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{partition, DocumentType, OrderingKey};
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn snapshot(aggregate_id: Uuid, version: u64, identifier: &str) -> SnapshotDocument {
        snapshot_in("default", aggregate_id, version, identifier)
    }

    fn snapshot_in(root: &str, aggregate_id: Uuid, version: u64, identifier: &str) -> SnapshotDocument {
        SnapshotDocument {
            id: Uuid::new_v4(),
            aggregate_id,
            stream_kind: "Account".to_string(),
            projection_name: "Account".to_string(),
            partition_key: partition::for_snapshot(root, "Account", aggregate_id),
            root_partition_key: root.to_string(),
            document_type_name: DocumentType::Snapshot,
            ordering_key: OrderingKey::from("0002-b"),
            payload: json!({"balance": version}),
            saved_version: version,
            last_event_id: Uuid::new_v4(),
            last_ordering_key: OrderingKey::from("0002-b"),
            payload_version_identifier: identifier.to_string(),
            created_at: Utc::now(),
        }
    }

    fn query(aggregate_id: Uuid, identifier: &str) -> SnapshotQuery {
        query_in("default", aggregate_id, identifier)
    }

    fn query_in(root: &str, aggregate_id: Uuid, identifier: &str) -> SnapshotQuery {
        SnapshotQuery {
            root_partition_key: root.to_string(),
            stream_kind: "Account".to_string(),
            projection_name: "Account".to_string(),
            aggregate_id,
            payload_version_identifier: identifier.to_string(),
        }
    }

    #[tokio::test]
    async fn test_events_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
            store
                .save_events(&[
                    Event::new("Account", id, "default", "Opened", json!({}), 1),
                    Event::new("Account", id, "default", "Deposited", json!({"amount": 5}), 2),
                ])
                .await
                .unwrap();
        }

        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        let events = store
            .get_events(&EventQuery::for_aggregate("default", "Account", id))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, 1);
        assert_eq!(events[1].payload_type, "Deposited");
    }

    #[tokio::test]
    async fn test_corrupt_line_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
            store
                .save_event(&Event::new("Account", id, "default", "Opened", json!({}), 1))
                .await
                .unwrap();
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(temp_dir.path().join("events.jsonl"))
            .unwrap();
        writeln!(file, "{{\"id\": \"torn").unwrap();

        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.stats().unwrap().event_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_append_writes_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        let event = Event::new("Account", Uuid::new_v4(), "default", "Opened", json!({}), 1);

        store.save_event(&event).await.unwrap();
        store.save_event(&event).await.unwrap();

        let content = fs::read_to_string(store.events_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_latest_and_backup() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();

        store.save_snapshot(&snapshot(id, 2, "v1")).await.unwrap();
        let second = snapshot(id, 4, "v1");
        store.save_snapshot(&second).await.unwrap();

        let path = store.snapshot_path(&second);
        assert!(path.exists());
        assert!(backup_path_for(&path).exists());

        let reopened = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        let latest = reopened.latest_snapshot(&query(id, "v1")).await.unwrap().unwrap();
        assert_eq!(latest.saved_version, 4);
        assert!(reopened.snapshot_exists(&query(id, "v1"), 4).await.unwrap());
        assert!(reopened.latest_snapshot(&query(id, "v2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_recovers_from_backup() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let path = {
            let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
            store.save_snapshot(&snapshot(id, 2, "v1")).await.unwrap();
            let second = snapshot(id, 3, "v1");
            store.save_snapshot(&second).await.unwrap();
            store.snapshot_path(&second)
        };
        fs::write(&path, "").unwrap();

        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        let latest = store.latest_snapshot(&query(id, "v1")).await.unwrap().unwrap();
        assert_eq!(latest.saved_version, 2);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        store
            .save_event(&Event::new("Account", id, "default", "Opened", json!({}), 1))
            .await
            .unwrap();
        store.save_snapshot(&snapshot(id, 1, "v1")).await.unwrap();

        store.remove_all().await.unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.event_count, 0);
        assert_eq!(stats.snapshot_count, 0);
        assert!(!store.events_path().exists());
    }

    #[tokio::test]
    async fn test_crash_between_backup_and_rename_keeps_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let path = {
            let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
            let first = snapshot(id, 1, "v1");
            store.save_snapshot(&first).await.unwrap();
            store.snapshot_path(&first)
        };

        // Only the backup and an unfinished temp file are left behind
        fs::rename(&path, backup_path_for(&path)).unwrap();
        fs::write(path.with_extension("tmp"), "{\"partial\":").unwrap();

        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        let latest = store.latest_snapshot(&query(id, "v1")).await.unwrap().unwrap();
        assert_eq!(latest.saved_version, 1);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_replace_keeps_latest_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        store.save_snapshot(&snapshot(id, 1, "v1")).await.unwrap();
        let second = snapshot(id, 2, "v1");
        store.save_snapshot(&second).await.unwrap();

        let path = store.snapshot_path(&second);
        let on_disk = read_snapshot_file(&path).unwrap();
        let backup = read_snapshot_file(&backup_path_for(&path)).unwrap();
        assert_eq!(on_disk.saved_version, 2);
        assert_eq!(backup.saved_version, 1);
    }

    #[tokio::test]
    async fn test_older_snapshot_does_not_replace_newer() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
            store.save_snapshot(&snapshot(id, 4, "v1")).await.unwrap();
            store.save_snapshot(&snapshot(id, 2, "v1")).await.unwrap();
            let latest = store.latest_snapshot(&query(id, "v1")).await.unwrap().unwrap();
            assert_eq!(latest.saved_version, 4);
        }

        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        let latest = store.latest_snapshot(&query(id, "v1")).await.unwrap().unwrap();
        assert_eq!(latest.saved_version, 4);
    }

    #[tokio::test]
    async fn test_similar_tenant_names_get_separate_files() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        {
            let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
            let dotted = snapshot_in("acme.io", id, 3, "v1");
            let underscored = snapshot_in("acme_io", id, 5, "v1");
            assert_ne!(store.snapshot_path(&dotted), store.snapshot_path(&underscored));
            store.save_snapshot(&dotted).await.unwrap();
            store.save_snapshot(&underscored).await.unwrap();
        }

        let store = JsonlDocumentStore::open(temp_dir.path()).unwrap();
        let dotted = store.latest_snapshot(&query_in("acme.io", id, "v1")).await.unwrap().unwrap();
        let underscored = store.latest_snapshot(&query_in("acme_io", id, "v1")).await.unwrap().unwrap();
        assert_eq!(dotted.saved_version, 3);
        assert_eq!(underscored.saved_version, 5);
    }

    #[test]
    fn test_encode_file_component() {
        assert_eq!(encode_file_component("default_Account"), "default_5FAccount");
        assert_eq!(encode_file_component("v1.0"), "v1_2E0");
        assert_eq!(encode_file_component("a/b-c"), "a_2Fb-c");
        assert_ne!(encode_file_component("acme.io"), encode_file_component("acme_io"));
        assert!(!encode_file_component("x__y").contains("__"));
    }
}
