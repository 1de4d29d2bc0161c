//! Integration tests for aggregate replay
//!
//! Tests:
//! - Duplicate delivery is idempotent
//! - Snapshot resume matches full replay
//! - Snapshots with another payload version are ignored
//! - Loading to a version, and loading past the end of a stream
//! - Recovery from a snapshot that disagrees with the log
//! - Lifecycle violations are fatal

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{account_history, hybrid_service, AccountProjector, ROOT};
use hybrid_replay::{
    AggregateLoader, DocumentRepository, Event, EventQuery, LoadOptions, ProjectionState, Projector, ReplayError,
    SnapshotDocument, SnapshotQuery, StoreResult, TemporaryStore,
};
use serde_json::json;
use uuid::Uuid;

#[test]
fn test_redelivered_event_is_skipped() {
    let projector = AccountProjector::new("account-v1");
    let aggregate_id = Uuid::new_v4();
    let events = account_history(aggregate_id, &[10, 20]);

    let mut state = ProjectionState::initial(&projector, Some(aggregate_id));
    let delivered = [&events[0], &events[1], &events[1], &events[2]];
    let applied = state
        .apply_events(delivered, projector.transitions())
        .expect("replay should succeed");

    assert_eq!(applied, 3);
    assert_eq!(state.version, 3);
    assert_eq!(state.payload.balance, 30);
    assert_eq!(state.last_event_id, Some(events[2].id));
}

#[test]
fn test_out_of_order_event_is_fatal() {
    let projector = AccountProjector::new("account-v1");
    let aggregate_id = Uuid::new_v4();
    let events = account_history(aggregate_id, &[10, 20]);

    let mut state = ProjectionState::initial(&projector, Some(aggregate_id));
    state.apply_event(&events[0], projector.transitions()).unwrap();
    state.apply_event(&events[2], projector.transitions()).unwrap();

    let err = state
        .apply_event(&events[1], projector.transitions())
        .expect_err("earlier key must be rejected");
    assert!(matches!(err, ReplayError::EventOrderMixedUp { .. }));
    assert!(err.is_fatal());
    assert_eq!(state.version, 2);
}

#[test]
fn test_second_initial_event_is_fatal() {
    let projector = AccountProjector::new("account-v1");
    let aggregate_id = Uuid::new_v4();
    let events = account_history(aggregate_id, &[10]);
    let reopened = Event::new("Account", aggregate_id, ROOT, "Opened", json!({"owner": "again"}), 1)
        .with_created_at(events[1].created_at + chrono::Duration::milliseconds(1));

    let mut state = ProjectionState::initial(&projector, Some(aggregate_id));
    state.apply_events(&events, projector.transitions()).unwrap();

    let err = state
        .apply_event(&reopened, projector.transitions())
        .expect_err("initial event after version 0 must be rejected");
    assert!(matches!(err, ReplayError::InvalidEventSequence { .. }));
    assert_eq!(state.payload.balance, 10);
}

#[tokio::test]
async fn test_snapshot_resume_matches_full_replay() {
    let (_temp_dir, service) = hybrid_service();
    let projector = AccountProjector::new("account-v1");
    let aggregate_id = Uuid::new_v4();
    let events = account_history(aggregate_id, &[1, 2, 3, 4, 5]);

    service.append_events(&events[..3]).await.unwrap();
    let snapshot = service
        .take_snapshot(&projector, ROOT, aggregate_id)
        .await
        .unwrap()
        .expect("aggregate has events");
    assert_eq!(snapshot.saved_version, 3);
    assert_eq!(snapshot.last_event_id, events[2].id);

    service.append_events(&events[3..]).await.unwrap();

    let resumed = service.load(&projector, ROOT, aggregate_id).await.unwrap();
    assert_eq!(resumed.applied_snapshot_version, 3);
    assert_eq!(resumed.version, 6);
    assert_eq!(resumed.payload.balance, 15);

    let report = service.verify(&projector, ROOT, aggregate_id).await.unwrap();
    assert!(report.matches);
    assert_eq!(report.from_initial.applied_snapshot_version, 0);
    assert_eq!(report.from_initial.payload, report.from_snapshot.payload);
}

#[tokio::test]
async fn test_snapshot_with_other_payload_version_is_ignored() {
    let (_temp_dir, service) = hybrid_service();
    let v1 = AccountProjector::new("account-v1");
    let v2 = AccountProjector::new("account-v2");
    let aggregate_id = Uuid::new_v4();

    service
        .append_events(&account_history(aggregate_id, &[100, 50]))
        .await
        .unwrap();
    service.take_snapshot(&v1, ROOT, aggregate_id).await.unwrap();

    let from_v1 = service.load(&v1, ROOT, aggregate_id).await.unwrap();
    let from_v2 = service.load(&v2, ROOT, aggregate_id).await.unwrap();

    assert_eq!(from_v1.applied_snapshot_version, 3);
    assert_eq!(from_v2.applied_snapshot_version, 0);
    assert_eq!(from_v1.payload, from_v2.payload);
    assert!(from_v1.same_position_as(&from_v2));
}

#[tokio::test]
async fn test_repeated_snapshot_is_written_once() {
    let (temp_dir, service) = hybrid_service();
    let projector = AccountProjector::new("account-v1");
    let aggregate_id = Uuid::new_v4();
    service
        .append_events(&account_history(aggregate_id, &[1]))
        .await
        .unwrap();

    let first = service.take_snapshot(&projector, ROOT, aggregate_id).await.unwrap().unwrap();
    let second = service.take_snapshot(&projector, ROOT, aggregate_id).await.unwrap().unwrap();
    assert_eq!(first.saved_version, second.saved_version);

    let backups: Vec<_> = std::fs::read_dir(temp_dir.path().join("snapshots"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".previous"))
        .collect();
    assert!(backups.is_empty(), "second snapshot should not rewrite the file");
}

#[tokio::test]
async fn test_take_snapshot_of_unknown_aggregate() {
    let (_temp_dir, service) = hybrid_service();
    let projector = AccountProjector::new("account-v1");
    let snapshot = service.take_snapshot(&projector, ROOT, Uuid::new_v4()).await.unwrap();
    assert!(snapshot.is_none());
}

#[tokio::test]
async fn test_load_to_version() {
    let (_temp_dir, service) = hybrid_service();
    let projector = AccountProjector::new("account-v1");
    let aggregate_id = Uuid::new_v4();
    service
        .append_events(&account_history(aggregate_id, &[1, 10, 100]))
        .await
        .unwrap();
    service.take_snapshot(&projector, ROOT, aggregate_id).await.unwrap();

    // The version-4 snapshot is past the target and must be skipped
    let at_two = service
        .load_with(&projector, ROOT, aggregate_id, LoadOptions::to_version(2))
        .await
        .unwrap();
    assert_eq!(at_two.version, 2);
    assert_eq!(at_two.payload.balance, 1);
    assert_eq!(at_two.applied_snapshot_version, 0);

    let err = service
        .load_with(&projector, ROOT, aggregate_id, LoadOptions::to_version(9))
        .await
        .expect_err("stream only has four events");
    assert!(matches!(
        err,
        ReplayError::VersionNotReached {
            requested: 9,
            reached: 4
        }
    ));
}

#[tokio::test]
async fn test_load_many_keeps_input_order() {
    let (_temp_dir, service) = hybrid_service();
    let projector = AccountProjector::new("account-v1");
    let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for (i, id) in ids.iter().enumerate() {
        service
            .append_events(&account_history(*id, &[i as i64 + 1]))
            .await
            .unwrap();
    }

    let loaded = service.loader().load_many(&projector, ROOT, &ids).await;
    assert_eq!(loaded.len(), ids.len());
    for (i, (id, result)) in loaded.into_iter().enumerate() {
        assert_eq!(id, ids[i]);
        assert_eq!(result.unwrap().payload.balance, i as i64 + 1);
    }
}

/// Repository whose event reads ignore the `since` cursor
struct IgnoresCursor {
    inner: TemporaryStore,
    snapshot: SnapshotDocument,
}

#[async_trait]
impl DocumentRepository for IgnoresCursor {
    async fn get_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let mut unbounded = query.clone();
        unbounded.since = None;
        Ok(self.inner.query(&unbounded))
    }

    async fn latest_snapshot(&self, _query: &SnapshotQuery) -> StoreResult<Option<SnapshotDocument>> {
        Ok(Some(self.snapshot.clone()))
    }

    async fn snapshot_exists(&self, _query: &SnapshotQuery, version: u64) -> StoreResult<bool> {
        Ok(self.snapshot.saved_version == version)
    }
}

#[tokio::test]
async fn test_inconsistent_snapshot_falls_back_to_full_replay() {
    let projector = AccountProjector::new("account-v1");
    let aggregate_id = Uuid::new_v4();
    let events = account_history(aggregate_id, &[10, 20, 30]);

    let mut at_three = ProjectionState::initial(&projector, Some(aggregate_id));
    at_three.apply_events(&events[..3], projector.transitions()).unwrap();
    let snapshot = at_three.to_snapshot(&projector, ROOT).unwrap().unwrap();

    let inner = TemporaryStore::new();
    inner.add_events(events.iter().cloned());
    let loader = AggregateLoader::new(Arc::new(IgnoresCursor { inner, snapshot }));

    let state = loader.load(&projector, ROOT, aggregate_id).await.unwrap();
    assert_eq!(state.applied_snapshot_version, 0);
    assert_eq!(state.version, 4);
    assert_eq!(state.payload.balance, 60);
}
