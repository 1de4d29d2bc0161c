//! Replay engine for a single projection state
//!
//! # State machine
//!
//! ```text
//! Empty ──apply_event/apply_snapshot──► Applying ──mark_current──► Current
//!                                          ▲                          │
//!                                          └──────apply_event─────────┘
//! ```
//!
//! A state is owned by one replay loop at a time; nothing here locks.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ReplayError, ReplayResult};
use crate::types::{partition, DocumentType, Event, OrderingKey, SnapshotDocument};

use super::transition::{Transition, TransitionTable};
use super::{ProjectionKind, Projector};

/// Lifecycle of a state during replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayPhase {
    /// Nothing applied yet
    Empty,
    /// Events or a snapshot are being folded in
    Applying,
    /// Caught up with the stream as of the last read
    Current,
}

/// Versioned result of replaying events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionState<P> {
    pub payload: P,
    /// Owning aggregate (`None` for multi-stream projections)
    pub aggregate_id: Option<Uuid>,
    pub last_event_id: Option<Uuid>,
    pub last_ordering_key: Option<OrderingKey>,
    /// Number of events applied since creation
    pub version: u64,
    /// Version of the snapshot this state was seeded from (0 if none)
    pub applied_snapshot_version: u64,
    pub kind: ProjectionKind,
    pub phase: ReplayPhase,
}

impl<P> ProjectionState<P> {
    /// Empty state for one aggregate
    pub fn for_aggregate(kind: ProjectionKind, aggregate_id: Uuid, payload: P) -> Self {
        Self {
            payload,
            aggregate_id: Some(aggregate_id),
            last_event_id: None,
            last_ordering_key: None,
            version: 0,
            applied_snapshot_version: 0,
            kind,
            phase: ReplayPhase::Empty,
        }
    }

    /// Empty state for a multi-stream projection
    pub fn for_streams(payload: P) -> Self {
        Self {
            payload,
            aggregate_id: None,
            last_event_id: None,
            last_ordering_key: None,
            version: 0,
            applied_snapshot_version: 0,
            kind: ProjectionKind::MultiProjection,
            phase: ReplayPhase::Empty,
        }
    }

    /// Empty state shaped by a projector
    pub fn initial<Pr>(projector: &Pr, aggregate_id: Option<Uuid>) -> Self
    where
        Pr: Projector<Payload = P>,
    {
        match aggregate_id {
            Some(id) if projector.kind().is_per_aggregate() => {
                Self::for_aggregate(projector.kind(), id, projector.initial_payload())
            }
            _ => Self::for_streams(projector.initial_payload()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.version == 0
    }

    /// Mark replay as caught up
    pub fn mark_current(&mut self) {
        self.phase = ReplayPhase::Current;
    }

    /// Whether two states sit at the same point of the same stream
    pub fn same_position_as(&self, other: &Self) -> bool {
        self.version == other.version
            && self.last_event_id == other.last_event_id
            && self.last_ordering_key == other.last_ordering_key
            && self.aggregate_id == other.aggregate_id
    }

    /// Fold one event into the state
    ///
    /// Returns `Ok(false)` when the event was skipped: a redelivery of the
    /// last applied event, or a handler reporting it does not apply.
    pub fn apply_event(&mut self, event: &Event, transitions: &TransitionTable<P>) -> ReplayResult<bool>
    where
        P: 'static,
    {
        if self.last_event_id == Some(event.id) {
            return Ok(false);
        }

        if let Some(last) = &self.last_ordering_key {
            if event.ordering_key <= *last {
                return Err(ReplayError::EventOrderMixedUp {
                    event_id: event.id,
                    ordering_key: event.ordering_key.clone(),
                    last_ordering_key: last.clone(),
                });
            }
        }

        if let Some(aggregate_id) = self.aggregate_id {
            if event.aggregate_id != aggregate_id {
                return Err(ReplayError::ForeignEvent {
                    event_id: event.id,
                    event_aggregate_id: event.aggregate_id,
                    aggregate_id,
                });
            }
        }

        let next = match transitions.apply(&self.payload, event)? {
            Transition::Applied(next) => next,
            Transition::NotApplicable => return Ok(false),
        };

        if self.kind.validates_lifecycle() && event.is_initial_event != (self.version == 0) {
            return Err(ReplayError::InvalidEventSequence {
                aggregate_id: event.aggregate_id,
                event_id: event.id,
                version: self.version,
                is_initial_event: event.is_initial_event,
            });
        }

        self.payload = next;
        self.last_event_id = Some(event.id);
        self.last_ordering_key = Some(event.ordering_key.clone());
        self.version += 1;
        self.phase = ReplayPhase::Applying;
        Ok(true)
    }

    /// Fold an event that arrived behind the last applied key
    ///
    /// Multi-stream states run the transition against the current payload and
    /// keep their position at the latest key. Per-aggregate states have a
    /// strict order and go through [`Self::apply_event`], which rejects it.
    pub fn apply_late_event(&mut self, event: &Event, transitions: &TransitionTable<P>) -> ReplayResult<bool>
    where
        P: 'static,
    {
        if self.kind.is_per_aggregate() {
            return self.apply_event(event, transitions);
        }
        if self.last_event_id == Some(event.id) {
            return Ok(false);
        }

        let next = match transitions.apply(&self.payload, event)? {
            Transition::Applied(next) => next,
            Transition::NotApplicable => return Ok(false),
        };

        self.payload = next;
        if self.last_ordering_key.is_none() {
            self.last_event_id = Some(event.id);
            self.last_ordering_key = Some(event.ordering_key.clone());
        }
        self.version += 1;
        self.phase = ReplayPhase::Applying;
        Ok(true)
    }

    /// Fold events in order; returns how many changed the state
    pub fn apply_events<'a, I>(&mut self, events: I, transitions: &TransitionTable<P>) -> ReplayResult<usize>
    where
        P: 'static,
        I: IntoIterator<Item = &'a Event>,
    {
        let mut applied = 0;
        for event in events {
            if self.apply_event(event, transitions)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Seed the state from a snapshot
    ///
    /// Returns `Ok(false)` and leaves the state untouched when the snapshot
    /// has another schema identifier, belongs to another aggregate, or would
    /// rewind the state.
    pub fn apply_snapshot(&mut self, snapshot: &SnapshotDocument, payload_version_identifier: &str) -> ReplayResult<bool>
    where
        P: serde::de::DeserializeOwned,
    {
        if !snapshot.is_compatible_with(payload_version_identifier) {
            debug!(
                snapshot = %snapshot.payload_version_identifier,
                expected = payload_version_identifier,
                "ignoring snapshot with another payload version"
            );
            return Ok(false);
        }
        if let Some(aggregate_id) = self.aggregate_id {
            if snapshot.aggregate_id != aggregate_id {
                return Ok(false);
            }
        }
        if snapshot.saved_version <= self.version {
            return Ok(false);
        }

        let payload: P = serde_json::from_value(snapshot.payload.clone()).map_err(ReplayError::SnapshotPayload)?;

        self.payload = payload;
        self.version = snapshot.saved_version;
        self.last_event_id = Some(snapshot.last_event_id);
        self.last_ordering_key = Some(snapshot.last_ordering_key.clone());
        self.applied_snapshot_version = snapshot.saved_version;
        self.phase = ReplayPhase::Applying;
        Ok(true)
    }

    /// Capture the state as a snapshot document; `None` while empty
    pub fn to_snapshot<Pr>(&self, projector: &Pr, root_partition_key: &str) -> ReplayResult<Option<SnapshotDocument>>
    where
        P: Serialize,
        Pr: Projector<Payload = P>,
    {
        let (Some(last_event_id), Some(last_ordering_key)) = (self.last_event_id, self.last_ordering_key.clone()) else {
            return Ok(None);
        };

        let aggregate_id = self.aggregate_id.unwrap_or_else(Uuid::nil);
        let payload = serde_json::to_value(&self.payload).map_err(ReplayError::SnapshotPayload)?;

        Ok(Some(SnapshotDocument {
            id: Uuid::new_v4(),
            aggregate_id,
            stream_kind: projector.stream_kind().to_string(),
            projection_name: projector.name().to_string(),
            partition_key: partition::for_snapshot(root_partition_key, projector.name(), aggregate_id),
            root_partition_key: root_partition_key.to_string(),
            document_type_name: DocumentType::Snapshot,
            ordering_key: last_ordering_key.clone(),
            payload,
            saved_version: self.version,
            last_event_id,
            last_ordering_key,
            payload_version_identifier: projector.payload_version_identifier().to_string(),
            created_at: Utc::now(),
        }))
    }
}
