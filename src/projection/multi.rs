//! Multi-stream projection host
//!
//! Runs one projector over events from many streams. Incoming events are
//! buffered by ordering key; once an event has been observed for the
//! effective window it is promoted into the safe state, strictly in key
//! order. The unsafe state is the safe state plus everything still buffered.
//!
//! An event that shows up at or behind the safe cursor is either a
//! redelivery (skipped silently, recognised through the applied-key history)
//! or genuinely late, in which case it is folded into the safe state. A late
//! event older than the history cannot be told apart from a duplicate; the
//! host then asks for a rebuild from the store.
//!
//! ```text
//! deliveries ─► dedup + sort ─► buffer (BTreeMap by key) ─► promote ─► safe state
//!                                      │
//!                                      └──────── safe + buffer ─────► unsafe state
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ConsistencyWindowConfig;
use crate::error::{ReplayError, ReplayResult};
use crate::publish::PublishedEvent;
use crate::store::{DocumentRepository, EventQuery};
use crate::types::{Event, OrderingKey, SnapshotDocument};

use super::state::ProjectionState;
use super::window::ConsistencyWindow;
use super::Projector;

/// Applied keys remembered for telling redeliveries from late events
const APPLIED_HISTORY: usize = 4096;

/// How an event reached the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Live delivery from the stream; feeds the lag estimate
    Stream,
    /// Replayed from the store during catch-up
    CatchUp,
}

#[derive(Debug, Clone)]
struct Buffered {
    event: Event,
    observed_at: DateTime<Utc>,
}

/// Long-lived multi-stream projection instance driven by an actor host
pub struct MultiProjectionHost<Pr: Projector> {
    projector: Arc<Pr>,
    root_partition_key: String,
    source_streams: Vec<String>,
    safe_state: ProjectionState<Pr::Payload>,
    unsafe_cache: Option<ProjectionState<Pr::Payload>>,
    buffer: BTreeMap<OrderingKey, Buffered>,
    window: ConsistencyWindow,
    /// Recently applied keys with the event id stored under each
    applied: BTreeMap<OrderingKey, Uuid>,
    /// Keys at or below this are no longer in `applied`
    history_floor: Option<OrderingKey>,
    late_events: u64,
    needs_rebuild: bool,
    deactivated: bool,
}

impl<Pr: Projector> MultiProjectionHost<Pr> {
    pub fn new(projector: Arc<Pr>, root_partition_key: impl Into<String>, window: ConsistencyWindowConfig) -> Self {
        let safe_state = ProjectionState::for_streams(projector.initial_payload());
        let source_streams = projector.source_streams();
        Self {
            projector,
            root_partition_key: root_partition_key.into(),
            source_streams,
            safe_state,
            unsafe_cache: None,
            buffer: BTreeMap::new(),
            window: ConsistencyWindow::new(window),
            applied: BTreeMap::new(),
            history_floor: None,
            late_events: 0,
            needs_rebuild: false,
            deactivated: false,
        }
    }

    pub fn projector(&self) -> &Pr {
        &self.projector
    }

    pub fn window(&self) -> &ConsistencyWindow {
        &self.window
    }

    /// Events that arrived at or behind the safe cursor (redeliveries excluded)
    pub fn late_events(&self) -> u64 {
        self.late_events
    }

    /// Set when a late event could not be applied safely; see [`Self::rebuild`]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Events received but not yet settled
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    fn ensure_active(&self) -> ReplayResult<()> {
        if self.deactivated {
            return Err(ReplayError::Deactivated(self.projector.name().to_string()));
        }
        Ok(())
    }

    fn accepts(&self, event: &Event) -> bool {
        event.root_partition_key == self.root_partition_key
            && self.source_streams.iter().any(|kind| kind == &event.stream_kind)
    }

    /// Receive one event at the current time
    pub fn apply_event(&mut self, event: Event, source: EventSource) -> ReplayResult<usize> {
        self.apply_events_at(vec![event], source, Utc::now())
    }

    /// Receive a batch at the current time
    pub fn apply_events(&mut self, events: Vec<Event>, source: EventSource) -> ReplayResult<usize> {
        self.apply_events_at(events, source, Utc::now())
    }

    /// Receive a batch observed at `now`; returns how many were buffered
    ///
    /// The batch is deduplicated by event id and sorted by ordering key.
    /// Events at or behind the safe cursor bypass the buffer (see
    /// [`Self::absorb_behind_safe`]). Settled events are promoted before
    /// returning.
    pub fn apply_events_at(&mut self, events: Vec<Event>, source: EventSource, now: DateTime<Utc>) -> ReplayResult<usize> {
        self.ensure_active()?;

        let mut seen = HashSet::new();
        let mut batch: Vec<Event> = events
            .into_iter()
            .filter(|e| seen.insert(e.id) && self.accepts(e))
            .collect();
        batch.sort_by(|a, b| a.ordering_key.cmp(&b.ordering_key));

        let mut accepted = 0;
        for event in batch {
            if self.window.is_behind_safe(&event.ordering_key) {
                if self.absorb_behind_safe(&event)? {
                    self.safe_state.mark_current();
                    self.unsafe_cache = None;
                }
                continue;
            }
            if self.buffer.contains_key(&event.ordering_key) {
                continue;
            }

            self.window.observe_at(&event.ordering_key, now, source == EventSource::Stream);
            let observed_at = match source {
                EventSource::Stream => now,
                // Replayed events settle by their own write time
                EventSource::CatchUp => event.ordering_key.timestamp().map_or(now, |t| t.min(now)),
            };
            self.buffer.insert(event.ordering_key.clone(), Buffered { event, observed_at });
            accepted += 1;
        }

        if accepted > 0 {
            self.unsafe_cache = None;
        }
        self.promote_at(now)?;
        Ok(accepted)
    }

    fn is_redelivery(&self, event: &Event) -> bool {
        self.safe_state.last_event_id == Some(event.id) || self.applied.get(&event.ordering_key) == Some(&event.id)
    }

    fn remember_applied(&mut self, event: &Event) {
        self.applied.insert(event.ordering_key.clone(), event.id);
        while self.applied.len() > APPLIED_HISTORY {
            if let Some((key, _)) = self.applied.pop_first() {
                self.history_floor = Some(key);
            }
        }
    }

    /// Handle an event at or behind the safe cursor; returns whether the safe state changed
    fn absorb_behind_safe(&mut self, event: &Event) -> ReplayResult<bool> {
        if self.is_redelivery(event) {
            trace!(projection = self.projector.name(), event_id = %event.id, "redelivered event skipped");
            return Ok(false);
        }

        self.late_events += 1;
        if self.history_floor.as_ref().is_some_and(|floor| event.ordering_key <= *floor) {
            self.needs_rebuild = true;
            warn!(
                projection = self.projector.name(),
                event_id = %event.id,
                ordering_key = %event.ordering_key,
                "late event older than the applied-key history, rebuild required"
            );
            return Ok(false);
        }

        let changed = self
            .safe_state
            .apply_late_event(event, self.projector.transitions())?;
        self.remember_applied(event);
        warn!(
            projection = self.projector.name(),
            event_id = %event.id,
            ordering_key = %event.ordering_key,
            safe_key = ?self.window.safe_key(),
            "late event folded into the safe state"
        );
        Ok(changed)
    }

    /// Move settled events from the buffer into the safe state, in key order
    ///
    /// Stops at the first unsettled event. Returns how many were promoted.
    pub fn promote_at(&mut self, now: DateTime<Utc>) -> ReplayResult<usize> {
        let mut promoted = 0;
        loop {
            let Some(entry) = self.buffer.first_entry() else {
                break;
            };
            if !self.window.is_settled_at(entry.get().observed_at, now) {
                break;
            }
            let buffered = entry.remove();
            self.safe_state
                .apply_event(&buffered.event, self.projector.transitions())?;
            self.window.advance_safe(&buffered.event.ordering_key);
            self.remember_applied(&buffered.event);
            promoted += 1;
        }
        if promoted > 0 {
            self.safe_state.mark_current();
            debug!(projection = self.projector.name(), promoted, pending = self.buffer.len(), "promoted settled events");
        }
        Ok(promoted)
    }

    /// Seed the safe state from a persisted snapshot
    ///
    /// Incompatible snapshots are ignored. Buffered events at or behind the
    /// snapshot cursor are discarded.
    pub fn apply_snapshot(&mut self, snapshot: &SnapshotDocument) -> ReplayResult<bool> {
        self.ensure_active()?;
        let applied = self
            .safe_state
            .apply_snapshot(snapshot, self.projector.payload_version_identifier())?;
        if applied {
            self.window.advance_safe(&snapshot.last_ordering_key);
            self.applied = self.applied.split_off(&snapshot.last_ordering_key);
            self.applied.remove(&snapshot.last_ordering_key);
            if self.history_floor.as_ref().map_or(true, |floor| *floor < snapshot.last_ordering_key) {
                self.history_floor = Some(snapshot.last_ordering_key.clone());
            }
            let keep = self.buffer.split_off(&snapshot.last_ordering_key);
            self.buffer = keep
                .into_iter()
                .filter(|(key, _)| *key > snapshot.last_ordering_key)
                .collect();
            self.unsafe_cache = None;
            info!(
                projection = self.projector.name(),
                version = snapshot.saved_version,
                "multi-stream projection restored from snapshot"
            );
        }
        Ok(applied)
    }

    /// Settled state as of the safe cursor
    pub fn get_safe_state(&self) -> &ProjectionState<Pr::Payload> {
        &self.safe_state
    }

    /// Promote what has settled by `now`, then return the safe state
    pub fn get_safe_state_at(&mut self, now: DateTime<Utc>) -> ReplayResult<&ProjectionState<Pr::Payload>> {
        self.promote_at(now)?;
        Ok(&self.safe_state)
    }

    /// Latest received state (safe state plus buffered events)
    pub fn get_unsafe_state(&mut self) -> ReplayResult<&ProjectionState<Pr::Payload>> {
        if self.unsafe_cache.is_none() {
            let mut state = self.safe_state.clone();
            state.apply_events(self.buffer.values().map(|b| &b.event), self.projector.transitions())?;
            state.mark_current();
            self.unsafe_cache = Some(state);
        }
        Ok(self.unsafe_cache.get_or_insert_with(|| self.safe_state.clone()))
    }

    /// Snapshot of the safe state for the host to persist
    pub fn request_persist_at(&mut self, now: DateTime<Utc>) -> ReplayResult<Option<SnapshotDocument>> {
        self.ensure_active()?;
        self.promote_at(now)?;
        self.safe_state
            .to_snapshot(self.projector.as_ref(), &self.root_partition_key)
    }

    pub fn request_persist(&mut self) -> ReplayResult<Option<SnapshotDocument>> {
        self.request_persist_at(Utc::now())
    }

    /// Final snapshot; later deliveries are rejected
    pub fn request_deactivate_at(&mut self, now: DateTime<Utc>) -> ReplayResult<Option<SnapshotDocument>> {
        let snapshot = self.request_persist_at(now)?;
        self.deactivated = true;
        info!(
            projection = self.projector.name(),
            pending = self.buffer.len(),
            late = self.late_events,
            "multi-stream projection deactivated"
        );
        Ok(snapshot)
    }

    pub fn request_deactivate(&mut self) -> ReplayResult<Option<SnapshotDocument>> {
        self.request_deactivate_at(Utc::now())
    }

    /// Pull everything after the safe cursor from the store
    pub async fn catch_up_at(&mut self, repository: &dyn DocumentRepository, now: DateTime<Utc>) -> ReplayResult<usize> {
        self.ensure_active()?;
        let query = EventQuery::for_streams(&self.root_partition_key, &self.source_streams)
            .since(self.window.safe_key().cloned());
        let events = repository.get_events(&query).await?;
        let fetched = events.len();
        let accepted = self.apply_events_at(events, EventSource::CatchUp, now)?;
        debug!(projection = self.projector.name(), fetched, accepted, "catch-up finished");
        Ok(accepted)
    }

    pub async fn catch_up(&mut self, repository: &dyn DocumentRepository) -> ReplayResult<usize> {
        self.catch_up_at(repository, Utc::now()).await
    }

    /// Discard every derived cursor and state, then replay the source streams from the store
    pub async fn rebuild_at(&mut self, repository: &dyn DocumentRepository, now: DateTime<Utc>) -> ReplayResult<usize> {
        self.ensure_active()?;
        self.safe_state = ProjectionState::for_streams(self.projector.initial_payload());
        self.unsafe_cache = None;
        self.buffer.clear();
        self.window = ConsistencyWindow::new(self.window.config().clone());
        self.applied.clear();
        self.history_floor = None;
        self.needs_rebuild = false;
        info!(projection = self.projector.name(), late = self.late_events, "rebuilding multi-stream projection");
        self.catch_up_at(repository, now).await
    }

    pub async fn rebuild(&mut self, repository: &dyn DocumentRepository) -> ReplayResult<usize> {
        self.rebuild_at(repository, Utc::now()).await
    }

    /// Consume published appends until the channel closes or the host is deactivated
    ///
    /// A lagged receiver triggers a catch-up from the repository; a late event
    /// that cannot be applied triggers a rebuild.
    pub async fn follow(
        &mut self,
        mut receiver: broadcast::Receiver<PublishedEvent>,
        repository: &dyn DocumentRepository,
    ) -> ReplayResult<()> {
        while !self.deactivated {
            match receiver.recv().await {
                Ok(published) => {
                    self.apply_event(published.event.as_ref().clone(), EventSource::Stream)?;
                    if self.needs_rebuild {
                        self.rebuild(repository).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(projection = self.projector.name(), skipped, "subscription lagged, catching up");
                    self.catch_up(repository).await?;
                }
                Err(RecvError::Closed) => break,
            }
        }
        Ok(())
    }
}
