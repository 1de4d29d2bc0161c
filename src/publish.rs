//! Append notifications
//!
//! Every event the split writer persists is published here so stream
//! consumers (multi-stream projections, live views) can follow the log
//! without polling. The publisher is an ordinary value owned by the engine,
//! not a global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::Event;

/// An appended event with its publish sequence number
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub sequence_id: u64,
    pub event: Arc<Event>,
    pub published_at: DateTime<Utc>,
}

/// Broadcast channel for appended events
#[derive(Debug)]
pub struct EventPublisher {
    tx: broadcast::Sender<PublishedEvent>,
    sequence_counter: AtomicU64,
}

impl EventPublisher {
    /// Create a new publisher with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequence_counter: AtomicU64::new(0),
        }
    }

    /// Publish an appended event; returns its sequence number
    pub fn publish(&self, event: &Event) -> u64 {
        let sequence_id = self.sequence_counter.fetch_add(1, Ordering::SeqCst);
        let message = PublishedEvent {
            sequence_id,
            event: Arc::new(event.clone()),
            published_at: Utc::now(),
        };
        // No receivers is fine
        let _ = self.tx.send(message);
        sequence_id
    }

    /// Number of events published so far
    pub fn current_sequence_id(&self) -> u64 {
        self.sequence_counter.load(Ordering::SeqCst)
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
