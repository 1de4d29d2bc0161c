//! Hybrid Replay
//!
//! An event-sourcing replay engine: an append-only log of immutable events is
//! the source of truth, and every queryable state is rebuilt by replaying
//! events in global ordering-key order.
//!
//! # Features
//!
//! - **Two-tier storage**: an in-memory mirror in front of a durable store,
//!   with per-partition bookkeeping that says when the mirror may answer
//! - **Idempotent replay**: duplicate deliveries are skipped, out-of-order
//!   and lifecycle violations are fatal
//! - **Snapshot resume**: only snapshots with a matching payload version
//!   identifier are applied
//! - **Safe/unsafe views**: multi-stream projections expose settled and
//!   latest state through a consistency window
//!
//! # Modules
//!
//! - `types`: Ordering keys, events, snapshots, partition keys
//! - `store`: Store contracts, temporary/JSONL stores, hybrid manager, split
//! - `projection`: Transition tables, replay state, consistency window
//! - `loader`: Aggregate loading with snapshot resume
//! - `service`: Facade wiring everything from an `EngineConfig`
//! - `publish`: Broadcast of appended events
//! - `config`, `error`, `logging`, `utils`: Ambient plumbing
//!
//! # Example
//!
//! ```no_run
//! use hybrid_replay::{EngineConfig, ProjectionService};
//!
//! let service = ProjectionService::open(EngineConfig::from_env())?;
//! # Ok::<(), hybrid_replay::StoreError>(())
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod projection;
pub mod publish;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use config::{AggregateSettings, ConsistencyWindowConfig, EngineConfig, StreamPolicy};
pub use error::{ReplayError, ReplayResult, StoreError, StoreResult};
pub use loader::{AggregateLoader, LoadOptions, VerifyReport};
pub use projection::{
    ConsistencyWindow, EventSource, MultiProjectionHost, ProjectionKind, ProjectionState, Projector, ReplayPhase,
    Transition, TransitionTable,
};
pub use publish::{EventPublisher, PublishedEvent};
pub use service::{ProjectionService, ServiceStats};
pub use store::{
    DocumentRepository, DocumentStore, DocumentWriter, EventQuery, HybridStatus, HybridStoreManager,
    JsonlDocumentStore, SnapshotQuery, SplitRepository, SplitWriter, StoreStats, StoreTiers, TemporaryStore,
};
pub use types::{DocumentType, Event, OrderingKey, SnapshotDocument, DEFAULT_ROOT_PARTITION_KEY};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
