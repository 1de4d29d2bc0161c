//! Projection service facade
//!
//! Wires the stores, hybrid manager, split repository/writer, publisher and
//! loader from an [`EngineConfig`], and exposes the operations callers need:
//! append, load, verify, snapshot and hosting multi-stream projections.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ReplayResult, StoreResult};
use crate::loader::{AggregateLoader, LoadOptions, VerifyReport};
use crate::projection::{MultiProjectionHost, ProjectionState, Projector};
use crate::publish::EventPublisher;
use crate::store::{
    DocumentRepository, DocumentStore, HybridStoreManager, JsonlDocumentStore, SplitRepository, SplitWriter,
    SnapshotQuery, StoreStats, StoreTiers, TemporaryStore,
};
use crate::types::{Event, SnapshotDocument};

/// Entry point combining storage routing and replay
pub struct ProjectionService {
    config: EngineConfig,
    tiers: StoreTiers,
    repository: Arc<SplitRepository>,
    writer: SplitWriter,
    publisher: Arc<EventPublisher>,
    loader: AggregateLoader,
}

impl ProjectionService {
    /// Open with the JSONL durable store under `config.data_dir`
    pub fn open(config: EngineConfig) -> StoreResult<Self> {
        let durable = Arc::new(JsonlDocumentStore::from_config(&config)?);
        Ok(Self::with_durable(config, durable))
    }

    /// Use a caller-supplied durable backend
    pub fn with_durable(config: EngineConfig, durable: Arc<dyn DocumentStore>) -> Self {
        let tiers = StoreTiers::new(
            Arc::new(TemporaryStore::new()),
            durable,
            Arc::new(HybridStoreManager::new(config.hybrid_enabled)),
            config.streams.clone(),
        );
        let publisher = Arc::new(EventPublisher::new(config.broadcast_capacity));
        let repository = Arc::new(SplitRepository::new(tiers.clone()));
        let writer = SplitWriter::new(tiers.clone(), Arc::clone(&publisher));
        let loader = AggregateLoader::new(repository.clone());

        info!(
            hybrid = config.hybrid_enabled,
            safe_window_ms = config.window.safe_window_ms,
            "projection service ready"
        );

        Self {
            config,
            tiers,
            repository,
            writer,
            publisher,
            loader,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<SplitRepository> {
        &self.repository
    }

    pub fn writer(&self) -> &SplitWriter {
        &self.writer
    }

    pub fn loader(&self) -> &AggregateLoader {
        &self.loader
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn hybrid(&self) -> &Arc<HybridStoreManager> {
        &self.tiers.hybrid
    }

    pub fn temporary(&self) -> &Arc<TemporaryStore> {
        &self.tiers.temporary
    }

    pub async fn append_event(&self, event: &Event) -> StoreResult<()> {
        self.writer.append_event(event).await
    }

    pub async fn append_events(&self, events: &[Event]) -> StoreResult<()> {
        self.writer.append_events(events).await
    }

    pub async fn load<Pr: Projector>(
        &self,
        projector: &Pr,
        root_partition_key: &str,
        aggregate_id: Uuid,
    ) -> ReplayResult<ProjectionState<Pr::Payload>> {
        self.loader.load(projector, root_partition_key, aggregate_id).await
    }

    pub async fn load_with<Pr: Projector>(
        &self,
        projector: &Pr,
        root_partition_key: &str,
        aggregate_id: Uuid,
        options: LoadOptions,
    ) -> ReplayResult<ProjectionState<Pr::Payload>> {
        self.loader
            .load_with(projector, root_partition_key, aggregate_id, options)
            .await
    }

    pub async fn verify<Pr: Projector>(
        &self,
        projector: &Pr,
        root_partition_key: &str,
        aggregate_id: Uuid,
    ) -> ReplayResult<VerifyReport<Pr::Payload>> {
        self.loader.verify(projector, root_partition_key, aggregate_id).await
    }

    /// Load the aggregate and persist its state as a snapshot
    ///
    /// Returns `None` for an aggregate without events. Saving the same
    /// version twice is skipped.
    pub async fn take_snapshot<Pr: Projector>(
        &self,
        projector: &Pr,
        root_partition_key: &str,
        aggregate_id: Uuid,
    ) -> ReplayResult<Option<SnapshotDocument>> {
        let state = self.load(projector, root_partition_key, aggregate_id).await?;
        let Some(snapshot) = state.to_snapshot(projector, root_partition_key)? else {
            return Ok(None);
        };

        let query = SnapshotQuery {
            root_partition_key: root_partition_key.to_string(),
            stream_kind: projector.stream_kind().to_string(),
            projection_name: projector.name().to_string(),
            aggregate_id,
            payload_version_identifier: projector.payload_version_identifier().to_string(),
        };
        if self.repository.snapshot_exists(&query, snapshot.saved_version).await? {
            return Ok(Some(snapshot));
        }

        self.writer.write_snapshot(&snapshot).await?;
        Ok(Some(snapshot))
    }

    /// New multi-stream host using the configured window
    pub fn multi_projection<Pr: Projector>(&self, projector: Arc<Pr>, root_partition_key: &str) -> MultiProjectionHost<Pr> {
        MultiProjectionHost::new(projector, root_partition_key, self.config.window.clone())
    }

    /// Counters for the temporary tier plus tracked hybrid partitions
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            temporary: self.tiers.temporary.stats(),
            hybrid_partitions: self.tiers.hybrid.len(),
            published: self.publisher.current_sequence_id(),
        }
    }

    /// Wipe every tier (test/reset scenarios)
    pub async fn reset(&self) -> StoreResult<()> {
        self.writer.clear_all().await
    }
}

/// Snapshot of service counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    pub temporary: StoreStats,
    pub hybrid_partitions: usize,
    pub published: u64,
}
