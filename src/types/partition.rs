//! Partition key derivation
//!
//! Every persisted document carries a partition key derived from the root
//! tenant, the stream kind and (for per-aggregate runs) the aggregate id.
//! Documents sharing a partition key form one ordered run.

use uuid::Uuid;

/// Root partition used when the caller does not name a tenant
pub const DEFAULT_ROOT_PARTITION_KEY: &str = "default";

/// Partition key for one aggregate's event run
pub fn for_aggregate(root_partition_key: &str, stream_kind: &str, aggregate_id: Uuid) -> String {
    format!("{}_{}_{}", root_partition_key, stream_kind, aggregate_id)
}

/// Partition key covering a whole stream kind within a tenant (broad scans)
pub fn for_stream_kind(root_partition_key: &str, stream_kind: &str) -> String {
    format!("{}_{}", root_partition_key, stream_kind)
}

/// Partition key for snapshots of one projection of one aggregate
pub fn for_snapshot(root_partition_key: &str, projection_name: &str, aggregate_id: Uuid) -> String {
    format!("{}_{}_snapshot_{}", root_partition_key, projection_name, aggregate_id)
}
