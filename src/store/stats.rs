//! Store statistics

use std::collections::HashMap;

use serde::Serialize;

/// Counters describing the content of one store tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Number of events held
    pub event_count: usize,
    /// Number of distinct event partitions
    pub partition_count: usize,
    /// Number of snapshot documents held
    pub snapshot_count: usize,
    /// Events by payload type
    pub events_by_type: HashMap<String, usize>,
    /// Bytes on disk (zero for in-memory tiers)
    pub size_bytes: u64,
}

impl StoreStats {
    /// Count one event of `payload_type`
    pub(crate) fn record_event(&mut self, payload_type: &str) {
        self.event_count += 1;
        *self.events_by_type.entry(payload_type.to_string()).or_insert(0) += 1;
    }

    /// Most frequent payload types, descending
    pub fn top_payload_types(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut types: Vec<_> = self
            .events_by_type
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        types.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        types.truncate(limit);
        types
    }
}

/// On-disk footprint in binary units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSize(pub u64);

impl std::fmt::Display for DiskSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

        if self.0 < 1024 {
            return write!(f, "{} bytes", self.0);
        }
        let mut scaled = self.0 as f64 / 1024.0;
        let mut unit = 0;
        while scaled >= 1024.0 && unit + 1 < UNITS.len() {
            scaled /= 1024.0;
            unit += 1;
        }
        write!(f, "{:.1} {}", scaled, UNITS[unit])
    }
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} events in {} partitions, {} snapshots, {} on disk",
            self.event_count,
            self.partition_count,
            self.snapshot_count,
            DiskSize(self.size_bytes)
        )
    }
}
