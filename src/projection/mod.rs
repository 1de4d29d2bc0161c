//! Projections: replaying events into typed state
//!
//! A [`Projector`] describes one projection: its name, which streams it
//! reads, the schema identifier of its payload and the transition table.
//! [`ProjectionState`] holds the replay result and enforces the ordering,
//! idempotency and lifecycle rules; it is the same type for aggregates,
//! single-stream and multi-stream projections, tagged by [`ProjectionKind`].

mod multi;
mod state;
mod transition;
mod window;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use multi::{EventSource, MultiProjectionHost};
pub use state::{ProjectionState, ReplayPhase};
pub use transition::{Transition, TransitionTable};
pub use window::ConsistencyWindow;

/// Which replay rules apply to a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectionKind {
    /// One aggregate's own stream
    Aggregate,
    /// A read model over one aggregate's stream
    SingleProjection,
    /// A read model over many streams, fed through a consistency window
    MultiProjection,
}

impl ProjectionKind {
    /// Whether states of this kind belong to exactly one aggregate
    pub fn is_per_aggregate(&self) -> bool {
        !matches!(self, ProjectionKind::MultiProjection)
    }

    /// Whether the initial-event flag must agree with the version
    pub fn validates_lifecycle(&self) -> bool {
        self.is_per_aggregate()
    }
}

/// Definition of a projection
pub trait Projector: Send + Sync + 'static {
    /// Typed state produced by replay
    type Payload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Projection name, used in snapshot partition keys
    fn name(&self) -> &str;

    /// Stream kind of the aggregates this projection replays
    fn stream_kind(&self) -> &str;

    /// Stream kinds a multi-stream projection subscribes to
    fn source_streams(&self) -> Vec<String> {
        vec![self.stream_kind().to_string()]
    }

    /// Schema identifier; snapshots with another identifier are never applied
    fn payload_version_identifier(&self) -> &str;

    fn kind(&self) -> ProjectionKind {
        ProjectionKind::Aggregate
    }

    /// Payload of a state that has not seen any event
    fn initial_payload(&self) -> Self::Payload;

    fn transitions(&self) -> &TransitionTable<Self::Payload>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_rules() {
        assert!(ProjectionKind::Aggregate.validates_lifecycle());
        assert!(ProjectionKind::SingleProjection.validates_lifecycle());
        assert!(!ProjectionKind::MultiProjection.validates_lifecycle());
        assert!(ProjectionKind::SingleProjection.is_per_aggregate());
        assert!(!ProjectionKind::MultiProjection.is_per_aggregate());
    }
}
