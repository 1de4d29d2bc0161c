//! Data types for the replay engine
//!
//! Plain data shared by every layer: ordering keys, events, snapshots and
//! partition key derivation.

mod event;
mod ordering_key;
pub mod partition;
mod snapshot;

pub use event::{DocumentType, Event};
pub use ordering_key::{OrderingKey, TICK_DIGITS, TIE_BREAKER_DIGITS};
pub use partition::DEFAULT_ROOT_PARTITION_KEY;
pub use snapshot::SnapshotDocument;
