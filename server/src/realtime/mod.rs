//! Live fan-out hubs
//!
//! Two WebSocket surfaces: a per-entry log stream (`broadcast`) and a
//! debounced aggregate view (`snapshot`). Both are best-effort: a record may
//! reach a dashboard before it is durably stored, and neither hub is allowed
//! to block the ingest path.

pub mod broadcast;
pub mod snapshot;

pub use broadcast::BroadcastHub;
pub use snapshot::SnapshotHub;
