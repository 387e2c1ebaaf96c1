//! Data layer
//!
//! - `records` - the three record kinds flowing through the pipeline
//! - `stats` - aggregate types served by the snapshot hub
//! - `store` - the `TelemetryStore` seam the core depends on
//! - `sqlite` - the embedded store implementation

pub mod records;
pub mod sqlite;
pub mod stats;
pub mod store;

pub use records::{LogRecord, RecordKind, Severity, SpanRecord, TraceRecord};
pub use sqlite::SqliteStore;
pub use store::{StoreError, TelemetryStore};
