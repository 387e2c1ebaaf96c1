//! Per-table SQLite repositories
//!
//! Free functions over a pool, one module per table plus the aggregate
//! queries used by the snapshot hub. Batched inserts chunk rows to stay well
//! under SQLite's bind-parameter limit and run inside one transaction so a
//! failed batch is all-or-nothing.

pub mod logs;
pub mod spans;
pub mod stats;
pub mod traces;

use chrono::{DateTime, Utc};

/// Rows per multi-row INSERT statement. The widest table (spans) binds 10
/// columns per row, so 64 rows stays under the 999-parameter default limit.
pub(crate) const INSERT_CHUNK_ROWS: usize = 64;

pub(crate) fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(us).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
