//! Storage seam consumed by the batch writer and the snapshot hub
//!
//! The core never names a concrete database: the writer calls the batched
//! inserts, the snapshot hub calls the query surface, and tests swap in
//! in-memory fakes. All inserts are idempotent on primary-key collision so a
//! DLQ replay that raced a crash produces no duplicate rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::records::{LogRecord, SpanRecord, TraceRecord};
use super::stats::{DashboardStats, ServiceMap, TraceSummary, TrafficPoint};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Insert a batch of trace rows. Duplicate `trace_id`s are ignored.
    async fn insert_traces(&self, traces: &[TraceRecord]) -> Result<(), StoreError>;

    /// Insert a batch of spans. Duplicate `span_id`s are ignored.
    async fn insert_spans(&self, spans: &[SpanRecord]) -> Result<(), StoreError>;

    /// Insert a batch of logs. Ids are assigned by the store.
    async fn insert_logs(&self, logs: &[LogRecord]) -> Result<(), StoreError>;

    /// Dashboard aggregates over `[start, end]`, optionally restricted to one
    /// service.
    async fn dashboard_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        service: Option<&str>,
    ) -> Result<DashboardStats, StoreError>;

    /// Per-minute trace counts (with error breakdown) over `[start, end]`.
    async fn traffic_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        service: Option<&str>,
    ) -> Result<Vec<TrafficPoint>, StoreError>;

    /// Most recent traces in the window, newest first, capped at `limit`.
    async fn recent_traces(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        service: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TraceSummary>, StoreError>;

    /// Service topology (nodes from traces, directed edges from span
    /// parentage) over `[start, end]`.
    async fn service_map(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ServiceMap, StoreError>;

    /// Delete records older than `days` days. Returns deleted row count.
    async fn purge_older_than(&self, days: u32) -> Result<u64, StoreError>;

    /// Reclaim disk space. Only meaningful for embedded engines.
    async fn vacuum(&self) -> Result<(), StoreError>;
}
