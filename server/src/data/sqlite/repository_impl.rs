//! `TelemetryStore` implementation for the SQLite service

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::repositories::{logs, spans, stats, traces};
use super::SqliteStore;
use crate::data::records::{LogRecord, SpanRecord, TraceRecord};
use crate::data::stats::{DashboardStats, ServiceMap, TraceSummary, TrafficPoint};
use crate::data::store::{StoreError, TelemetryStore};

#[async_trait]
impl TelemetryStore for SqliteStore {
    async fn insert_traces(&self, batch: &[TraceRecord]) -> Result<(), StoreError> {
        traces::insert_batch(&self.pool, batch).await?;
        Ok(())
    }

    async fn insert_spans(&self, batch: &[SpanRecord]) -> Result<(), StoreError> {
        spans::insert_batch(&self.pool, batch).await?;
        Ok(())
    }

    async fn insert_logs(&self, batch: &[LogRecord]) -> Result<(), StoreError> {
        logs::insert_batch(&self.pool, batch).await?;
        Ok(())
    }

    async fn dashboard_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        service: Option<&str>,
    ) -> Result<DashboardStats, StoreError> {
        let stats = stats::dashboard_stats(
            &self.pool,
            start.timestamp_micros(),
            end.timestamp_micros(),
            service,
        )
        .await?;
        Ok(stats)
    }

    async fn traffic_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        service: Option<&str>,
    ) -> Result<Vec<TrafficPoint>, StoreError> {
        let points = stats::traffic_series(
            &self.pool,
            start.timestamp_micros(),
            end.timestamp_micros(),
            service,
        )
        .await?;
        Ok(points)
    }

    async fn recent_traces(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        service: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TraceSummary>, StoreError> {
        let rows = stats::recent_traces(
            &self.pool,
            start.timestamp_micros(),
            end.timestamp_micros(),
            service,
            limit,
        )
        .await?;
        Ok(rows)
    }

    async fn service_map(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ServiceMap, StoreError> {
        let map = stats::service_map(
            &self.pool,
            start.timestamp_micros(),
            end.timestamp_micros(),
        )
        .await?;
        Ok(map)
    }

    async fn purge_older_than(&self, days: u32) -> Result<u64, StoreError> {
        let deleted = stats::purge_older_than(&self.pool, days).await?;
        Ok(deleted)
    }

    async fn vacuum(&self) -> Result<(), StoreError> {
        stats::vacuum(&self.pool).await?;
        Ok(())
    }
}
