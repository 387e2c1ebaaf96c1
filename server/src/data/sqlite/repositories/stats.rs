//! Aggregate queries for the snapshot hub
//!
//! Mirrors the dashboard surface: totals and error rate, latency (avg + p99),
//! per-minute traffic, recent traces, and the service map. Service-map edges
//! are derived as directed parent → child connections by joining spans on
//! `(trace_id, parent_span_id)` where the two services differ.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use super::from_micros;
use crate::data::stats::{
    DashboardStats, ServiceErrorCount, ServiceMap, ServiceMapEdge, ServiceMapNode, TraceSummary,
    TrafficPoint,
};

const TOP_FAILING_LIMIT: u32 = 5;

fn service_clause(service: Option<&str>) -> &'static str {
    if service.is_some() {
        " AND service_name = ?"
    } else {
        ""
    }
}

/// High-level dashboard aggregates over `[start_us, end_us]`.
pub async fn dashboard_stats(
    pool: &SqlitePool,
    start_us: i64,
    end_us: i64,
    service: Option<&str>,
) -> Result<DashboardStats, sqlx::Error> {
    let svc = service_clause(service);
    let mut stats = DashboardStats::default();

    let sql = format!("SELECT COUNT(*) FROM traces WHERE timestamp_us BETWEEN ? AND ?{svc}");
    let mut q = sqlx::query_as::<_, (i64,)>(&sql).bind(start_us).bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    stats.total_traces = q.fetch_one(pool).await?.0;

    let sql = format!("SELECT COUNT(*) FROM logs WHERE timestamp_us BETWEEN ? AND ?{svc}");
    let mut q = sqlx::query_as::<_, (i64,)>(&sql).bind(start_us).bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    stats.total_logs = q.fetch_one(pool).await?.0;

    let sql = format!(
        "SELECT COUNT(*) FROM traces \
         WHERE timestamp_us BETWEEN ? AND ? AND status LIKE '%ERROR%'{svc}"
    );
    let mut q = sqlx::query_as::<_, (i64,)>(&sql).bind(start_us).bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    stats.total_errors = q.fetch_one(pool).await?.0;

    if stats.total_traces > 0 {
        stats.error_rate = (stats.total_errors as f64 / stats.total_traces as f64) * 100.0;
    }

    let sql = format!(
        "SELECT COALESCE(AVG(duration_us), 0.0) FROM traces \
         WHERE timestamp_us BETWEEN ? AND ?{svc}"
    );
    let mut q = sqlx::query_as::<_, (f64,)>(&sql).bind(start_us).bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    stats.avg_latency_ms = q.fetch_one(pool).await?.0 / 1000.0;

    let sql = format!(
        "SELECT COUNT(DISTINCT service_name) FROM traces \
         WHERE timestamp_us BETWEEN ? AND ?{svc}"
    );
    let mut q = sqlx::query_as::<_, (i64,)>(&sql).bind(start_us).bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    stats.active_services = q.fetch_one(pool).await?.0;

    let sql = format!(
        "SELECT duration_us FROM traces \
         WHERE timestamp_us BETWEEN ? AND ?{svc} ORDER BY duration_us ASC"
    );
    let mut q = sqlx::query_as::<_, (i64,)>(&sql).bind(start_us).bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    let durations: Vec<(i64,)> = q.fetch_all(pool).await?;
    if !durations.is_empty() {
        let idx = ((durations.len() as f64 * 0.99).ceil() as usize)
            .saturating_sub(1)
            .min(durations.len() - 1);
        stats.p99_latency_us = durations[idx].0;
    }

    let sql = format!(
        "SELECT service_name, COUNT(*) AS total_count, \
         SUM(CASE WHEN status LIKE '%ERROR%' THEN 1 ELSE 0 END) AS error_count \
         FROM traces WHERE timestamp_us BETWEEN ? AND ?{svc} \
         GROUP BY service_name HAVING error_count > 0 \
         ORDER BY error_count DESC LIMIT ?"
    );
    let mut q = sqlx::query_as::<_, (String, i64, i64)>(&sql)
        .bind(start_us)
        .bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    let rows: Vec<(String, i64, i64)> = q.bind(TOP_FAILING_LIMIT).fetch_all(pool).await?;
    stats.top_failing_services = rows
        .into_iter()
        .map(|(service_name, total_count, error_count)| ServiceErrorCount {
            service_name,
            error_count,
            total_count,
            error_rate: if total_count > 0 {
                error_count as f64 / total_count as f64
            } else {
                0.0
            },
        })
        .collect();

    Ok(stats)
}

/// Trace counts bucketed by minute, including error counts.
pub async fn traffic_series(
    pool: &SqlitePool,
    start_us: i64,
    end_us: i64,
    service: Option<&str>,
) -> Result<Vec<TrafficPoint>, sqlx::Error> {
    let svc = service_clause(service);
    let sql = format!(
        "SELECT timestamp_us, status FROM traces WHERE timestamp_us BETWEEN ? AND ?{svc}"
    );
    let mut q = sqlx::query_as::<_, (i64, String)>(&sql)
        .bind(start_us)
        .bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    let rows: Vec<(i64, String)> = q.fetch_all(pool).await?;

    const MINUTE_US: i64 = 60 * 1_000_000;
    let mut buckets: BTreeMap<i64, (i64, i64)> = BTreeMap::new();
    for (ts_us, status) in rows {
        let bucket = (ts_us / MINUTE_US) * MINUTE_US;
        let entry = buckets.entry(bucket).or_default();
        entry.0 += 1;
        if status.contains("ERROR") {
            entry.1 += 1;
        }
    }

    Ok(buckets
        .into_iter()
        .map(|(bucket_us, (count, error_count))| TrafficPoint {
            timestamp: from_micros(bucket_us),
            count,
            error_count,
        })
        .collect())
}

/// Most recent traces in the window, newest first.
pub async fn recent_traces(
    pool: &SqlitePool,
    start_us: i64,
    end_us: i64,
    service: Option<&str>,
    limit: u32,
) -> Result<Vec<TraceSummary>, sqlx::Error> {
    let svc = service_clause(service);
    let sql = format!(
        "SELECT t.trace_id, t.service_name, t.operation, t.status, t.duration_us, t.timestamp_us, \
         (SELECT COUNT(*) FROM spans s WHERE s.trace_id = t.trace_id) AS span_count \
         FROM traces t WHERE t.timestamp_us BETWEEN ? AND ?{svc} \
         ORDER BY t.timestamp_us DESC LIMIT ?"
    );
    let mut q = sqlx::query_as::<_, (String, String, String, String, i64, i64, i64)>(&sql)
        .bind(start_us)
        .bind(end_us);
    if let Some(s) = service {
        q = q.bind(s);
    }
    let rows = q.bind(limit).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(
            |(trace_id, service_name, operation, status, duration_us, ts_us, span_count)| {
                TraceSummary {
                    trace_id,
                    service_name,
                    operation,
                    status,
                    duration_us,
                    timestamp: from_micros(ts_us),
                    span_count,
                }
            },
        )
        .collect())
}

/// Per-service nodes from traces and directed caller → callee edges from
/// span parentage.
pub async fn service_map(
    pool: &SqlitePool,
    start_us: i64,
    end_us: i64,
) -> Result<ServiceMap, sqlx::Error> {
    let node_rows: Vec<(String, i64, i64, f64)> = sqlx::query_as(
        "SELECT service_name, COUNT(*) AS total, \
         SUM(CASE WHEN status LIKE '%ERROR%' THEN 1 ELSE 0 END) AS errors, \
         COALESCE(AVG(duration_us), 0.0) AS avg_duration \
         FROM traces WHERE timestamp_us BETWEEN ? AND ? \
         GROUP BY service_name",
    )
    .bind(start_us)
    .bind(end_us)
    .fetch_all(pool)
    .await?;

    let nodes = node_rows
        .into_iter()
        .filter(|(name, ..)| !name.is_empty())
        .map(|(name, total_traces, error_count, avg_duration)| ServiceMapNode {
            name,
            total_traces,
            error_count,
            avg_latency_ms: (avg_duration / 1000.0 * 100.0).round() / 100.0,
        })
        .collect();

    let edge_rows: Vec<(String, String, i64, f64, i64)> = sqlx::query_as(
        "SELECT p.service_name AS source, c.service_name AS target, \
         COUNT(*) AS calls, COALESCE(AVG(c.duration_us), 0.0) AS avg_duration, \
         SUM(CASE WHEN c.status LIKE '%ERROR%' THEN 1 ELSE 0 END) AS errors \
         FROM spans c \
         JOIN spans p ON p.trace_id = c.trace_id AND p.span_id = c.parent_span_id \
         WHERE c.parent_span_id != '' AND p.service_name != c.service_name \
           AND c.start_time_us BETWEEN ? AND ? \
         GROUP BY p.service_name, c.service_name",
    )
    .bind(start_us)
    .bind(end_us)
    .fetch_all(pool)
    .await?;

    let edges = edge_rows
        .into_iter()
        .map(|(source, target, call_count, avg_duration, errors)| ServiceMapEdge {
            source,
            target,
            call_count,
            avg_latency_ms: (avg_duration / 1000.0 * 100.0).round() / 100.0,
            error_rate: if call_count > 0 {
                (errors as f64 / call_count as f64 * 1000.0).round() / 1000.0
            } else {
                0.0
            },
        })
        .collect();

    Ok(ServiceMap { nodes, edges })
}

/// Delete records older than `days` days across all three tables.
pub async fn purge_older_than(pool: &SqlitePool, days: u32) -> Result<u64, sqlx::Error> {
    let cutoff_us = (Utc::now() - Duration::days(days as i64)).timestamp_micros();

    let mut deleted = 0u64;
    deleted += sqlx::query("DELETE FROM traces WHERE timestamp_us < ?")
        .bind(cutoff_us)
        .execute(pool)
        .await?
        .rows_affected();
    deleted += sqlx::query("DELETE FROM spans WHERE start_time_us < ?")
        .bind(cutoff_us)
        .execute(pool)
        .await?
        .rows_affected();
    deleted += sqlx::query("DELETE FROM logs WHERE timestamp_us < ?")
        .bind(cutoff_us)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(deleted)
}

pub async fn vacuum(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("VACUUM").execute(pool).await?;
    Ok(())
}
