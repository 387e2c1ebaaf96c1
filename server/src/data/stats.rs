//! Aggregate types served by the snapshot hub
//!
//! Plain serde structs; all latency figures derive from microsecond span
//! durations stored in SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error counts for a single service, used by the top-failing list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceErrorCount {
    pub service_name: String,
    pub error_count: i64,
    pub total_count: i64,
    pub error_rate: f64,
}

/// High-level dashboard aggregates over the rolling window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_traces: i64,
    pub total_logs: i64,
    pub total_errors: i64,
    pub avg_latency_ms: f64,
    /// Percentage in `[0, 100]`.
    pub error_rate: f64,
    pub active_services: i64,
    pub p99_latency_us: i64,
    pub top_failing_services: Vec<ServiceErrorCount>,
}

/// One per-minute bucket of the traffic chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficPoint {
    pub timestamp: DateTime<Utc>,
    pub count: i64,
    pub error_count: i64,
}

/// A trace row plus its span count, for the recent-traces panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub service_name: String,
    pub operation: String,
    pub status: String,
    pub duration_us: i64,
    pub timestamp: DateTime<Utc>,
    pub span_count: i64,
}

/// A service node on the service map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMapNode {
    pub name: String,
    pub total_traces: i64,
    pub error_count: i64,
    pub avg_latency_ms: f64,
}

/// A directed caller → callee connection derived from span parentage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMapEdge {
    pub source: String,
    pub target: String,
    pub call_count: i64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

/// Complete service topology with per-node and per-edge metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMap {
    pub nodes: Vec<ServiceMapNode>,
    pub edges: Vec<ServiceMapEdge>,
}
