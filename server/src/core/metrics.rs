//! Prometheus metrics
//!
//! All metrics live in the default registry under the `argus` namespace and
//! are rendered in textual exposition format by `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

fn new_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace("argus"))
        .expect("failed to create counter");
    prometheus::register(Box::new(counter.clone())).expect("failed to register counter");
    counter
}

fn new_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let vec = IntCounterVec::new(Opts::new(name, help).namespace("argus"), labels)
        .expect("failed to create counter vec");
    prometheus::register(Box::new(vec.clone())).expect("failed to register counter vec");
    vec
}

fn new_gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::with_opts(Opts::new(name, help).namespace("argus"))
        .expect("failed to create gauge");
    prometheus::register(Box::new(gauge.clone())).expect("failed to register gauge");
    gauge
}

fn new_histogram(name: &str, help: &str) -> Histogram {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).namespace("argus"))
        .expect("failed to create histogram");
    prometheus::register(Box::new(histogram.clone())).expect("failed to register histogram");
    histogram
}

pub struct ArgusMetrics {
    /// Records admitted by the ingestion filter
    pub ingestion_rate: IntCounter,
    /// Connected WebSocket clients across both hubs
    pub active_connections: IntGauge,
    /// Batched-insert wall clock, in seconds
    pub db_latency: Histogram,
    /// Files currently spooled in the dead-letter queue
    pub dlq_size: IntGauge,
    /// DLQ files successfully replayed and removed
    pub dlq_replayed: IntCounter,
    /// Failed DLQ writes; each one is a data-loss event
    pub dlq_write_failures: IntCounter,
    /// Records dropped because the writer queue was full
    pub writer_overflow: IntCounter,
    /// Log entries dropped because the broadcast channel was full
    pub broadcast_dropped: IntCounter,
    /// Records rejected by the ingestion filter, by reason
    pub filter_rejected: IntCounterVec,
}

impl Default for ArgusMetrics {
    fn default() -> Self {
        Self {
            ingestion_rate: new_counter("ingestion_rate", "Number of records admitted by ingest"),
            active_connections: new_gauge(
                "active_connections",
                "Connected WebSocket clients across both hubs",
            ),
            db_latency: new_histogram("db_latency", "Batched insert latency in seconds"),
            dlq_size: new_gauge("dlq_size", "Files currently in the dead-letter queue"),
            dlq_replayed: new_counter("dlq_replayed", "DLQ files replayed and removed"),
            dlq_write_failures: new_counter(
                "dlq_write_failures",
                "Failed DLQ writes (data loss events)",
            ),
            writer_overflow: new_counter(
                "writer_overflow",
                "Records dropped on writer queue overflow",
            ),
            broadcast_dropped: new_counter(
                "broadcast_dropped",
                "Log entries dropped on broadcast channel overflow",
            ),
            filter_rejected: new_counter_vec(
                "filter_rejected",
                "Records rejected by the ingestion filter",
                &["reason"],
            ),
        }
    }
}

pub static METRICS: Lazy<ArgusMetrics> = Lazy::new(ArgusMetrics::default);

/// Render all registered metrics in Prometheus textual format.
pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).to_string()
}
