//! Telemetry record types
//!
//! The three record kinds that flow through the ingest pipeline. Timestamps
//! are UTC `chrono` instants; conversion from OTLP unix-nanos happens once,
//! at the decode boundary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log severity, normalized to the canonical uppercase set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Numeric rank used by the ingestion filter (DEBUG=10 .. FATAL=50).
    pub fn numeric(self) -> u8 {
        match self {
            Severity::Debug => 10,
            Severity::Info => 20,
            Severity::Warn => 30,
            Severity::Error => 40,
            Severity::Fatal => 50,
        }
    }

    /// Normalize a severity label. Unknown values map to `Info`, which makes
    /// normalization idempotent: the output set is a fixed point of the input.
    pub fn normalize(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "DEBUG" => Severity::Debug,
            "INFO" => Severity::Info,
            "WARN" | "WARNING" => Severity::Warn,
            "ERROR" | "ERR" => Severity::Error,
            "FATAL" | "CRITICAL" => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind discriminator for batches moving through the writer and the DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Trace,
    Span,
    Log,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Trace => write!(f, "trace"),
            RecordKind::Span => write!(f, "span"),
            RecordKind::Log => write!(f, "log"),
        }
    }
}

/// A distributed trace root row. Identity is `trace_id`; duplicate ingest is
/// idempotent-append (later span batches may still arrive for it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub service_name: String,
    pub operation: String,
    /// One of `OK`, `ERROR`, `UNSET`.
    pub status: String,
    /// Microseconds.
    pub duration_us: i64,
    pub timestamp: DateTime<Utc>,
}

/// A single span. Child of a trace via `trace_id`; no foreign key is enforced
/// because async ingestion may write spans before the trace root is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_id: String,
    pub service_name: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Microseconds.
    pub duration_us: i64,
    pub attributes_json: String,
    pub status: String,
}

/// A log record. `id` is assigned by the store (0 until persisted); empty
/// `trace_id`/`span_id` mean the log is not correlated to a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    pub severity: Severity,
    pub body: String,
    pub service_name: String,
    pub attributes_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_insight: Option<String>,
    pub timestamp: DateTime<Utc>,
}
