//! SQLite schema
//!
//! Created at startup with `IF NOT EXISTS`; there is no migration history to
//! carry for an embedded single-file store. Timestamps are unix microseconds.
//! No foreign keys between spans/logs and traces: async ingestion may write
//! spans before the trace root arrives.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS traces (
    trace_id     TEXT PRIMARY KEY,
    service_name TEXT NOT NULL,
    operation    TEXT NOT NULL,
    status       TEXT NOT NULL,
    duration_us  INTEGER NOT NULL,
    timestamp_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_traces_timestamp ON traces (timestamp_us);
CREATE INDEX IF NOT EXISTS idx_traces_service ON traces (service_name);

CREATE TABLE IF NOT EXISTS spans (
    span_id         TEXT PRIMARY KEY,
    parent_span_id  TEXT NOT NULL DEFAULT '',
    trace_id        TEXT NOT NULL,
    service_name    TEXT NOT NULL,
    operation_name  TEXT NOT NULL,
    start_time_us   INTEGER NOT NULL,
    end_time_us     INTEGER NOT NULL,
    duration_us     INTEGER NOT NULL,
    attributes_json TEXT NOT NULL DEFAULT '{}',
    status          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans (trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_start ON spans (start_time_us);

CREATE TABLE IF NOT EXISTS logs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id        TEXT NOT NULL DEFAULT '',
    span_id         TEXT NOT NULL DEFAULT '',
    severity        TEXT NOT NULL,
    body            TEXT NOT NULL,
    service_name    TEXT NOT NULL,
    attributes_json TEXT NOT NULL DEFAULT '{}',
    ai_insight      TEXT,
    timestamp_us    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs (timestamp_us);
CREATE INDEX IF NOT EXISTS idx_logs_service ON logs (service_name);
"#;
