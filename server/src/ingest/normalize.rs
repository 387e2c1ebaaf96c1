//! OTLP decoding and normalization
//!
//! Converts wire-format `ResourceSpans` / `ResourceLogs` into internal
//! records. All normalization happens here, once, at the ingest boundary:
//! unix-nanos become UTC instants, severity collapses to the canonical set,
//! and attributes flatten into a stable JSON object (sorted keys).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::trace::v1::Status;

use crate::data::records::{LogRecord, Severity, SpanRecord, TraceRecord};

const SERVICE_NAME_ATTR: &str = "service.name";

/// Fallback when a resource carries no `service.name`.
const UNKNOWN_SERVICE: &str = "unknown";

// ============================================================================
// ATTRIBUTE EXTRACTION
// ============================================================================

/// Extract attributes from a KeyValue array into a sorted map.
pub fn extract_attributes(attrs: &[KeyValue]) -> BTreeMap<String, String> {
    attrs
        .iter()
        .filter_map(|kv| {
            kv.value
                .as_ref()
                .map(|v| (kv.key.clone(), any_value_to_string(v)))
        })
        .collect()
}

/// Serialize an attribute map as a JSON object. Sorted keys make the output
/// stable for identical inputs.
pub fn attrs_to_json(attrs: &BTreeMap<String, String>) -> String {
    serde_json::to_string(attrs).unwrap_or_else(|_| "{}".to_string())
}

/// Convert AnyValue to its string representation.
fn any_value_to_string(value: &AnyValue) -> String {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => s.clone(),
        Some(any_value::Value::BoolValue(b)) => b.to_string(),
        Some(any_value::Value::IntValue(i)) => i.to_string(),
        Some(any_value::Value::DoubleValue(d)) => d.to_string(),
        Some(any_value::Value::ArrayValue(arr)) => {
            let values: Vec<String> = arr.values.iter().map(any_value_to_string).collect();
            serde_json::to_string(&values).unwrap_or_default()
        }
        Some(any_value::Value::KvlistValue(kvlist)) => {
            let map: BTreeMap<String, String> = kvlist
                .values
                .iter()
                .filter_map(|kv| {
                    kv.value
                        .as_ref()
                        .map(|v| (kv.key.clone(), any_value_to_string(v)))
                })
                .collect();
            serde_json::to_string(&map).unwrap_or_default()
        }
        Some(any_value::Value::BytesValue(b)) => hex::encode(b),
        None => String::new(),
    }
}

fn resource_service_name(attrs: &[KeyValue]) -> String {
    attrs
        .iter()
        .find(|kv| kv.key == SERVICE_NAME_ATTR)
        .and_then(|kv| kv.value.as_ref())
        .map(any_value_to_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

// ============================================================================
// TIME & STATUS
// ============================================================================

pub(crate) fn datetime_from_nanos(nanos: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos as i64)
}

fn status_label(status: Option<&Status>) -> &'static str {
    match status.map(|s| s.code) {
        Some(1) => "OK",
        Some(2) => "ERROR",
        _ => "UNSET",
    }
}

/// Map OTLP severity to the canonical set. The numeric ranges of the OTLP
/// data model take precedence; the free-form text is a fallback, and anything
/// unrecognized lands on `Info`.
fn normalize_severity(number: i32, text: &str) -> Severity {
    match number {
        1..=8 => Severity::Debug,
        9..=12 => Severity::Info,
        13..=16 => Severity::Warn,
        17..=20 => Severity::Error,
        21..=24 => Severity::Fatal,
        _ => Severity::normalize(text),
    }
}

// ============================================================================
// TRACES
// ============================================================================

/// Decode an OTLP trace export into trace rows with their spans, grouped by
/// `trace_id` in first-seen order. Spans without ids are dropped.
pub fn decode_traces(request: &ExportTraceServiceRequest) -> Vec<(TraceRecord, Vec<SpanRecord>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<SpanRecord>> = HashMap::new();

    for resource_spans in &request.resource_spans {
        let service_name = resource_spans
            .resource
            .as_ref()
            .map(|r| resource_service_name(&r.attributes))
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());

        for scope_spans in &resource_spans.scope_spans {
            for span in &scope_spans.spans {
                if span.trace_id.is_empty() || span.span_id.is_empty() {
                    continue;
                }
                let trace_id = hex::encode(&span.trace_id);
                let start_time = datetime_from_nanos(span.start_time_unix_nano);
                let end_time = datetime_from_nanos(span.end_time_unix_nano);
                let duration_us =
                    (span.end_time_unix_nano.saturating_sub(span.start_time_unix_nano) / 1000)
                        as i64;

                let record = SpanRecord {
                    span_id: hex::encode(&span.span_id),
                    parent_span_id: hex::encode(&span.parent_span_id),
                    trace_id: trace_id.clone(),
                    service_name: service_name.clone(),
                    operation_name: span.name.clone(),
                    start_time,
                    end_time,
                    duration_us,
                    attributes_json: attrs_to_json(&extract_attributes(&span.attributes)),
                    status: status_label(span.status.as_ref()).to_string(),
                };

                if !groups.contains_key(&trace_id) {
                    order.push(trace_id.clone());
                }
                groups.entry(trace_id).or_default().push(record);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|trace_id| {
            let spans = groups.remove(&trace_id)?;
            let trace = trace_from_spans(&trace_id, &spans)?;
            Some((trace, spans))
        })
        .collect()
}

/// Derive the trace row from its spans: the root span (no parent) defines
/// operation, status, duration and timestamp; when the root has not arrived
/// yet, the earliest span stands in and the duration covers the whole group.
fn trace_from_spans(trace_id: &str, spans: &[SpanRecord]) -> Option<TraceRecord> {
    let root = spans.iter().find(|s| s.parent_span_id.is_empty());
    let earliest = spans.iter().min_by_key(|s| s.start_time)?;

    let (anchor, duration_us) = match root {
        Some(root) => (root, root.duration_us),
        None => {
            let latest_end = spans.iter().map(|s| s.end_time).max()?;
            let total_us = (latest_end - earliest.start_time)
                .num_microseconds()
                .unwrap_or(0);
            (earliest, total_us.max(0))
        }
    };

    Some(TraceRecord {
        trace_id: trace_id.to_string(),
        service_name: anchor.service_name.clone(),
        operation: anchor.operation_name.clone(),
        status: anchor.status.clone(),
        duration_us,
        timestamp: anchor.start_time,
    })
}

// ============================================================================
// LOGS
// ============================================================================

/// Decode an OTLP logs export into log records.
pub fn decode_logs(request: &ExportLogsServiceRequest) -> Vec<LogRecord> {
    let mut records = Vec::new();

    for resource_logs in &request.resource_logs {
        let service_name = resource_logs
            .resource
            .as_ref()
            .map(|r| resource_service_name(&r.attributes))
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());

        for scope_logs in &resource_logs.scope_logs {
            for log in &scope_logs.log_records {
                let timestamp = if log.time_unix_nano != 0 {
                    datetime_from_nanos(log.time_unix_nano)
                } else if log.observed_time_unix_nano != 0 {
                    datetime_from_nanos(log.observed_time_unix_nano)
                } else {
                    Utc::now()
                };

                records.push(LogRecord {
                    id: 0,
                    trace_id: hex::encode(&log.trace_id),
                    span_id: hex::encode(&log.span_id),
                    severity: normalize_severity(log.severity_number, &log.severity_text),
                    body: log.body.as_ref().map(any_value_to_string).unwrap_or_default(),
                    service_name: service_name.clone(),
                    attributes_json: attrs_to_json(&extract_attributes(&log.attributes)),
                    ai_insight: None,
                    timestamp,
                });
            }
        }
    }

    records
}
