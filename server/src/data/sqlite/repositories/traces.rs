//! Trace table repository

use sqlx::SqlitePool;

use super::INSERT_CHUNK_ROWS;
use crate::data::records::TraceRecord;

/// Insert a batch of trace rows. Duplicate `trace_id`s are silently ignored
/// so re-ingest and DLQ replay stay idempotent.
pub async fn insert_batch(pool: &SqlitePool, traces: &[TraceRecord]) -> Result<(), sqlx::Error> {
    if traces.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for chunk in traces.chunks(INSERT_CHUNK_ROWS) {
        let placeholders: String = chunk
            .iter()
            .map(|_| "(?, ?, ?, ?, ?, ?)")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO traces (trace_id, service_name, operation, status, duration_us, timestamp_us) \
             VALUES {placeholders} ON CONFLICT DO NOTHING"
        );

        let mut query = sqlx::query(&sql);
        for t in chunk {
            query = query
                .bind(&t.trace_id)
                .bind(&t.service_name)
                .bind(&t.operation)
                .bind(&t.status)
                .bind(t.duration_us)
                .bind(t.timestamp.timestamp_micros());
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(())
}
