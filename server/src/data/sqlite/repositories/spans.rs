//! Span table repository

use sqlx::SqlitePool;

use super::INSERT_CHUNK_ROWS;
use crate::data::records::SpanRecord;

/// Insert a batch of spans. Duplicate `span_id`s are silently ignored.
pub async fn insert_batch(pool: &SqlitePool, spans: &[SpanRecord]) -> Result<(), sqlx::Error> {
    if spans.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for chunk in spans.chunks(INSERT_CHUNK_ROWS) {
        let placeholders: String = chunk
            .iter()
            .map(|_| "(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO spans (span_id, parent_span_id, trace_id, service_name, operation_name, \
             start_time_us, end_time_us, duration_us, attributes_json, status) \
             VALUES {placeholders} ON CONFLICT DO NOTHING"
        );

        let mut query = sqlx::query(&sql);
        for s in chunk {
            query = query
                .bind(&s.span_id)
                .bind(&s.parent_span_id)
                .bind(&s.trace_id)
                .bind(&s.service_name)
                .bind(&s.operation_name)
                .bind(s.start_time.timestamp_micros())
                .bind(s.end_time.timestamp_micros())
                .bind(s.duration_us)
                .bind(&s.attributes_json)
                .bind(&s.status);
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::test_pool;
    use chrono::Utc;

    fn make_span(id: &str, trace_id: &str) -> SpanRecord {
        let now = Utc::now();
        SpanRecord {
            span_id: id.to_string(),
            parent_span_id: String::new(),
            trace_id: trace_id.to_string(),
            service_name: "order".to_string(),
            operation_name: "db.query".to_string(),
            start_time: now,
            end_time: now,
            duration_us: 250,
            attributes_json: "{}".to_string(),
            status: "OK".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_batch_idempotent() {
        let pool = test_pool().await;
        let spans = vec![make_span("s1", "t1"), make_span("s2", "t1")];
        insert_batch(&pool, &spans).await.unwrap();
        insert_batch(&pool, &spans).await.unwrap();

        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM spans")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_insert_batch_no_trace_parent_required() {
        // Spans may land before their trace root exists.
        let pool = test_pool().await;
        insert_batch(&pool, &[make_span("orphan", "missing-trace")])
            .await
            .unwrap();

        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM spans")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
