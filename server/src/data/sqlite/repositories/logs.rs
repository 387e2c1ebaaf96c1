//! Log table repository

use sqlx::SqlitePool;

use super::INSERT_CHUNK_ROWS;
use crate::data::records::LogRecord;

/// Insert a batch of logs. Ids are assigned by the store.
pub async fn insert_batch(pool: &SqlitePool, logs: &[LogRecord]) -> Result<(), sqlx::Error> {
    if logs.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for chunk in logs.chunks(INSERT_CHUNK_ROWS) {
        let placeholders: String = chunk
            .iter()
            .map(|_| "(?, ?, ?, ?, ?, ?, ?, ?)")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO logs (trace_id, span_id, severity, body, service_name, \
             attributes_json, ai_insight, timestamp_us) VALUES {placeholders}"
        );

        let mut query = sqlx::query(&sql);
        for l in chunk {
            query = query
                .bind(&l.trace_id)
                .bind(&l.span_id)
                .bind(l.severity.as_str())
                .bind(&l.body)
                .bind(&l.service_name)
                .bind(&l.attributes_json)
                .bind(l.ai_insight.as_deref())
                .bind(l.timestamp.timestamp_micros());
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::records::Severity;
    use crate::data::sqlite::test_pool;
    use chrono::Utc;

    fn make_log(body: &str) -> LogRecord {
        LogRecord {
            id: 0,
            trace_id: String::new(),
            span_id: String::new(),
            severity: Severity::Info,
            body: body.to_string(),
            service_name: "order".to_string(),
            attributes_json: "{}".to_string(),
            ai_insight: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_batch_assigns_ids() {
        let pool = test_pool().await;
        insert_batch(&pool, &[make_log("a"), make_log("b")])
            .await
            .unwrap();

        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, body FROM logs ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].0 > 0);
        assert!(rows[1].0 > rows[0].0);
    }

    #[tokio::test]
    async fn test_insert_batch_preserves_severity_label() {
        let pool = test_pool().await;
        let mut log = make_log("boom");
        log.severity = Severity::Fatal;
        insert_batch(&pool, &[log]).await.unwrap();

        let (severity,): (String,) = sqlx::query_as("SELECT severity FROM logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(severity, "FATAL");
    }
}
