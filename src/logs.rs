//! Append-only client event log.

use sqlx::SqlitePool;
use tracing::debug;

use crate::models::LogCreate;

/// Insert a batch of events in one transaction; either all land or none do.
/// Returns the number of events written.
pub async fn append_events(pool: &SqlitePool, events: &[LogCreate]) -> Result<usize, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    for event in events {
        let payload = serde_json::Value::Object(event.payload.clone()).to_string();
        sqlx::query(
            "INSERT INTO logs (session_id, event_type, payload_json, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(&event.session_id)
        .bind(&event.event_type)
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!(count = events.len(), "appended log events");
    Ok(events.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;

    #[tokio::test]
    async fn test_append_events_stores_payload_json() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::create_schema(&pool).await.unwrap();

        let events: Vec<LogCreate> = serde_json::from_value(serde_json::json!([
            { "session_id": "s1", "event_type": "keystroke", "payload": { "key": "a" } },
            { "session_id": "s1", "event_type": "button_click", "payload": { "task": "improve" } }
        ]))
        .unwrap();

        assert_eq!(append_events(&pool, &events).await.unwrap(), 2);
        assert_eq!(append_events(&pool, &[]).await.unwrap(), 0);

        let rows = sqlx::query("SELECT event_type, payload_json, timestamp FROM logs ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let payload: String = rows[1].get("payload_json");
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["task"], "improve");
        let ts: i64 = rows[0].get("timestamp");
        assert!(ts > 0);
    }
}
