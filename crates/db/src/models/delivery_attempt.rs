use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Response bodies are captured up to this many bytes before truncation;
/// overridable per-deployment via `response.max_capture_bytes`.
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 4096;

/// One HTTP attempt at delivering a message, recorded regardless of outcome.
/// Append-only: never mutated after insert.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub attempt_number: i64,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub request_duration_ms: i64,
    pub target_url: String,
    /// JSON object of response headers.
    pub response_headers: String,
    pub processing_node: String,
}

pub struct CreateDeliveryAttempt {
    pub message_id: Uuid,
    pub attempt_number: i64,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub request_duration_ms: i64,
    pub target_url: String,
    pub response_headers: String,
    pub processing_node: String,
}

impl DeliveryAttempt {
    /// Append a new attempt row. Generic over the executor so callers run
    /// this in the same transaction as the message status update it
    /// reflects.
    pub async fn create<'e, E>(
        executor: E,
        data: &CreateDeliveryAttempt,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let id = Uuid::new_v4();
        sqlx::query_as!(
            DeliveryAttempt,
            r#"INSERT INTO delivery_attempts
                (id, message_id, attempt_number, status_code, response_body, error,
                 request_duration_ms, target_url, response_headers, processing_node)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING id as "id!: Uuid", message_id as "message_id!: Uuid",
                         attempt_number as "attempt_number!: i64", timestamp as "timestamp!: DateTime<Utc>",
                         status_code as "status_code: i64", response_body, error,
                         request_duration_ms as "request_duration_ms!: i64", target_url,
                         response_headers, processing_node"#,
            id,
            data.message_id,
            data.attempt_number,
            data.status_code,
            data.response_body,
            data.error,
            data.request_duration_ms,
            data.target_url,
            data.response_headers,
            data.processing_node,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_message_id(
        pool: &SqlitePool,
        message_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            DeliveryAttempt,
            r#"SELECT id as "id!: Uuid", message_id as "message_id!: Uuid",
                      attempt_number as "attempt_number!: i64", timestamp as "timestamp!: DateTime<Utc>",
                      status_code as "status_code: i64", response_body, error,
                      request_duration_ms as "request_duration_ms!: i64", target_url,
                      response_headers, processing_node
               FROM delivery_attempts
               WHERE message_id = $1
               ORDER BY attempt_number ASC"#,
            message_id
        )
        .fetch_all(pool)
        .await
    }

    /// Count of attempts recorded for a message, used by tests and
    /// invariant checks to confirm `retry_count == count(attempts)`.
    pub async fn count_for_message(pool: &SqlitePool, message_id: Uuid) -> Result<i64, sqlx::Error> {
        let row = sqlx::query!(
            "SELECT COUNT(*) as count FROM delivery_attempts WHERE message_id = $1",
            message_id
        )
        .fetch_one(pool)
        .await?;
        Ok(row.count)
    }

    /// Truncate a response body to `max_bytes`, appending an ellipsis
    /// marker when truncation occurred.
    pub fn truncate_body(body: &str, max_bytes: usize) -> String {
        if body.len() <= max_bytes {
            return body.to_string();
        }
        let mut end = max_bytes;
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}
