use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Lifecycle state of a `Message`. See spec §3 for the invariants tying
/// `status` to `next_retry`.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "message_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Message {
    pub id: Uuid,
    pub webhook_config_id: Uuid,
    #[ts(type = "number[]")]
    pub payload: Vec<u8>,
    pub target_url: String,
    pub signature: String,
    /// JSON object of headers merged from config + per-message overrides.
    pub headers: String,
    pub status: String,
    pub retry_count: i64,
    pub next_retry: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct CreateMessage {
    pub webhook_config_id: Uuid,
    pub payload: Vec<u8>,
    pub target_url: String,
    pub signature: String,
    pub headers: String,
}

impl Message {
    pub fn status(&self) -> MessageStatus {
        self.status.parse().unwrap_or(MessageStatus::Failed)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            Message,
            r#"SELECT id as "id!: Uuid", webhook_config_id as "webhook_config_id!: Uuid",
                      payload, target_url, signature, headers, status,
                      retry_count as "retry_count!: i64", next_retry as "next_retry: DateTime<Utc>",
                      last_error, created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM messages WHERE id = $1"#,
            id
        )
        .fetch_optional(pool)
        .await
    }

    /// Insert a new message in `PENDING` status. Generic over the executor
    /// so callers needing to append an attempt atomically can pass an open
    /// transaction instead of the pool.
    pub async fn create<'e, E>(executor: E, data: &CreateMessage) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let id = Uuid::new_v4();
        sqlx::query_as!(
            Message,
            r#"INSERT INTO messages (id, webhook_config_id, payload, target_url, signature, headers)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id as "id!: Uuid", webhook_config_id as "webhook_config_id!: Uuid",
                         payload, target_url, signature, headers, status,
                         retry_count as "retry_count!: i64", next_retry as "next_retry: DateTime<Utc>",
                         last_error, created_at as "created_at!: DateTime<Utc>",
                         updated_at as "updated_at!: DateTime<Utc>""#,
            id,
            data.webhook_config_id,
            data.payload,
            data.target_url,
            data.signature,
            data.headers,
        )
        .fetch_one(executor)
        .await
    }

    /// Atomic compare-and-set `{PENDING,FAILED} -> PROCESSING`.
    ///
    /// This is the sole serialization point for a message: the `UPDATE ...
    /// WHERE status IN (...)` only matches (and only one concurrent caller
    /// can win the row lock for) a message not already claimed, so exactly
    /// one caller among any number of concurrent claimants observes
    /// `rows_affected() == 1`.
    pub async fn claim_for_processing<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let result = sqlx::query!(
            r#"UPDATE messages
               SET status = 'processing', updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND status IN ('pending', 'failed')"#,
            id
        )
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn finish_delivered<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query!(
            r#"UPDATE messages
               SET status = 'delivered', next_retry = NULL, last_error = NULL,
                   retry_count = retry_count + 1, updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND status = 'processing'"#,
            id
        )
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn finish_cancelled(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query!(
            r#"UPDATE messages
               SET status = 'cancelled', next_retry = NULL, updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND status IN ('pending', 'failed')"#,
            id
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a retryable or terminal failure. `next_retry = None` makes
    /// this transition terminal (spec §3 invariant on `next_retry IS NULL`).
    pub async fn mark_failed<'e, E>(
        executor: E,
        id: Uuid,
        error: &str,
        next_retry: Option<DateTime<Utc>>,
        bump_retry_count: bool,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        if bump_retry_count {
            sqlx::query!(
                r#"UPDATE messages
                   SET status = 'failed', last_error = $2, next_retry = $3,
                       retry_count = retry_count + 1, updated_at = datetime('now', 'subsec')
                   WHERE id = $1"#,
                id,
                error,
                next_retry,
            )
            .execute(executor)
            .await?;
        } else {
            sqlx::query!(
                r#"UPDATE messages
                   SET status = 'failed', last_error = $2, next_retry = $3,
                       updated_at = datetime('now', 'subsec')
                   WHERE id = $1"#,
                id,
                error,
                next_retry,
            )
            .execute(executor)
            .await?;
        }
        Ok(())
    }

    pub async fn set_target_url(pool: &SqlitePool, id: Uuid, target_url: &str) -> Result<(), sqlx::Error> {
        sqlx::query!(
            "UPDATE messages SET target_url = $2, updated_at = datetime('now', 'subsec') WHERE id = $1",
            id,
            target_url
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Messages in `RETRYING`-equivalent (`FAILED` with a due `next_retry`).
    pub async fn find_ready_for_retry(
        pool: &SqlitePool,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Message,
            r#"SELECT id as "id!: Uuid", webhook_config_id as "webhook_config_id!: Uuid",
                      payload, target_url, signature, headers, status,
                      retry_count as "retry_count!: i64", next_retry as "next_retry: DateTime<Utc>",
                      last_error, created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM messages
               WHERE status = 'failed' AND next_retry IS NOT NULL
                 AND next_retry <= datetime('now', 'subsec')
               ORDER BY next_retry ASC
               LIMIT $1"#,
            limit
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_pending(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Message,
            r#"SELECT id as "id!: Uuid", webhook_config_id as "webhook_config_id!: Uuid",
                      payload, target_url, signature, headers, status,
                      retry_count as "retry_count!: i64", next_retry as "next_retry: DateTime<Utc>",
                      last_error, created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM messages
               WHERE status = 'pending'
               ORDER BY created_at ASC
               LIMIT $1"#,
            limit
        )
        .fetch_all(pool)
        .await
    }

    /// Messages stuck in `PROCESSING` past `threshold` — candidate zombies.
    pub async fn find_stuck(
        pool: &SqlitePool,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Message,
            r#"SELECT id as "id!: Uuid", webhook_config_id as "webhook_config_id!: Uuid",
                      payload, target_url, signature, headers, status,
                      retry_count as "retry_count!: i64", next_retry as "next_retry: DateTime<Utc>",
                      last_error, created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM messages
               WHERE status = 'processing' AND updated_at < $1"#,
            threshold
        )
        .fetch_all(pool)
        .await
    }

    /// Terminal `FAILED` messages (those created within the window) eligible
    /// for admin `bulk_retry`.
    pub async fn find_terminal_failed_since(
        pool: &SqlitePool,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Message,
            r#"SELECT id as "id!: Uuid", webhook_config_id as "webhook_config_id!: Uuid",
                      payload, target_url, signature, headers, status,
                      retry_count as "retry_count!: i64", next_retry as "next_retry: DateTime<Utc>",
                      last_error, created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM messages
               WHERE status = 'failed' AND next_retry IS NULL AND created_at >= $1
               ORDER BY created_at DESC
               LIMIT $2"#,
            since,
            limit
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_config(
        pool: &SqlitePool,
        webhook_config_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Message,
            r#"SELECT id as "id!: Uuid", webhook_config_id as "webhook_config_id!: Uuid",
                      payload, target_url, signature, headers, status,
                      retry_count as "retry_count!: i64", next_retry as "next_retry: DateTime<Utc>",
                      last_error, created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM messages
               WHERE webhook_config_id = $1
               ORDER BY created_at DESC
               LIMIT $2 OFFSET $3"#,
            webhook_config_id,
            limit,
            offset
        )
        .fetch_all(pool)
        .await
    }

    /// Delete terminal messages older than `cutoff`. Attempts cascade via FK.
    pub async fn delete_old(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query!(
            r#"DELETE FROM messages
               WHERE updated_at < $1
                 AND (status = 'delivered' OR status = 'cancelled'
                      OR (status = 'failed' AND next_retry IS NULL))"#,
            cutoff
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
