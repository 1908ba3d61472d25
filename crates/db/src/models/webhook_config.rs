use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Backoff strategies a `WebhookConfig` may select between.
///
/// An unrecognized value read back from storage is treated by the
/// `services` crate as `Exponential` with factor 2.0, per spec.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "backoff_strategy", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    Exponential,
    Fixed,
}

/// Immutable-per-message snapshot of where and how to deliver webhooks for
/// a named channel.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct WebhookConfig {
    pub id: Uuid,
    pub name: String,
    pub target_url: String,
    pub secret: String,
    pub max_retries: i64,
    pub backoff_strategy: String,
    pub initial_interval_s: i64,
    pub backoff_factor: f64,
    pub max_interval_s: i64,
    pub max_age_s: i64,
    /// JSON object of extra headers merged onto every outbound request.
    pub headers: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize, TS)]
pub struct CreateWebhookConfig {
    pub name: String,
    pub target_url: String,
    pub secret: String,
    pub max_retries: Option<i64>,
    pub backoff_strategy: Option<BackoffStrategy>,
    pub initial_interval_s: Option<i64>,
    pub backoff_factor: Option<f64>,
    pub max_interval_s: Option<i64>,
    pub max_age_s: Option<i64>,
    pub headers: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, TS)]
pub struct UpdateWebhookConfig {
    pub target_url: Option<String>,
    pub secret: Option<String>,
    pub max_retries: Option<i64>,
    pub backoff_strategy: Option<BackoffStrategy>,
    pub initial_interval_s: Option<i64>,
    pub backoff_factor: Option<f64>,
    pub max_interval_s: Option<i64>,
    pub max_age_s: Option<i64>,
    pub headers: Option<serde_json::Value>,
    pub active: Option<bool>,
}

impl WebhookConfig {
    pub fn backoff_strategy(&self) -> BackoffStrategy {
        self.backoff_strategy.parse().unwrap_or(BackoffStrategy::Exponential)
    }

    /// Parse the stored headers JSON object into a map, ignoring malformed
    /// storage rather than failing delivery on a cosmetic header.
    pub fn get_headers(&self) -> std::collections::HashMap<String, String> {
        self.headers
            .as_deref()
            .and_then(|h| serde_json::from_str(h).ok())
            .unwrap_or_default()
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            WebhookConfig,
            r#"SELECT id as "id!: Uuid", name, target_url, secret, max_retries, backoff_strategy,
                      initial_interval_s, backoff_factor, max_interval_s, max_age_s, headers,
                      active as "active!: bool", created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM webhook_configs
               WHERE id = $1"#,
            id
        )
        .fetch_optional(pool)
        .await
    }

    /// Load an active config by its unique name. Returns `None` if the
    /// config is absent *or* inactive — `Ingest` treats both the same way.
    pub async fn find_active_by_name(
        pool: &SqlitePool,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            WebhookConfig,
            r#"SELECT id as "id!: Uuid", name, target_url, secret, max_retries, backoff_strategy,
                      initial_interval_s, backoff_factor, max_interval_s, max_age_s, headers,
                      active as "active!: bool", created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM webhook_configs
               WHERE name = $1 AND active = 1"#,
            name
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            WebhookConfig,
            r#"SELECT id as "id!: Uuid", name, target_url, secret, max_retries, backoff_strategy,
                      initial_interval_s, backoff_factor, max_interval_s, max_age_s, headers,
                      active as "active!: bool", created_at as "created_at!: DateTime<Utc>",
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM webhook_configs
               ORDER BY created_at DESC"#
        )
        .fetch_all(pool)
        .await
    }

    pub async fn create(pool: &SqlitePool, data: &CreateWebhookConfig) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        let strategy = data.backoff_strategy.unwrap_or(BackoffStrategy::Exponential).to_string();
        let headers_json = data.headers.as_ref().map(|h| h.to_string());
        let max_retries = data.max_retries.unwrap_or(5);
        let initial_interval_s = data.initial_interval_s.unwrap_or(10);
        let backoff_factor = data.backoff_factor.unwrap_or(2.0);
        let max_interval_s = data.max_interval_s.unwrap_or(300);
        let max_age_s = data.max_age_s.unwrap_or(86400);

        sqlx::query_as!(
            WebhookConfig,
            r#"INSERT INTO webhook_configs
                (id, name, target_url, secret, max_retries, backoff_strategy,
                 initial_interval_s, backoff_factor, max_interval_s, max_age_s, headers)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING id as "id!: Uuid", name, target_url, secret, max_retries, backoff_strategy,
                         initial_interval_s, backoff_factor, max_interval_s, max_age_s, headers,
                         active as "active!: bool", created_at as "created_at!: DateTime<Utc>",
                         updated_at as "updated_at!: DateTime<Utc>""#,
            id,
            data.name,
            data.target_url,
            data.secret,
            max_retries,
            strategy,
            initial_interval_s,
            backoff_factor,
            max_interval_s,
            max_age_s,
            headers_json,
        )
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateWebhookConfig,
    ) -> Result<Option<Self>, sqlx::Error> {
        let Some(existing) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };

        let target_url = data.target_url.clone().unwrap_or(existing.target_url);
        let secret = data.secret.clone().unwrap_or(existing.secret);
        let max_retries = data.max_retries.unwrap_or(existing.max_retries);
        let backoff_strategy = data
            .backoff_strategy
            .map(|s| s.to_string())
            .unwrap_or(existing.backoff_strategy);
        let initial_interval_s = data.initial_interval_s.unwrap_or(existing.initial_interval_s);
        let backoff_factor = data.backoff_factor.unwrap_or(existing.backoff_factor);
        let max_interval_s = data.max_interval_s.unwrap_or(existing.max_interval_s);
        let max_age_s = data.max_age_s.unwrap_or(existing.max_age_s);
        let headers = match &data.headers {
            Some(h) => Some(h.to_string()),
            None => existing.headers,
        };
        let active = data.active.unwrap_or(existing.active);

        sqlx::query_as!(
            WebhookConfig,
            r#"UPDATE webhook_configs
               SET target_url = $2, secret = $3, max_retries = $4, backoff_strategy = $5,
                   initial_interval_s = $6, backoff_factor = $7, max_interval_s = $8,
                   max_age_s = $9, headers = $10, active = $11, updated_at = datetime('now', 'subsec')
               WHERE id = $1
               RETURNING id as "id!: Uuid", name, target_url, secret, max_retries, backoff_strategy,
                         initial_interval_s, backoff_factor, max_interval_s, max_age_s, headers,
                         active as "active!: bool", created_at as "created_at!: DateTime<Utc>",
                         updated_at as "updated_at!: DateTime<Utc>""#,
            id,
            target_url,
            secret,
            max_retries,
            backoff_strategy,
            initial_interval_s,
            backoff_factor,
            max_interval_s,
            max_age_s,
            headers,
            active,
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query!("DELETE FROM webhook_configs WHERE id = $1", id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
