use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Derived health classification for a `WebhookConfig`. See spec §4.9.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// `total_sent < 5` is `Unknown`; otherwise thresholds on success rate.
    pub fn derive(total_sent: i64, success_rate: f64) -> Self {
        if total_sent < 5 {
            return Self::Unknown;
        }
        if success_rate >= 0.95 {
            Self::Healthy
        } else if success_rate >= 0.75 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

/// 1:1 per-config counters and rolling averages. Authoritative accounting
/// lives in `services::health::HealthAggregator`; this row is a flush
/// target, not itself the source of truth mid-process.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct WebhookHealthStats {
    pub config_id: Uuid,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub avg_response_time_ms: f64,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookHealthStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_sent == 0 {
            return 1.0;
        }
        self.total_delivered as f64 / self.total_sent as f64
    }

    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::derive(self.total_sent, self.success_rate())
    }

    pub async fn find_by_config(
        pool: &SqlitePool,
        config_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            WebhookHealthStats,
            r#"SELECT config_id as "config_id!: Uuid", total_sent as "total_sent!: i64",
                      total_delivered as "total_delivered!: i64", total_failed as "total_failed!: i64",
                      avg_response_time_ms as "avg_response_time_ms!: f64",
                      last_success_time as "last_success_time: DateTime<Utc>",
                      last_error_time as "last_error_time: DateTime<Utc>", last_error,
                      updated_at as "updated_at!: DateTime<Utc>"
               FROM webhook_health_stats WHERE config_id = $1"#,
            config_id
        )
        .fetch_optional(pool)
        .await
    }

    /// Upsert a full snapshot, as flushed periodically by the
    /// `HealthAggregator`. Lossy accounting across a crash is tolerated
    /// per spec §4.9.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        pool: &SqlitePool,
        config_id: Uuid,
        total_sent: i64,
        total_delivered: i64,
        total_failed: i64,
        avg_response_time_ms: f64,
        last_success_time: Option<DateTime<Utc>>,
        last_error_time: Option<DateTime<Utc>>,
        last_error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query!(
            r#"INSERT INTO webhook_health_stats
                (config_id, total_sent, total_delivered, total_failed, avg_response_time_ms,
                 last_success_time, last_error_time, last_error, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, datetime('now', 'subsec'))
               ON CONFLICT(config_id) DO UPDATE SET
                 total_sent = excluded.total_sent,
                 total_delivered = excluded.total_delivered,
                 total_failed = excluded.total_failed,
                 avg_response_time_ms = excluded.avg_response_time_ms,
                 last_success_time = excluded.last_success_time,
                 last_error_time = excluded.last_error_time,
                 last_error = excluded.last_error,
                 updated_at = datetime('now', 'subsec')"#,
            config_id,
            total_sent,
            total_delivered,
            total_failed,
            avg_response_time_ms,
            last_success_time,
            last_error_time,
            last_error,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}
