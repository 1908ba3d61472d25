//! Thin administrative façade over the pipeline (spec §6 admin operations).
//!
//! These are not part of the core delivery loop; they exist so an HTTP
//! layer (or an operator script) can inspect and nudge in-flight state
//! without reaching into `db` directly.

use std::sync::Arc;

use chrono::Utc;
use db::models::delivery_attempt::DeliveryAttempt;
use db::models::health_stats::{HealthStatus, WebhookHealthStats};
use db::models::message::{Message, MessageStatus};
use db::DbService;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::bus::{Bus, TOPIC_EVENTS};
use crate::config::DeliveryConfig;
use crate::error::IngestError;
use crate::health::HealthAggregator;

pub struct Admin {
    db: DbService,
    bus: Option<Arc<dyn Bus>>,
    health: Arc<HealthAggregator>,
    config: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub config_id: Uuid,
    pub status: HealthStatus,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub avg_response_time_ms: f64,
}

impl Admin {
    pub fn new(db: DbService, bus: Option<Arc<dyn Bus>>, health: Arc<HealthAggregator>, config: DeliveryConfig) -> Self {
        Self { db, bus, health, config }
    }

    pub async fn get_message(&self, id: Uuid) -> Result<Option<Message>, sqlx::Error> {
        Message::find_by_id(&self.db.pool, id).await
    }

    pub async fn list_attempts(&self, message_id: Uuid) -> Result<Vec<DeliveryAttempt>, sqlx::Error> {
        DeliveryAttempt::find_by_message_id(&self.db.pool, message_id).await
    }

    /// Cancel a message still awaiting delivery. Only `PENDING`/`FAILED`
    /// messages can be cancelled; anything already `DELIVERED` or
    /// `PROCESSING` is left untouched.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        Message::finish_cancelled(&self.db.pool, id).await
    }

    /// Force an immediate retry of a single terminal message, optionally
    /// redirecting it to a new target URL first. Only a message that is
    /// `FAILED` with no pending `next_retry` is eligible: anything
    /// `PROCESSING` is owned by an in-flight dispatch, and `DELIVERED`/
    /// `CANCELLED` are write-once terminal states.
    pub async fn retry(&self, id: Uuid, target_override: Option<String>) -> Result<(), IngestError> {
        let message = Message::find_by_id(&self.db.pool, id)
            .await?
            .ok_or_else(|| IngestError::NotFound(id.to_string()))?;

        if message.status() != MessageStatus::Failed || message.next_retry.is_some() {
            return Err(IngestError::InvalidState(format!(
                "message {id} is not a terminally failed message eligible for retry"
            )));
        }

        if let Some(target_url) = target_override {
            Message::set_target_url(&self.db.pool, id, &target_url).await?;
        }
        Message::mark_failed(&self.db.pool, id, "admin-requested retry", Some(Utc::now()), false).await?;
        self.notify(message.id).await;
        info!(message_id = %id, "admin retry requested");
        Ok(())
    }

    /// Retry every terminally-failed message created within the last
    /// `hours`, up to `limit` messages.
    pub async fn bulk_retry(
        &self,
        hours: i64,
        limit: i64,
        target_override: Option<String>,
    ) -> Result<usize, sqlx::Error> {
        let since = Utc::now() - chrono::Duration::hours(hours);
        let candidates = Message::find_terminal_failed_since(&self.db.pool, since, limit).await?;
        let count = candidates.len();

        for message in candidates {
            if let Some(target_url) = &target_override {
                Message::set_target_url(&self.db.pool, message.id, target_url).await?;
            }
            Message::mark_failed(&self.db.pool, message.id, "admin-requested bulk retry", Some(Utc::now()), false)
                .await?;
            self.notify(message.id).await;
        }

        info!(count, hours, "admin bulk retry requested");
        Ok(count)
    }

    /// Merge the live, in-process counters with the last persisted
    /// snapshot so a freshly restarted process still reports history.
    pub async fn health(&self, config_id: Uuid) -> Result<HealthSnapshot, sqlx::Error> {
        let live_status = self.health.health_status(config_id);
        match WebhookHealthStats::find_by_config(&self.db.pool, config_id).await? {
            Some(stats) => Ok(HealthSnapshot {
                config_id,
                status: if live_status == HealthStatus::Unknown { stats.health_status() } else { live_status },
                total_sent: stats.total_sent,
                total_delivered: stats.total_delivered,
                total_failed: stats.total_failed,
                avg_response_time_ms: stats.avg_response_time_ms,
            }),
            None => Ok(HealthSnapshot {
                config_id,
                status: live_status,
                total_sent: 0,
                total_delivered: 0,
                total_failed: 0,
                avg_response_time_ms: 0.0,
            }),
        }
    }

    /// Nudge the bus so a retried message is picked up promptly instead of
    /// waiting for the next scheduler tick; best-effort, never fails the
    /// admin call.
    async fn notify(&self, message_id: Uuid) {
        if self.config.direct_mode {
            return;
        }
        if let Some(bus) = &self.bus {
            let id_str = message_id.to_string();
            let _ = bus.publish(TOPIC_EVENTS, &id_str, &id_str).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::message::CreateMessage;
    use db::models::webhook_config::{CreateWebhookConfig, WebhookConfig};

    async fn setup() -> (DbService, WebhookConfig, Admin) {
        let db = DbService::connect_in_memory().await.unwrap();
        let config = WebhookConfig::create(
            &db.pool,
            &CreateWebhookConfig {
                name: "orders".to_string(),
                target_url: "https://example.com".to_string(),
                secret: "s3cretXX".to_string(),
                max_retries: None,
                backoff_strategy: None,
                initial_interval_s: None,
                backoff_factor: None,
                max_interval_s: None,
                max_age_s: None,
                headers: None,
            },
        )
        .await
        .unwrap();
        let admin = Admin::new(db.clone(), None, Arc::new(HealthAggregator::new()), DeliveryConfig::default());
        (db, config, admin)
    }

    #[tokio::test]
    async fn cancel_pending_message_succeeds() {
        let (db, config, admin) = setup().await;
        let message = Message::create(
            &db.pool,
            &CreateMessage {
                webhook_config_id: config.id,
                payload: b"{}".to_vec(),
                target_url: config.target_url.clone(),
                signature: "sha256=dead".to_string(),
                headers: "{}".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(admin.cancel(message.id).await.unwrap());
        let updated = admin.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "cancelled");
    }

    #[tokio::test]
    async fn retry_unknown_message_returns_not_found() {
        let (_db, _config, admin) = setup().await;
        let err = admin.retry(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn retry_pending_message_is_rejected() {
        let (db, config, admin) = setup().await;
        let message = Message::create(
            &db.pool,
            &CreateMessage {
                webhook_config_id: config.id,
                payload: b"{}".to_vec(),
                target_url: config.target_url.clone(),
                signature: "sha256=dead".to_string(),
                headers: "{}".to_string(),
            },
        )
        .await
        .unwrap();

        let err = admin.retry(message.id, None).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidState(_)));
    }

    #[tokio::test]
    async fn retry_processing_message_is_rejected() {
        let (db, config, admin) = setup().await;
        let message = Message::create(
            &db.pool,
            &CreateMessage {
                webhook_config_id: config.id,
                payload: b"{}".to_vec(),
                target_url: config.target_url.clone(),
                signature: "sha256=dead".to_string(),
                headers: "{}".to_string(),
            },
        )
        .await
        .unwrap();
        Message::claim_for_processing(&db.pool, message.id).await.unwrap();

        let err = admin.retry(message.id, None).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidState(_)));
    }

    #[tokio::test]
    async fn retry_terminally_failed_message_succeeds() {
        let (db, config, admin) = setup().await;
        let message = Message::create(
            &db.pool,
            &CreateMessage {
                webhook_config_id: config.id,
                payload: b"{}".to_vec(),
                target_url: config.target_url.clone(),
                signature: "sha256=dead".to_string(),
                headers: "{}".to_string(),
            },
        )
        .await
        .unwrap();
        Message::claim_for_processing(&db.pool, message.id).await.unwrap();
        Message::mark_failed(&db.pool, message.id, "boom", None, true).await.unwrap();

        admin.retry(message.id, None).await.unwrap();
        let updated = admin.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
        assert!(updated.next_retry.is_some());
    }

    #[tokio::test]
    async fn health_without_history_is_unknown() {
        let (_db, config, admin) = setup().await;
        let snapshot = admin.health(config.id).await.unwrap();
        assert_eq!(snapshot.status, HealthStatus::Unknown);
        assert_eq!(snapshot.total_sent, 0);
    }
}
