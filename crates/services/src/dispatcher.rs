//! Deliver one claimed message and apply its outcome (spec §4.6, C6).
//!
//! `Dispatcher::dispatch` is the only place that moves a message out of
//! `PROCESSING`. Every branch appends a `DeliveryAttempt` and updates the
//! message row in the same transaction, so a reader never observes an
//! attempt without a matching status change or vice versa.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use db::models::delivery_attempt::{CreateDeliveryAttempt, DeliveryAttempt};
use db::models::message::Message;
use db::models::webhook_config::WebhookConfig;
use db::DbService;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backoff::{self, BackoffParams};
use crate::error::DispatchError;
use crate::health::HealthAggregator;
use crate::sender::{Outcome, Sender};

pub struct Dispatcher {
    db: DbService,
    sender: Sender,
    health: Arc<HealthAggregator>,
    /// Opaque identifier recorded on every `DeliveryAttempt` this process
    /// creates, so attempts can be correlated back to the worker that made
    /// them. One per process lifetime.
    processing_node: String,
}

impl Dispatcher {
    pub fn new(db: DbService, sender: Sender, health: Arc<HealthAggregator>) -> Self {
        Self { db, sender, health, processing_node: format!("{}-{}", hostname(), std::process::id()) }
    }

    /// Attempt delivery of message `id`. A `false`-returning claim (already
    /// claimed, delivered, or cancelled elsewhere) is not an error: it is
    /// the normal outcome of two workers racing on the same retry.
    pub async fn dispatch(&self, id: Uuid) -> Result<(), DispatchError> {
        let claimed = Message::claim_for_processing(&self.db.pool, id).await?;
        if !claimed {
            return Ok(());
        }

        let message = Message::find_by_id(&self.db.pool, id)
            .await?
            .ok_or_else(|| DispatchError::Internal(format!("message {id} vanished after claim")))?;
        let config = WebhookConfig::find_by_id(&self.db.pool, message.webhook_config_id)
            .await?
            .ok_or_else(|| {
                DispatchError::Internal(format!("config {} vanished mid-dispatch", message.webhook_config_id))
            })?;

        let now = Utc::now();
        let max_age = ChronoDuration::seconds(config.max_age_s);
        if now - message.created_at > max_age {
            warn!(message_id = %id, "message past max_age, failing without an attempt");
            Message::mark_failed(&self.db.pool, id, "message expired past max_age_s", None, false).await?;
            return Ok(());
        }

        let attempt_number = message.retry_count + 1;
        let outcome = self.sender.send(&message, attempt_number).await;
        self.apply_outcome(&message, &config, attempt_number, outcome).await
    }

    async fn apply_outcome(
        &self,
        message: &Message,
        config: &WebhookConfig,
        attempt_number: i64,
        outcome: Outcome,
    ) -> Result<(), DispatchError> {
        let duration = outcome.duration();
        let duration_ms = duration.as_millis() as i64;

        let mut tx = self.db.pool.begin().await?;

        match &outcome {
            Outcome::Success { status_code, body, response_headers, .. } => {
                DeliveryAttempt::create(
                    &mut *tx,
                    &CreateDeliveryAttempt {
                        message_id: message.id,
                        attempt_number,
                        status_code: Some(*status_code as i64),
                        response_body: Some(body.clone()),
                        error: None,
                        request_duration_ms: duration_ms,
                        target_url: message.target_url.clone(),
                        response_headers: headers_json(response_headers),
                        processing_node: self.processing_node.clone(),
                    },
                )
                .await?;
                Message::finish_delivered(&mut *tx, message.id).await?;
                tx.commit().await?;

                self.health.record_success(config.id, duration);
                info!(message_id = %message.id, attempt = attempt_number, "delivered");
            }

            Outcome::Retryable { status_code, body, response_headers, error, reason, .. } => {
                let error_message = error.clone().unwrap_or_else(|| "retryable delivery failure".to_string());
                DeliveryAttempt::create(
                    &mut *tx,
                    &CreateDeliveryAttempt {
                        message_id: message.id,
                        attempt_number,
                        status_code: status_code.map(|c| c as i64),
                        response_body: body.clone(),
                        error: Some(error_message.clone()),
                        request_duration_ms: duration_ms,
                        target_url: message.target_url.clone(),
                        response_headers: headers_json(response_headers),
                        processing_node: self.processing_node.clone(),
                    },
                )
                .await?;

                let params = BackoffParams {
                    strategy: config.backoff_strategy(),
                    initial_interval_s: config.initial_interval_s,
                    backoff_factor: config.backoff_factor,
                    max_interval_s: config.max_interval_s,
                };
                let base_delay = backoff::delay_secs(params, message.retry_count as u32);
                let factor = backoff::retry_delay_factor(*reason);
                let delay = (base_delay as f64 * factor).floor() as i64;
                let next_retry = Utc::now() + ChronoDuration::seconds(delay);

                let attempts_exhausted = attempt_number >= config.max_retries;
                let age_exhausted = next_retry - message.created_at > ChronoDuration::seconds(config.max_age_s);

                if attempts_exhausted || age_exhausted {
                    Message::mark_failed(&mut *tx, message.id, &error_message, None, true).await?;
                    tx.commit().await?;
                    warn!(message_id = %message.id, attempt = attempt_number, "retries exhausted, terminal failure");
                } else {
                    Message::mark_failed(&mut *tx, message.id, &error_message, Some(next_retry), true).await?;
                    tx.commit().await?;
                    info!(message_id = %message.id, attempt = attempt_number, delay_s = delay, "retryable failure, rescheduled");
                }

                self.health.record_failure(config.id, duration, &error_message);
            }

            Outcome::Permanent { status_code, body, response_headers, error, .. } => {
                let error_message = error.clone().unwrap_or_else(|| "permanent delivery failure".to_string());
                DeliveryAttempt::create(
                    &mut *tx,
                    &CreateDeliveryAttempt {
                        message_id: message.id,
                        attempt_number,
                        status_code: status_code.map(|c| c as i64),
                        response_body: body.clone(),
                        error: Some(error_message.clone()),
                        request_duration_ms: duration_ms,
                        target_url: message.target_url.clone(),
                        response_headers: headers_json(response_headers),
                        processing_node: self.processing_node.clone(),
                    },
                )
                .await?;
                Message::mark_failed(&mut *tx, message.id, &error_message, None, true).await?;
                tx.commit().await?;

                self.health.record_failure(config.id, duration, &error_message);
                warn!(message_id = %message.id, attempt = attempt_number, "non-retryable failure");
            }
        }

        Ok(())
    }
}

fn headers_json(headers: &std::collections::HashMap<String, String>) -> String {
    serde_json::to_string(headers).unwrap_or_else(|_| "{}".to_string())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use db::models::webhook_config::CreateWebhookConfig;

    async fn setup() -> (DbService, WebhookConfig, Dispatcher) {
        let db = DbService::connect_in_memory().await.unwrap();
        let config = WebhookConfig::create(
            &db.pool,
            &CreateWebhookConfig {
                name: "orders".to_string(),
                target_url: "http://127.0.0.1:1/unreachable".to_string(),
                secret: "s3cretXX".to_string(),
                max_retries: Some(2),
                backoff_strategy: None,
                initial_interval_s: Some(1),
                backoff_factor: None,
                max_interval_s: Some(60),
                max_age_s: Some(3600),
                headers: None,
            },
        )
        .await
        .unwrap();
        let sender = Sender::new(&DeliveryConfig::default());
        let health = Arc::new(HealthAggregator::new());
        let dispatcher = Dispatcher::new(db.clone(), sender, health);
        (db, config, dispatcher)
    }

    #[tokio::test]
    async fn dispatch_on_unclaimed_message_is_noop() {
        let (_db, _config, dispatcher) = setup().await;
        // A random id was never created, so claim_for_processing matches 0 rows.
        dispatcher.dispatch(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_records_attempt_on_connection_failure() {
        let (db, config, dispatcher) = setup().await;
        let message = Message::create(
            &db.pool,
            &db::models::message::CreateMessage {
                webhook_config_id: config.id,
                payload: b"{}".to_vec(),
                target_url: config.target_url.clone(),
                signature: "sha256=deadbeef".to_string(),
                headers: "{}".to_string(),
            },
        )
        .await
        .unwrap();

        dispatcher.dispatch(message.id).await.unwrap();

        let updated = Message::find_by_id(&db.pool, message.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
        assert_eq!(updated.retry_count, 1);
        assert!(updated.next_retry.is_some());

        let attempts = DeliveryAttempt::find_by_message_id(&db.pool, message.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_number, 1);
    }

    #[tokio::test]
    async fn dispatch_terminal_fails_past_max_age() {
        let (db, mut config, dispatcher) = setup().await;
        config.max_age_s = 0;
        let message = Message::create(
            &db.pool,
            &db::models::message::CreateMessage {
                webhook_config_id: config.id,
                payload: b"{}".to_vec(),
                target_url: config.target_url.clone(),
                signature: "sha256=deadbeef".to_string(),
                headers: "{}".to_string(),
            },
        )
        .await
        .unwrap();
        db::models::webhook_config::WebhookConfig::update(
            &db.pool,
            config.id,
            &db::models::webhook_config::UpdateWebhookConfig {
                target_url: None,
                secret: None,
                max_retries: None,
                backoff_strategy: None,
                initial_interval_s: None,
                backoff_factor: None,
                max_interval_s: None,
                max_age_s: Some(0),
                headers: None,
                active: None,
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        dispatcher.dispatch(message.id).await.unwrap();

        let updated = Message::find_by_id(&db.pool, message.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
        assert!(updated.next_retry.is_none());
        let attempts = DeliveryAttempt::find_by_message_id(&db.pool, message.id).await.unwrap();
        assert!(attempts.is_empty(), "expiry must not record a delivery attempt");
    }
}
