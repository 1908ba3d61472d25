//! Background re-dispatch and zombie recovery (spec §4.8, C8).
//!
//! Runs on a fixed interval and does three independent sweeps each tick:
//! dispatch messages whose `next_retry` has elapsed, reclaim messages stuck
//! in `PROCESSING` past the zombie timeout, and re-publish `PENDING`
//! messages that never made it onto the bus (an ingest-time publish
//! failure). None of these sweeps depend on each other's results.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::models::message::Message;
use db::DbService;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{Bus, TOPIC_EVENTS};
use crate::config::DeliveryConfig;
use crate::dispatcher::Dispatcher;

pub struct RetryScheduler {
    db: DbService,
    dispatcher: Arc<Dispatcher>,
    bus: Option<Arc<dyn Bus>>,
    config: DeliveryConfig,
}

impl RetryScheduler {
    pub fn new(
        db: DbService,
        dispatcher: Arc<Dispatcher>,
        bus: Option<Arc<dyn Bus>>,
        config: DeliveryConfig,
    ) -> Self {
        Self { db, dispatcher, bus, config }
    }

    /// Spawn the scheduler loop as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(interval_s = self.config.retry_scheduler_interval.as_secs(), "starting retry scheduler");
        let mut interval = tokio::time::interval(self.config.retry_scheduler_interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "retry scheduler tick failed");
            }
        }
    }

    /// Run one sweep. Exposed separately from `run` so tests can drive it
    /// without waiting on a real interval.
    pub async fn tick(&self) -> Result<(), sqlx::Error> {
        let dispatched = self.dispatch_ready_retries().await?;
        let reclaimed = self.recover_zombies().await?;
        let republished = self.redispatch_pending().await?;

        if dispatched > 0 || reclaimed > 0 || republished > 0 {
            info!(dispatched, reclaimed, republished, "retry scheduler tick complete");
        } else {
            debug!("retry scheduler tick found nothing to do");
        }
        Ok(())
    }

    async fn dispatch_ready_retries(&self) -> Result<usize, sqlx::Error> {
        let messages =
            Message::find_ready_for_retry(&self.db.pool, self.config.retry_scheduler_batch_size).await?;
        let count = messages.len();
        for message in messages {
            self.dispatch_in_background(message.id);
        }
        Ok(count)
    }

    /// Reclaim messages stuck in `PROCESSING` past the zombie timeout: the
    /// worker that claimed them is presumed dead. Moved back to `FAILED`
    /// with an immediate `next_retry` and no retry-count bump, since no
    /// attempt outcome was actually observed.
    async fn recover_zombies(&self) -> Result<usize, sqlx::Error> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.config.zombie_timeout).unwrap_or(chrono::Duration::seconds(300));
        let stuck = Message::find_stuck(&self.db.pool, threshold).await?;
        let count = stuck.len();
        for message in &stuck {
            warn!(message_id = %message.id, "reclaiming zombie message stuck in processing");
            Message::mark_failed(&self.db.pool, message.id, "processing timeout exceeded", Some(Utc::now()), false)
                .await?;
        }
        Ok(count)
    }

    /// Re-publish `PENDING` messages onto the bus. These are messages whose
    /// ingest-time publish failed; in `direct_mode` or without a bus there
    /// is nothing to republish onto, so this is a no-op.
    async fn redispatch_pending(&self) -> Result<usize, sqlx::Error> {
        let Some(bus) = &self.bus else {
            return Ok(0);
        };
        if self.config.direct_mode {
            return Ok(0);
        }
        let pending = Message::find_pending(&self.db.pool, self.config.retry_scheduler_batch_size).await?;
        let count = pending.len();
        for message in pending {
            let id_str = message.id.to_string();
            if let Err(e) = bus.publish(TOPIC_EVENTS, &id_str, &id_str).await {
                warn!(message_id = %message.id, error = %e, "failed to republish pending message");
            }
        }
        Ok(count)
    }

    fn dispatch_in_background(&self, id: Uuid) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(id).await {
                error!(message_id = %id, error = %e, "scheduled dispatch failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthAggregator;
    use crate::sender::Sender;
    use db::models::message::CreateMessage;
    use db::models::webhook_config::{CreateWebhookConfig, WebhookConfig};

    async fn setup() -> (DbService, WebhookConfig, RetryScheduler) {
        let db = DbService::connect_in_memory().await.unwrap();
        let config = WebhookConfig::create(
            &db.pool,
            &CreateWebhookConfig {
                name: "orders".to_string(),
                target_url: "http://127.0.0.1:1/unreachable".to_string(),
                secret: "s3cretXX".to_string(),
                max_retries: Some(5),
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

        let delivery_config = DeliveryConfig::default();
        let sender = Sender::new(&delivery_config);
        let health = Arc::new(HealthAggregator::new());
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), sender, health));
        let scheduler = RetryScheduler::new(db.clone(), dispatcher, None, delivery_config);
        (db, config, scheduler)
    }

    #[tokio::test]
    async fn recover_zombies_reclaims_stuck_processing() {
        let (db, config, scheduler) = setup().await;
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

        // Simulate a stale claim by backdating updated_at directly.
        sqlx::query!(
            "UPDATE messages SET updated_at = datetime('now', '-1 hour') WHERE id = ?",
            message.id
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let reclaimed = scheduler.recover_zombies().await.unwrap();
        assert_eq!(reclaimed, 1);

        let updated = Message::find_by_id(&db.pool, message.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
        assert_eq!(updated.retry_count, 0);
        assert!(updated.next_retry.is_some());
    }

    #[tokio::test]
    async fn dispatch_ready_retries_picks_up_due_messages() {
        let (db, config, scheduler) = setup().await;
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
        Message::mark_failed(&db.pool, message.id, "earlier failure", Some(Utc::now()), true).await.unwrap();

        let count = scheduler.dispatch_ready_retries().await.unwrap();
        assert_eq!(count, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let updated = Message::find_by_id(&db.pool, message.id).await.unwrap().unwrap();
        assert_ne!(updated.status, "pending");
    }
}
