//! Periodic cleanup of terminal messages (spec §4.10, C10).
//!
//! Deletes `DELIVERED`, `CANCELLED`, and terminally `FAILED` messages whose
//! `updated_at` is older than the configured retention window. Attempts
//! cascade via the foreign key, so nothing else needs cleaning up.

use std::sync::Arc;

use chrono::Utc;
use db::models::message::Message;
use db::DbService;
use tracing::{error, info};

use crate::config::DeliveryConfig;

pub struct Janitor {
    db: DbService,
    config: DeliveryConfig,
}

impl Janitor {
    pub fn new(db: DbService, config: DeliveryConfig) -> Self {
        Self { db, config }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(interval_s = self.config.janitor_interval.as_secs(), "starting janitor");
        let mut interval = tokio::time::interval(self.config.janitor_interval);

        loop {
            interval.tick().await;
            match self.sweep().await {
                Ok(deleted) if deleted > 0 => info!(deleted, "janitor swept terminal messages"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "janitor sweep failed"),
            }
        }
    }

    pub async fn sweep(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.cleanup_retention).unwrap_or(chrono::Duration::days(30));
        Message::delete_old(&self.db.pool, cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::message::{CreateMessage, Message};
    use db::models::webhook_config::{CreateWebhookConfig, WebhookConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn sweep_deletes_old_delivered_messages() {
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
        Message::finish_delivered(&db.pool, message.id).await.unwrap();
        sqlx::query!(
            "UPDATE messages SET updated_at = datetime('now', '-60 days') WHERE id = ?",
            message.id
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let janitor = Janitor::new(
            db.clone(),
            DeliveryConfig { cleanup_retention: Duration::from_secs(30 * 86_400), ..DeliveryConfig::default() },
        );
        let deleted = janitor.sweep().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(Message::find_by_id(&db.pool, message.id).await.unwrap().is_none());
    }
}
