//! Validate and admit a payload for delivery (spec §4.5, C5).
//!
//! Ingest is intentionally cheap: it never talks to the destination. It
//! validates, canonicalizes, signs, persists, and (unless `direct_mode`)
//! hands the message id to the `Bus`.

use std::collections::HashMap;
use std::sync::Arc;

use db::models::message::{CreateMessage, Message};
use db::models::webhook_config::WebhookConfig;
use db::DbService;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{Bus, TOPIC_EVENTS};
use crate::config::DeliveryConfig;
use crate::error::IngestError;
use crate::sender::merge_headers;
use crate::signer;

/// Payloads larger than this are rejected outright (spec §4.5 step 2).
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct MessageRef {
    pub id: Uuid,
    pub status: &'static str,
}

pub struct Ingest {
    db: DbService,
    bus: Option<Arc<dyn Bus>>,
    config: DeliveryConfig,
    /// Called in `direct_mode` instead of publishing to the bus.
    direct_dispatch: Option<Arc<dyn Fn(Uuid) + Send + Sync>>,
}

impl Ingest {
    pub fn new(
        db: DbService,
        bus: Option<Arc<dyn Bus>>,
        config: DeliveryConfig,
        direct_dispatch: Option<Arc<dyn Fn(Uuid) + Send + Sync>>,
    ) -> Self {
        Self { db, bus, config, direct_dispatch }
    }

    /// Admit `payload_obj` addressed to `webhook_name`, returning the new
    /// message's id. `target_url_override` and `request_headers` come from
    /// the caller (the HTTP layer or an admin-initiated send).
    pub async fn receive(
        &self,
        webhook_name: &str,
        payload_obj: &Value,
        request_headers: HashMap<String, String>,
        target_url_override: Option<String>,
    ) -> Result<MessageRef, IngestError> {
        let config = WebhookConfig::find_active_by_name(&self.db.pool, webhook_name)
            .await?
            .ok_or_else(|| IngestError::NotFound(webhook_name.to_string()))?;

        let bytes = canonicalize(payload_obj)?;
        validate_payload(&bytes)?;

        let signature = signer::sign(&config.secret, &bytes);
        let target_url = target_url_override.unwrap_or_else(|| config.target_url.clone());
        let config_headers = config
            .headers
            .as_deref()
            .and_then(|h| serde_json::from_str::<Value>(h).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));
        let headers = merge_headers(&config_headers, &request_headers);

        let message = Message::create(
            &self.db.pool,
            &CreateMessage {
                webhook_config_id: config.id,
                payload: bytes,
                target_url,
                signature,
                headers,
            },
        )
        .await?;

        info!(
            message_id = %message.id,
            webhook = %webhook_name,
            "ingested message"
        );

        if self.config.direct_mode {
            if let Some(dispatch) = &self.direct_dispatch {
                dispatch(message.id);
            }
        } else if let Some(bus) = &self.bus {
            let id_str = message.id.to_string();
            if let Err(e) = bus.publish(TOPIC_EVENTS, &id_str, &id_str).await {
                // Leave the row PENDING; RetryScheduler's find_pending sweep
                // will re-enqueue it. Never fail the caller for this.
                warn!(message_id = %message.id, error = %e, "bus publish failed, leaving PENDING for scheduler");
            }
        }

        Ok(MessageRef { id: message.id, status: "pending" })
    }
}

/// Stable JSON: `serde_json::Value`'s default map type is a `BTreeMap`,
/// so re-serializing sorts object keys for us; we additionally require
/// valid UTF-8, which `to_vec` guarantees.
fn canonicalize(payload_obj: &Value) -> Result<Vec<u8>, IngestError> {
    Ok(serde_json::to_vec(payload_obj)?)
}

fn validate_payload(bytes: &[u8]) -> Result<(), IngestError> {
    if bytes.is_empty() || bytes == b"null" {
        return Err(IngestError::PayloadRejected("payload is empty".to_string()));
    }
    if bytes.len() > MAX_PAYLOAD_BYTES {
        return Err(IngestError::PayloadRejected(format!(
            "payload size {} exceeds {} byte limit",
            bytes.len(),
            MAX_PAYLOAD_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::webhook_config::CreateWebhookConfig;

    async fn setup() -> (DbService, WebhookConfig) {
        let db = DbService::connect_in_memory().await.unwrap();
        let config = WebhookConfig::create(
            &db.pool,
            &CreateWebhookConfig {
                name: "orders".to_string(),
                target_url: "https://example.com/hook".to_string(),
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
        (db, config)
    }

    #[tokio::test]
    async fn receive_persists_pending_message_with_signature() {
        let (db, _config) = setup().await;
        let ingest = Ingest::new(db.clone(), None, DeliveryConfig::default(), None);

        let payload = serde_json::json!({"k": 1});
        let result = ingest
            .receive("orders", &payload, HashMap::new(), None)
            .await
            .unwrap();

        let message = Message::find_by_id(&db.pool, result.id).await.unwrap().unwrap();
        assert_eq!(message.status, "pending");
        assert_eq!(message.retry_count, 0);
        assert!(message.signature.starts_with("sha256="));
    }

    #[tokio::test]
    async fn receive_rejects_unknown_webhook() {
        let db = DbService::connect_in_memory().await.unwrap();
        let ingest = Ingest::new(db, None, DeliveryConfig::default(), None);
        let err = ingest
            .receive("missing", &serde_json::json!({"k": 1}), HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn receive_rejects_empty_payload() {
        let (db, _config) = setup().await;
        let ingest = Ingest::new(db, None, DeliveryConfig::default(), None);
        let err = ingest
            .receive("orders", &Value::Null, HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::PayloadRejected(_)));
    }

    #[tokio::test]
    async fn receive_rejects_oversized_payload() {
        let (db, _config) = setup().await;
        let ingest = Ingest::new(db, None, DeliveryConfig::default(), None);
        let huge = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        let err = ingest
            .receive("orders", &serde_json::json!({"data": huge}), HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::PayloadRejected(_)));
    }
}
