//! Outbound HTTP delivery (spec §4.7, C7).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use db::models::message::Message;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::backoff::RetryDelayReason;
use crate::config::DeliveryConfig;

/// Outcome of a single delivery attempt, already classified into the
/// buckets `Dispatcher` switches on — replaces exceptions-for-control-flow
/// with an explicit sum type (spec §9).
#[derive(Debug)]
pub enum Outcome {
    Success {
        status_code: u16,
        body: String,
        response_headers: HashMap<String, String>,
        duration: Duration,
    },
    Retryable {
        status_code: Option<u16>,
        body: Option<String>,
        response_headers: HashMap<String, String>,
        error: Option<String>,
        duration: Duration,
        reason: RetryDelayReason,
    },
    Permanent {
        status_code: Option<u16>,
        body: Option<String>,
        response_headers: HashMap<String, String>,
        error: Option<String>,
        duration: Duration,
    },
}

impl Outcome {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Outcome::Success { status_code, .. } => Some(*status_code),
            Outcome::Retryable { status_code, .. } => *status_code,
            Outcome::Permanent { status_code, .. } => *status_code,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Outcome::Success { duration, .. }
            | Outcome::Retryable { duration, .. }
            | Outcome::Permanent { duration, .. } => *duration,
        }
    }
}

pub struct Sender {
    client: Client,
    hmac_header_name: String,
    max_capture_bytes: usize,
}

impl Sender {
    pub fn new(delivery_config: &DeliveryConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(delivery_config.http_connect_timeout)
            .timeout(delivery_config.http_read_timeout)
            .pool_max_idle_per_host(delivery_config.http_pool_max_idle_per_host)
            .user_agent(concat!("webhook-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            hmac_header_name: delivery_config.hmac_header_name.clone(),
            max_capture_bytes: delivery_config.response_max_capture_bytes,
        }
    }

    /// Build and perform the signed outbound request for `message` at
    /// attempt `attempt_number`, and classify the response.
    pub async fn send(&self, message: &Message, attempt_number: i64) -> Outcome {
        let extra_headers: HashMap<String, String> =
            serde_json::from_str(&message.headers).unwrap_or_default();

        let mut request = self
            .client
            .post(&message.target_url)
            .header("Content-Type", "application/json")
            .header(self.hmac_header_name.as_str(), &message.signature)
            .header("X-Webhook-Id", message.id.to_string())
            .header("X-Webhook-Attempt", attempt_number.to_string());

        for (k, v) in &extra_headers {
            request = request.header(k, v);
        }

        let started = Instant::now();
        let result = request.body(message.payload.clone()).send().await;
        let duration = started.elapsed();

        match result {
            Ok(response) => self.classify_response(response, duration).await,
            Err(err) => {
                debug!(error = %err, message_id = %message.id, "transport error delivering webhook");
                Outcome::Retryable {
                    status_code: None,
                    body: None,
                    response_headers: HashMap::new(),
                    error: Some(err.to_string()),
                    duration,
                    reason: RetryDelayReason::ConnectionError,
                }
            }
        }
    }

    async fn classify_response(&self, response: reqwest::Response, duration: Duration) -> Outcome {
        let status = response.status();
        let response_headers = headers_to_map(response.headers());
        let status_code = status.as_u16();

        let body_text = read_truncated_body(response, self.max_capture_bytes).await;

        if status.is_success() {
            return Outcome::Success {
                status_code,
                body: body_text,
                response_headers,
                duration,
            };
        }

        if is_retryable_status(status) {
            let reason = if status == StatusCode::TOO_MANY_REQUESTS {
                RetryDelayReason::TooManyRequests
            } else {
                RetryDelayReason::Other
            };
            return Outcome::Retryable {
                status_code: Some(status_code),
                body: Some(body_text),
                response_headers,
                error: Some(format!("http {status_code}")),
                duration,
                reason,
            };
        }

        Outcome::Permanent {
            status_code: Some(status_code),
            body: Some(body_text),
            response_headers,
            error: Some(format!("http {status_code}")),
            duration,
        }
    }
}

/// `408`, `429`, `5xx` are retryable; `3xx` and other `4xx` are not
/// (service does not follow redirects).
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect()
}

/// Read up to `max_bytes` of the response body; excess is discarded with
/// an ellipsis marker, matching spec §4.7.
async fn read_truncated_body(response: reqwest::Response, max_bytes: usize) -> String {
    match response.text().await {
        Ok(text) => db::models::delivery_attempt::DeliveryAttempt::truncate_body(&text, max_bytes),
        Err(_) => String::new(),
    }
}

/// Merge a `WebhookConfig`'s headers with per-message overrides, producing
/// the JSON blob stored on `Message.headers`.
pub fn merge_headers(config_headers: &Value, request_headers: &HashMap<String, String>) -> String {
    let mut merged: HashMap<String, String> = config_headers
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    for (k, v) in request_headers {
        merged.insert(k.clone(), v.clone());
    }
    serde_json::to_string(&merged).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::FOUND));
    }

    #[test]
    fn merge_headers_overrides_config() {
        let config_headers = serde_json::json!({"X-Foo": "config", "X-Bar": "keep"});
        let mut overrides = HashMap::new();
        overrides.insert("X-Foo".to_string(), "override".to_string());

        let merged = merge_headers(&config_headers, &overrides);
        let parsed: HashMap<String, String> = serde_json::from_str(&merged).unwrap();
        assert_eq!(parsed.get("X-Foo"), Some(&"override".to_string()));
        assert_eq!(parsed.get("X-Bar"), Some(&"keep".to_string()));
    }
}
