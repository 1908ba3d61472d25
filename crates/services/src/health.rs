//! In-memory health accounting per `WebhookConfig` (spec §4.9, C9).
//!
//! Authoritative counters live here, behind a `DashMap` keyed by config id
//! so concurrent dispatchers never contend on a single lock; `flush` is the
//! only place that talks to `webhook_health_stats`, and it is lossy across
//! a crash by design — counters reset to whatever the table last saw.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use db::models::health_stats::{HealthStatus, WebhookHealthStats};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Weight given to the newest sample in the response-time EWMA.
const EWMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Default)]
struct HealthCounters {
    total_sent: i64,
    total_delivered: i64,
    total_failed: i64,
    avg_response_time_ms: f64,
    last_success_time: Option<chrono::DateTime<Utc>>,
    last_error_time: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
}

impl HealthCounters {
    fn record_duration(&mut self, duration: Duration) {
        let sample = duration.as_secs_f64() * 1000.0;
        self.avg_response_time_ms = if self.total_sent == 0 {
            sample
        } else {
            EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * self.avg_response_time_ms
        };
    }

    fn success_rate(&self) -> f64 {
        if self.total_sent == 0 {
            return 1.0;
        }
        self.total_delivered as f64 / self.total_sent as f64
    }
}

/// Process-local aggregator. One instance is shared across every
/// `Dispatcher` in the process.
#[derive(Default)]
pub struct HealthAggregator {
    counters: dashmap::DashMap<Uuid, Mutex<HealthCounters>>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, config_id: Uuid, duration: Duration) {
        let entry = self.counters.entry(config_id).or_default();
        let mut counters = entry.lock().expect("health counters poisoned");
        counters.record_duration(duration);
        counters.total_sent += 1;
        counters.total_delivered += 1;
        counters.last_success_time = Some(Utc::now());
    }

    pub fn record_failure(&self, config_id: Uuid, _duration: Duration, error: &str) {
        let entry = self.counters.entry(config_id).or_default();
        let mut counters = entry.lock().expect("health counters poisoned");
        counters.total_sent += 1;
        counters.total_failed += 1;
        counters.last_error_time = Some(Utc::now());
        counters.last_error = Some(error.to_string());
    }

    /// Current derived status for a config, `Unknown` if nothing has been
    /// recorded yet this process.
    pub fn health_status(&self, config_id: Uuid) -> HealthStatus {
        match self.counters.get(&config_id) {
            Some(entry) => {
                let counters = entry.lock().expect("health counters poisoned");
                HealthStatus::derive(counters.total_sent, counters.success_rate())
            }
            None => HealthStatus::Unknown,
        }
    }

    /// Persist every tracked config's counters to `webhook_health_stats`.
    /// Called periodically by the owning task; also safe to call on
    /// shutdown to avoid losing the last interval's accounting.
    pub async fn flush(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let snapshots: Vec<(Uuid, HealthCounters)> = self
            .counters
            .iter()
            .map(|entry| (*entry.key(), entry.value().lock().expect("health counters poisoned").clone()))
            .collect();

        for (config_id, counters) in snapshots {
            WebhookHealthStats::upsert(
                pool,
                config_id,
                counters.total_sent,
                counters.total_delivered,
                counters.total_failed,
                counters.avg_response_time_ms,
                counters.last_success_time,
                counters.last_error_time,
                counters.last_error.as_deref(),
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::DbService;

    #[test]
    fn unknown_below_five_samples() {
        let agg = HealthAggregator::new();
        let id = Uuid::new_v4();
        for _ in 0..4 {
            agg.record_success(id, Duration::from_millis(10));
        }
        assert_eq!(agg.health_status(id), HealthStatus::Unknown);
    }

    #[test]
    fn healthy_above_ninety_five_percent() {
        let agg = HealthAggregator::new();
        let id = Uuid::new_v4();
        for _ in 0..10 {
            agg.record_success(id, Duration::from_millis(10));
        }
        assert_eq!(agg.health_status(id), HealthStatus::Healthy);
    }

    #[test]
    fn unhealthy_below_seventy_five_percent() {
        let agg = HealthAggregator::new();
        let id = Uuid::new_v4();
        for _ in 0..2 {
            agg.record_success(id, Duration::from_millis(10));
        }
        for _ in 0..8 {
            agg.record_failure(id, Duration::from_millis(10), "boom");
        }
        assert_eq!(agg.health_status(id), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn flush_persists_counters() {
        let db = DbService::connect_in_memory().await.unwrap();
        let agg = HealthAggregator::new();
        let id = Uuid::new_v4();
        agg.record_success(id, Duration::from_millis(50));
        agg.flush(&db.pool).await.unwrap();

        let row = WebhookHealthStats::find_by_config(&db.pool, id).await.unwrap().unwrap();
        assert_eq!(row.total_sent, 1);
        assert_eq!(row.total_delivered, 1);
    }
}
