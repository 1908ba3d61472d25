//! Pure backoff-delay computation (spec §4.2, C2).
//!
//! No I/O, no clock reads — callers add `now` themselves. Kept pure so the
//! monotonicity property (spec §8.6) can be tested directly against the
//! formula instead of through a live scheduler.

use db::models::webhook_config::BackoffStrategy;

/// Parameters a `WebhookConfig` row carries for backoff computation.
#[derive(Debug, Clone, Copy)]
pub struct BackoffParams {
    pub strategy: BackoffStrategy,
    pub initial_interval_s: i64,
    pub backoff_factor: f64,
    pub max_interval_s: i64,
}

/// Compute the delay, in whole seconds, before the next attempt after
/// `retry_count` finished attempts (0 for the retry scheduled right after
/// the first attempt).
///
/// `linear`:      `min(initial * (1 + n), max)`
/// `exponential`: `min(initial * factor^n, max)`
/// `fixed`:       `initial`
///
/// Results are floored to an integer; an unknown strategy can't reach this
/// function because `BackoffStrategy` is a closed enum, but any future
/// variant should fall back to exponential with factor 2.0 per spec.
pub fn delay_secs(params: BackoffParams, retry_count: u32) -> i64 {
    let n = retry_count as f64;
    let raw = match params.strategy {
        BackoffStrategy::Linear => params.initial_interval_s as f64 * (1.0 + n),
        BackoffStrategy::Exponential => {
            params.initial_interval_s as f64 * params.backoff_factor.powf(n)
        }
        BackoffStrategy::Fixed => params.initial_interval_s as f64,
    };
    raw.min(params.max_interval_s as f64).floor() as i64
}

/// Multiplier applied on top of the base backoff for specific failure
/// reasons (spec §4.6): 2.0 for HTTP 429, 1.2 for a connection error,
/// otherwise 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDelayReason {
    TooManyRequests,
    ConnectionError,
    Other,
}

pub fn retry_delay_factor(reason: RetryDelayReason) -> f64 {
    match reason {
        RetryDelayReason::TooManyRequests => 2.0,
        RetryDelayReason::ConnectionError => 1.2,
        RetryDelayReason::Other => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(strategy: BackoffStrategy) -> BackoffParams {
        BackoffParams {
            strategy,
            initial_interval_s: 10,
            backoff_factor: 2.0,
            max_interval_s: 300,
        }
    }

    #[test]
    fn exponential_matches_formula() {
        let p = params(BackoffStrategy::Exponential);
        assert_eq!(delay_secs(p, 0), 10);
        assert_eq!(delay_secs(p, 1), 20);
        assert_eq!(delay_secs(p, 2), 40);
        assert_eq!(delay_secs(p, 3), 80);
        assert_eq!(delay_secs(p, 4), 160);
        // 10 * 2^5 = 320, capped at 300
        assert_eq!(delay_secs(p, 5), 300);
    }

    #[test]
    fn linear_matches_formula() {
        let p = params(BackoffStrategy::Linear);
        assert_eq!(delay_secs(p, 0), 10);
        assert_eq!(delay_secs(p, 1), 20);
        assert_eq!(delay_secs(p, 2), 30);
    }

    #[test]
    fn fixed_ignores_retry_count() {
        let p = params(BackoffStrategy::Fixed);
        assert_eq!(delay_secs(p, 0), 10);
        assert_eq!(delay_secs(p, 10), 10);
    }

    #[test]
    fn monotonic_for_exponential_and_linear() {
        for strategy in [BackoffStrategy::Exponential, BackoffStrategy::Linear] {
            let p = params(strategy);
            let mut prev = delay_secs(p, 0);
            for n in 1..10 {
                let d = delay_secs(p, n);
                assert!(d >= prev, "backoff must be non-decreasing");
                assert!(d <= p.max_interval_s);
                prev = d;
            }
        }
    }

    #[test]
    fn retry_delay_factors() {
        assert_eq!(retry_delay_factor(RetryDelayReason::TooManyRequests), 2.0);
        assert_eq!(retry_delay_factor(RetryDelayReason::ConnectionError), 1.2);
        assert_eq!(retry_delay_factor(RetryDelayReason::Other), 1.0);
    }

    #[test]
    fn scenario_429_bumps_delay_to_20s() {
        let p = params(BackoffStrategy::Exponential);
        let base = delay_secs(p, 0);
        let bumped = (base as f64 * retry_delay_factor(RetryDelayReason::TooManyRequests)) as i64;
        assert_eq!(bumped, 20);
    }
}
