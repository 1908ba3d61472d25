//! Optional message-bus hop for dispatching message ids to workers
//! (spec §4.4, C4).
//!
//! Two topics matter to this pipeline: `webhook-events` (newly ingested
//! messages) and `webhook-retries` (messages whose backoff has elapsed).
//! The key is always the message id so a real broker can partition by it
//! and preserve per-message ordering; the value is the id as a UTF-8
//! string, per spec.
//!
//! This crate ships one in-process implementation, `InMemoryBus`, backed
//! by `tokio::sync::mpsc`. It exists so `direct_mode = false` deployments
//! and tests can exercise the at-least-once/ack-nack contract without a
//! real broker; a production deployment is expected to swap in an adapter
//! over Kafka/SQS/NATS behind the same `Bus` trait.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, warn};

use crate::error::BusError;

pub const TOPIC_EVENTS: &str = "webhook-events";
pub const TOPIC_RETRIES: &str = "webhook-retries";

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish `value` (typically a message id) to `topic`, partitioned by
    /// `key` (the same message id, so a real broker preserves per-message
    /// ordering within a partition).
    async fn publish(&self, topic: &str, key: &str, value: &str) -> Result<(), BusError>;
}

struct Topic {
    sender: mpsc::UnboundedSender<(String, String)>,
}

/// In-process, at-least-once topic bus. Each `subscribe` call spawns a
/// consumer loop bounded to `concurrency` in-flight handler invocations;
/// a handler that panics causes its message to be redelivered (pushed
/// back onto the same topic), mirroring a broker's nack-and-redeliver.
#[derive(Default)]
pub struct InMemoryBus {
    topics: DashMap<String, Topic>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_sender(&self, topic: &str) -> mpsc::UnboundedSender<(String, String)> {
        if let Some(t) = self.topics.get(topic) {
            return t.sender.clone();
        }
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                let (sender, _receiver_owned_elsewhere) = mpsc::unbounded_channel();
                Topic { sender }
            })
            .sender
            .clone()
    }

    /// Register a consumer for `topic`. `handler` is invoked with the
    /// published value (the message id); at most `concurrency` handler
    /// futures run at once, matching the bounded consumer-group
    /// concurrency spec §5 requires (default 3).
    ///
    /// Must be called exactly once per topic before any `publish` to that
    /// topic, since subscribing installs the channel receiver.
    pub fn subscribe<F, Fut>(&self, topic: &str, _group: &str, concurrency: usize, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(String, String)>();
        self.topics
            .insert(topic.to_string(), Topic { sender: sender.clone() });

        let handler = Arc::new(handler);
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let topic_owned = topic.to_string();
        let requeue_sender = sender;

        tokio::spawn(async move {
            while let Some((key, value)) = receiver.recv().await {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                let handler = handler.clone();
                let requeue_sender = requeue_sender.clone();
                let topic_owned = topic_owned.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let value_for_redelivery = value.clone();
                    let key_for_redelivery = key.clone();
                    let joined = tokio::spawn(async move {
                        handler(value).await;
                    })
                    .await;

                    match joined {
                        // Handler completed — success or caught failure both ack.
                        Ok(()) => {}
                        // Uncaught panic — nack by redelivering.
                        Err(join_err) => {
                            error!(
                                topic = %topic_owned,
                                error = %join_err,
                                "bus handler panicked, redelivering"
                            );
                            if requeue_sender
                                .send((key_for_redelivery, value_for_redelivery))
                                .is_err()
                            {
                                warn!(topic = %topic_owned, "failed to requeue after panic: topic closed");
                            }
                        }
                    }
                });
            }
        });
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, value: &str) -> Result<(), BusError> {
        let sender = self.topic_sender(topic);
        sender
            .send((key.to_string(), value.to_string()))
            .map_err(|e| BusError::PublishFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = Arc::new(InMemoryBus::new());
        let received = Arc::new(AtomicUsize::new(0));
        let received2 = received.clone();

        bus.subscribe(TOPIC_EVENTS, "workers", 3, move |_value| {
            let received2 = received2.clone();
            async move {
                received2.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.publish(TOPIC_EVENTS, "id-1", "id-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_redelivered() {
        let bus = Arc::new(InMemoryBus::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();

        bus.subscribe(TOPIC_EVENTS, "workers", 1, move |_value| {
            let attempts2 = attempts2.clone();
            async move {
                let n = attempts2.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("boom");
                }
            }
        });

        bus.publish(TOPIC_EVENTS, "id-1", "id-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }
}
