//! Delivery pipeline services: ingest, dispatch, retry, health, and the
//! admin façade that sits over them.
//!
//! [`Pipeline`] wires every component together the way a deployment would:
//! one `Bus` (unless `direct_mode`), one `Dispatcher` subscribed to it, one
//! `RetryScheduler` and `Janitor` spawned as background tasks. Callers that
//! only need a single component (most tests) construct it directly instead.

pub mod admin;
pub mod backoff;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod ingest;
pub mod janitor;
pub mod retry_scheduler;
pub mod sender;
pub mod signer;

use std::sync::Arc;

use db::DbService;
use tracing::error;
use uuid::Uuid;

use admin::Admin;
use bus::{Bus as BusTrait, InMemoryBus, TOPIC_EVENTS};
use config::DeliveryConfig;
use dispatcher::Dispatcher;
use health::HealthAggregator;
use ingest::Ingest;
use janitor::Janitor;
use retry_scheduler::RetryScheduler;
use sender::Sender;

pub struct Pipeline {
    pub ingest: Arc<Ingest>,
    pub dispatcher: Arc<Dispatcher>,
    pub admin: Arc<Admin>,
    pub health: Arc<HealthAggregator>,
    pub retry_scheduler: Arc<RetryScheduler>,
    pub janitor: Arc<Janitor>,
    pub config: DeliveryConfig,
}

impl Pipeline {
    pub fn new(db: DbService, config: DeliveryConfig) -> Self {
        let health = Arc::new(HealthAggregator::new());
        let sender = Sender::new(&config);

        let in_memory_bus = if config.direct_mode { None } else { Some(Arc::new(InMemoryBus::new())) };
        let bus_dyn: Option<Arc<dyn BusTrait>> =
            in_memory_bus.clone().map(|b| b as Arc<dyn BusTrait>);

        let dispatcher = Arc::new(Dispatcher::new(db.clone(), sender, health.clone()));

        let direct_dispatch: Option<Arc<dyn Fn(Uuid) + Send + Sync>> = if config.direct_mode {
            let dispatcher = dispatcher.clone();
            Some(Arc::new(move |id: Uuid| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.dispatch(id).await {
                        error!(message_id = %id, error = %e, "direct dispatch failed");
                    }
                });
            }))
        } else {
            None
        };

        let ingest = Arc::new(Ingest::new(db.clone(), bus_dyn.clone(), config.clone(), direct_dispatch));
        let admin = Arc::new(Admin::new(db.clone(), bus_dyn.clone(), health.clone(), config.clone()));
        let retry_scheduler =
            Arc::new(RetryScheduler::new(db.clone(), dispatcher.clone(), bus_dyn.clone(), config.clone()));
        let janitor = Arc::new(Janitor::new(db.clone(), config.clone()));

        if let Some(in_memory_bus) = &in_memory_bus {
            let dispatcher = dispatcher.clone();
            in_memory_bus.subscribe(TOPIC_EVENTS, "dispatch-workers", config.bus_concurrency, move |value| {
                let dispatcher = dispatcher.clone();
                async move {
                    match value.parse::<Uuid>() {
                        Ok(id) => {
                            if let Err(e) = dispatcher.dispatch(id).await {
                                error!(message_id = %id, error = %e, "bus-triggered dispatch failed");
                            }
                        }
                        Err(e) => error!(value = %value, error = %e, "bus delivered a non-uuid message id"),
                    }
                }
            });
        }

        Self { ingest, dispatcher, admin, health, retry_scheduler, janitor, config }
    }

    /// Spawn the background tasks (`RetryScheduler`, `Janitor`). Callers
    /// own the returned handles and decide whether/how to await shutdown.
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![self.retry_scheduler.clone().spawn(), self.janitor.clone().spawn()]
    }
}
