//! Application state shared across every route handler.

use std::sync::Arc;

use db::DbService;
use services::config::DeliveryConfig;
use services::Pipeline;

#[derive(Clone)]
pub struct DeploymentImpl {
    db: DbService,
    pipeline: Arc<Pipeline>,
}

impl DeploymentImpl {
    pub fn new(db: DbService, config: DeliveryConfig) -> Self {
        let pipeline = Arc::new(Pipeline::new(db.clone(), config));
        Self { db, pipeline }
    }

    pub fn db(&self) -> &DbService {
        &self.db
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Spawn the background retry scheduler and janitor tasks. Returns the
    /// handles so `main` can hold them for the process lifetime.
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.pipeline.spawn_background_tasks()
    }
}
