mod deployment;
mod error;
mod middleware;
mod routes;

pub use deployment::DeploymentImpl;

use axum::Router;
use db::DbService;
use services::config::DeliveryConfig;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://webhook-relay.db".to_string());
    let db = DbService::connect(&database_url).await?;
    let deployment = DeploymentImpl::new(db, DeliveryConfig::default());

    let _background = deployment.spawn_background_tasks();

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .nest("/hooks", routes::ingest::router())
        .nest("/configs", routes::configs::router(&deployment))
        .nest("/messages", routes::messages::router())
        .layer(cors)
        .with_state(deployment);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "webhook relay listening");

    axum::serve(listener, app).await?;
    Ok(())
}
