//! Path-param loader middleware, mirroring the load-then-`Extension`
//! pattern used throughout this API: handlers that operate on a specific
//! resource receive it already loaded rather than re-querying by id.

use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use db::models::webhook_config::WebhookConfig;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentImpl;

pub async fn load_config_middleware(
    State(deployment): State<DeploymentImpl>,
    Path(config_id): Path<Uuid>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let config = WebhookConfig::find_by_id(&deployment.db().pool, config_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("webhook config {config_id} not found")))?;

    request.extensions_mut().insert(config);
    Ok(next.run(request).await)
}
