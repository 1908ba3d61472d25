//! Admin surface over in-flight and terminal messages (spec §6 admin
//! operations). Thin pass-throughs to `services::admin::Admin`.

use axum::extract::{Path, Query, State};
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::{Json, Router};
use db::models::delivery_attempt::DeliveryAttempt;
use db::models::message::Message;
use serde::{Deserialize, Serialize};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub target_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRetryRequest {
    #[serde(default = "default_bulk_retry_hours")]
    pub hours: i64,
    #[serde(default = "default_bulk_retry_limit")]
    pub limit: i64,
    pub target_url: Option<String>,
}

fn default_bulk_retry_hours() -> i64 {
    24
}

fn default_bulk_retry_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct BulkRetryResponse {
    pub retried: usize,
}

pub async fn get_message(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Message>>, ApiError> {
    let message = deployment
        .pipeline()
        .admin
        .get_message(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("message {id} not found")))?;
    Ok(ResponseJson(ApiResponse::success(message)))
}

pub async fn list_attempts(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<DeliveryAttempt>>>, ApiError> {
    let attempts = deployment.pipeline().admin.list_attempts(id).await?;
    Ok(ResponseJson(ApiResponse::success(attempts)))
}

pub async fn cancel_message(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<bool>>, ApiError> {
    let cancelled = deployment.pipeline().admin.cancel(id).await?;
    Ok(ResponseJson(ApiResponse::success(cancelled)))
}

pub async fn retry_message(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
    Query(query): Query<RetryRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    deployment.pipeline().admin.retry(id, query.target_url).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn bulk_retry(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<BulkRetryRequest>,
) -> Result<ResponseJson<ApiResponse<BulkRetryResponse>>, ApiError> {
    let retried =
        deployment.pipeline().admin.bulk_retry(payload.hours, payload.limit, payload.target_url).await?;
    Ok(ResponseJson(ApiResponse::success(BulkRetryResponse { retried })))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new()
        .route("/{id}", get(get_message))
        .route("/{id}/attempts", get(list_attempts))
        .route("/{id}/cancel", post(cancel_message))
        .route("/{id}/retry", post(retry_message))
        .route("/bulk_retry", post(bulk_retry))
}
