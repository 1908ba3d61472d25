//! CRUD for `WebhookConfig` — the outer "create a channel" surface spec
//! treats as an external collaborator. Thin by design: no retry logic,
//! no health aggregation, just validated persistence.

use axum::extract::State;
use axum::middleware::from_fn_with_state;
use axum::response::Json as ResponseJson;
use axum::routing::get;
use axum::{Extension, Json, Router};
use db::models::webhook_config::{CreateWebhookConfig, UpdateWebhookConfig, WebhookConfig};
use rand::Rng;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::error::ApiError;
use crate::middleware::load_config_middleware;
use crate::DeploymentImpl;

#[derive(Debug, Deserialize, Serialize, TS)]
pub struct CreateWebhookConfigRequest {
    pub name: String,
    pub target_url: String,
    pub secret: Option<String>,
    pub max_retries: Option<i64>,
    pub backoff_strategy: Option<db::models::webhook_config::BackoffStrategy>,
    pub initial_interval_s: Option<i64>,
    pub backoff_factor: Option<f64>,
    pub max_interval_s: Option<i64>,
    pub max_age_s: Option<i64>,
    pub headers: Option<serde_json::Value>,
}

fn validate_target_url(url: &str) -> Result<(), ApiError> {
    let parsed = url::Url::parse(url).map_err(|_| ApiError::BadRequest("invalid target_url".to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ApiError::BadRequest("target_url must use http or https".to_string()));
    }
    Ok(())
}

/// 32 bytes of hex, matching the signing secret's expected entropy.
fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

pub async fn create_config(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateWebhookConfigRequest>,
) -> Result<ResponseJson<ApiResponse<WebhookConfig>>, ApiError> {
    validate_target_url(&payload.target_url)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name cannot be empty".to_string()));
    }

    let secret = payload.secret.unwrap_or_else(generate_secret);
    let config = WebhookConfig::create(
        &deployment.db().pool,
        &CreateWebhookConfig {
            name: payload.name.trim().to_string(),
            target_url: payload.target_url,
            secret,
            max_retries: payload.max_retries,
            backoff_strategy: payload.backoff_strategy,
            initial_interval_s: payload.initial_interval_s,
            backoff_factor: payload.backoff_factor,
            max_interval_s: payload.max_interval_s,
            max_age_s: payload.max_age_s,
            headers: payload.headers,
        },
    )
    .await?;

    tracing::info!(config_id = %config.id, name = %config.name, "created webhook config");
    Ok(ResponseJson(ApiResponse::success(config)))
}

pub async fn list_configs(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<WebhookConfig>>>, ApiError> {
    let configs = WebhookConfig::list(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(configs)))
}

pub async fn get_config(
    Extension(config): Extension<WebhookConfig>,
) -> Result<ResponseJson<ApiResponse<WebhookConfig>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(config)))
}

pub async fn update_config(
    Extension(existing): Extension<WebhookConfig>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<UpdateWebhookConfig>,
) -> Result<ResponseJson<ApiResponse<WebhookConfig>>, ApiError> {
    if let Some(url) = &payload.target_url {
        validate_target_url(url)?;
    }
    let updated = WebhookConfig::update(&deployment.db().pool, existing.id, &payload)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("webhook config {} not found", existing.id)))?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn delete_config(
    Extension(config): Extension<WebhookConfig>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    WebhookConfig::delete(&deployment.db().pool, config.id).await?;
    tracing::info!(config_id = %config.id, "deleted webhook config");
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn get_health(
    Extension(config): Extension<WebhookConfig>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<services::admin::HealthSnapshot>>, ApiError> {
    let snapshot = deployment.pipeline().admin.health(config.id).await?;
    Ok(ResponseJson(ApiResponse::success(snapshot)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let config_id_router = Router::new()
        .route("/", get(get_config).put(update_config).delete(delete_config))
        .route("/health", get(get_health))
        .layer(from_fn_with_state(deployment.clone(), load_config_middleware));

    Router::new().route("/", get(list_configs).post(create_config)).nest("/{config_id}", config_id_router)
}
