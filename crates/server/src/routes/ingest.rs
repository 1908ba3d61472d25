//! Public ingress: `POST /hooks/{name}` accepts an arbitrary JSON payload
//! and hands it to `Ingest` (spec §4.5). This is the only unauthenticated
//! surface in the API — authorization for publishing happens at the
//! network layer, not here.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json as ResponseJson;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentImpl;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub id: Uuid,
    pub status: &'static str,
}

fn forwardable_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-forward-"))
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().trim_start_matches("x-forward-").to_string(), v.to_string()))
        })
        .collect()
}

pub async fn receive(
    State(deployment): State<DeploymentImpl>,
    Path(webhook_name): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<ResponseJson<IngestResponse>, ApiError> {
    let forwarded = forwardable_headers(&headers);
    let result = deployment
        .pipeline()
        .ingest
        .receive(&webhook_name, &payload, forwarded, None)
        .await?;

    Ok(ResponseJson(IngestResponse { id: result.id, status: result.status }))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/{webhook_name}", post(receive))
}
