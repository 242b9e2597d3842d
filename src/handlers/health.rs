use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::utils::ApiResult;
use crate::AppState;

// Liveness probe
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Gateway is up")
    ),
    tag = "Health"
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// Round-trip health check for one source's adapter
#[utoipa::path(
    get,
    path = "/api/sources/{source_id}/health",
    params(
        ("source_id" = String, Path, description = "Source id")
    ),
    responses(
        (status = 200, description = "Health check outcome"),
        (status = 500, description = "Source config missing or adapter construction failed")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Health"
)]
pub async fn source_health(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let adapter = state.registry.get(&source_id).await?;
    let healthy = adapter.health_check().await;
    Ok(Json(json!({
        "source": source_id,
        "engine": adapter.engine(),
        "healthy": healthy,
    })))
}
