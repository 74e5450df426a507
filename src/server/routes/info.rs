//! Model introspection and model-server health endpoints

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;

use super::parse_backend;
use crate::backend::{BackendKind, ModelDescription};
use crate::error::{ApiError, ApiResult};
use crate::server::state::ModelServerState;

/// Create the introspection router
pub fn create_router() -> Router<ModelServerState> {
    Router::new()
        .route("/info/:backend/:name", get(model_info))
        .route("/health", get(health))
}

/// Describe a loaded model: layer count, parameter counts, shapes.
async fn model_info(
    State(state): State<ModelServerState>,
    Path((backend, name)): Path<(String, String)>,
) -> ApiResult<Json<ModelDescription>> {
    let backend = parse_backend(&backend)?;
    let handle = state
        .registry
        .get_or_load(backend, &name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Model {name} not found")))?;

    let description = handle.lock().await.describe();
    Ok(Json(description))
}

/// Liveness endpoint listing loaded model names per backend.
async fn health(State(state): State<ModelServerState>) -> impl IntoResponse {
    let candle_models = state.registry.loaded_names(BackendKind::Candle).await;
    let burn_models = state.registry.loaded_names(BackendKind::Burn).await;
    let avg_latency_ms = *state.metrics.avg_latency_ms.read().await;

    Json(serde_json::json!({
        "status": "healthy",
        "candle_models": candle_models,
        "burn_models": burn_models,
        "device": state.device,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "total_requests": state.metrics.total(),
        "avg_latency_ms": avg_latency_ms,
    }))
}
