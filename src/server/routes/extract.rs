//! Context-extraction endpoints

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::server::state::ContextState;

/// Create the context-service router
pub fn create_router() -> Router<ContextState> {
    Router::new()
        .route("/extract-context", post(extract_context))
        .route("/health", get(health))
}

#[derive(Debug, Deserialize)]
struct DialogueRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct DialogueResponse {
    contextual_signal: Vec<f32>,
    shape: Vec<usize>,
}

/// Tokenize the text and return a sampled latent vector.
async fn extract_context(
    State(state): State<ContextState>,
    Json(request): Json<DialogueRequest>,
) -> ApiResult<Json<DialogueResponse>> {
    let encoder = Arc::clone(&state.encoder);
    let latent = tokio::task::spawn_blocking(move || encoder.extract(&request.text))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("extraction task failed: {e}")))?
        .map_err(|e| ApiError::Internal(e.context("Error processing input")))?;

    Ok(Json(DialogueResponse {
        contextual_signal: latent.values,
        shape: latent.shape,
    }))
}

/// Liveness endpoint.
async fn health(State(state): State<ContextState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "model": state.model_name,
        "device": state.device,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
