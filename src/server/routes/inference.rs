//! Predict and train endpoints, dispatching on the backend URL segment.

use axum::extract::{Json, Path, State};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use super::parse_backend;
use crate::backend::{Hyperparams, ModelHandle, TrainingSample};
use crate::error::{ApiError, ApiResult};
use crate::server::state::ModelServerState;

/// Create the inference/training router
pub fn create_router() -> Router<ModelServerState> {
    Router::new()
        .route("/:backend/predict", post(predict))
        .route("/:backend/train", post(train))
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    model: Option<String>,
    input: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    result: Vec<Vec<f32>>,
    confidence: f32,
    processing_time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainRequest {
    model: Option<String>,
    training_data: Option<Vec<TrainingSample>>,
    validation_data: Option<Vec<TrainingSample>>,
    hyperparams: Option<Hyperparams>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrainResponse {
    success: bool,
    accuracy: f32,
    loss: f32,
    epochs: usize,
    training_time: f64,
}

async fn predict(
    State(state): State<ModelServerState>,
    Path(backend): Path<String>,
    Json(request): Json<PredictRequest>,
) -> ApiResult<Json<PredictResponse>> {
    let started = Instant::now();
    let backend = parse_backend(&backend)?;

    let model_name = request
        .model
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing model name or input data".to_string()))?;
    let input = request
        .input
        .ok_or_else(|| ApiError::BadRequest("Missing model name or input data".to_string()))?;
    let input = parse_input_matrix(&input)?;

    let handle = state
        .registry
        .get_or_load(backend, &model_name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Model {model_name} not found")))?;

    let outcome = run_blocking(handle, move |model| model.predict(&input)).await?;

    let processing_time = started.elapsed().as_secs_f64();
    state.metrics.record_request(processing_time * 1000.0).await;

    Ok(Json(PredictResponse {
        result: outcome.result,
        confidence: outcome.confidence,
        processing_time,
    }))
}

async fn train(
    State(state): State<ModelServerState>,
    Path(backend): Path<String>,
    Json(request): Json<TrainRequest>,
) -> ApiResult<Json<TrainResponse>> {
    let started = Instant::now();
    let backend = parse_backend(&backend)?;

    let model_name = request
        .model
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing model name or training data".to_string()))?;
    let training_data = request
        .training_data
        .filter(|samples| !samples.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing model name or training data".to_string()))?;
    let validation_data = request.validation_data;
    let hyperparams = request.hyperparams.unwrap_or_default();

    let handle = state
        .registry
        .get_or_load(backend, &model_name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Model {model_name} not found")))?;

    let outcome = run_blocking(handle, move |model| {
        model.train(&training_data, validation_data.as_deref(), &hyperparams)
    })
    .await?;

    state
        .metrics
        .record_request(started.elapsed().as_secs_f64() * 1000.0)
        .await;

    Ok(Json(TrainResponse {
        success: true,
        accuracy: outcome.accuracy,
        loss: outcome.loss,
        epochs: outcome.epochs,
        training_time: outcome.training_time,
    }))
}

/// Run model work on the blocking pool; the handle lock is taken inside the
/// blocking task so the async workers are never parked on it.
async fn run_blocking<T, F>(handle: Arc<Mutex<ModelHandle>>, work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut ModelHandle) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut model = handle.blocking_lock();
        work(&mut model)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("model task failed: {e}")))?
    .map_err(ApiError::from)
}

/// Accepts a numeric vector (one sample) or matrix (a batch).
fn parse_input_matrix(value: &serde_json::Value) -> Result<Vec<Vec<f32>>, ApiError> {
    let invalid = || ApiError::BadRequest("input must be a numeric vector or matrix".to_string());

    let rows = value.as_array().ok_or_else(invalid)?;
    if rows.is_empty() {
        return Err(invalid());
    }

    if rows.iter().all(|v| v.is_array()) {
        rows.iter()
            .map(|row| parse_row(row.as_array().unwrap_or(&Vec::new())))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)
    } else {
        parse_row(rows).map(|row| vec![row]).ok_or_else(invalid)
    }
}

fn parse_row(values: &[serde_json::Value]) -> Option<Vec<f32>> {
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}
