//! End-to-end tests for the model server: dispatch, error codes, and the
//! predict/train/info/health surface over real on-disk models.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use latentserve_core::backend::burn_model::MlpConfig;
use latentserve_core::backend::candle_model::CandleArch;
use latentserve_core::backend::{BurnClassifier, CandleClassifier};
use latentserve_core::config::{CorsConfig, ModelsConfig};
use latentserve_core::server::create_model_app;
use latentserve_core::server::state::ModelServerState;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_config(dir: &TempDir) -> ModelsConfig {
    ModelsConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        model_dir: dir.path().to_path_buf(),
        request_timeout_secs: 30,
        preload: false,
        cors: CorsConfig::default(),
    }
}

fn test_state(dir: &TempDir) -> ModelServerState {
    ModelServerState::new(test_config(dir))
}

fn seed_candle_model(dir: &TempDir) {
    CandleClassifier::create(
        &dir.path().join("candle"),
        "digits",
        CandleArch {
            dims: vec![4, 8, 3],
        },
    )
    .unwrap();
}

fn seed_burn_model(dir: &TempDir) {
    BurnClassifier::create(&dir.path().join("burn"), "intents", MlpConfig::new(4, 8, 2)).unwrap();
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn training_rows() -> Value {
    // Class 0 when the first feature dominates, class 1 otherwise.
    json!([
        { "input": [0.9, 0.1, 0.0, 0.0], "output": 0 },
        { "input": [0.8, 0.2, 0.1, 0.0], "output": 0 },
        { "input": [0.1, 0.9, 0.3, 0.2], "output": 1 },
        { "input": [0.0, 0.8, 0.4, 0.1], "output": 1 },
        { "input": [0.7, 0.0, 0.2, 0.1], "output": 0 },
        { "input": [0.2, 0.7, 0.5, 0.3], "output": 1 },
        { "input": [0.9, 0.3, 0.0, 0.2], "output": 0 },
        { "input": [0.3, 0.9, 0.1, 0.4], "output": 1 }
    ])
}

#[tokio::test]
async fn health_is_ok_with_zero_models() {
    let dir = TempDir::new().unwrap();
    let app = create_model_app(test_state(&dir));

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["candle_models"], json!([]));
    assert_eq!(body["burn_models"], json!([]));
    assert!(body["device"].is_string());
}

#[tokio::test]
async fn predict_requires_model_and_input() {
    let dir = TempDir::new().unwrap();
    let app = create_model_app(test_state(&dir));

    for body in [
        json!({}),
        json!({ "model": "digits" }),
        json!({ "input": [[1.0, 2.0, 3.0, 4.0]] }),
        json!({ "model": "", "input": [[1.0, 2.0, 3.0, 4.0]] }),
    ] {
        let (status, response) = post_json(&app, "/candle/predict", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["error"].is_string());
    }
}

#[tokio::test]
async fn unknown_backend_is_400() {
    let dir = TempDir::new().unwrap();
    let app = create_model_app(test_state(&dir));

    let body = json!({ "model": "digits", "input": [[1.0, 2.0, 3.0, 4.0]] });
    let (status, _) = post_json(&app, "/onnx/predict", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&app, "/info/onnx/digits").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_model_is_404_not_500() {
    let dir = TempDir::new().unwrap();
    let app = create_model_app(test_state(&dir));

    let body = json!({ "model": "ghost", "input": [[1.0, 2.0, 3.0, 4.0]] });
    let (status, response) = post_json(&app, "/candle/predict", body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Model ghost not found");

    let (status, _) = get_json(&app, "/info/burn/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn candle_predict_returns_probabilities() {
    let dir = TempDir::new().unwrap();
    seed_candle_model(&dir);
    let app = create_model_app(test_state(&dir));

    let body = json!({ "model": "digits", "input": [0.1, 0.2, 0.3, 0.4] });
    let (status, response) = post_json(&app, "/candle/predict", body).await;

    assert_eq!(status, StatusCode::OK);
    let rows = response["result"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].as_array().unwrap().len(), 3);
    let confidence = response["confidence"].as_f64().unwrap();
    assert!(confidence > 0.0 && confidence <= 1.0);
    assert!(response["processing_time"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn candle_train_reports_metrics_in_response_shape() {
    let dir = TempDir::new().unwrap();
    CandleClassifier::create(
        &dir.path().join("candle"),
        "gate",
        CandleArch {
            dims: vec![4, 8, 2],
        },
    )
    .unwrap();
    let app = create_model_app(test_state(&dir));

    let body = json!({
        "model": "gate",
        "trainingData": training_rows(),
        "validationData": training_rows(),
        "hyperparams": { "epochs": 3, "batch_size": 4, "learning_rate": 0.05 }
    });
    let (status, response) = post_json(&app, "/candle/train", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["epochs"], json!(3));
    let accuracy = response["accuracy"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&accuracy));
    assert!(response["loss"].as_f64().unwrap().is_finite());
    assert!(response["trainingTime"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn train_requires_training_data() {
    let dir = TempDir::new().unwrap();
    seed_candle_model(&dir);
    let app = create_model_app(test_state(&dir));

    for body in [
        json!({ "model": "digits" }),
        json!({ "model": "digits", "trainingData": [] }),
        json!({ "trainingData": training_rows() }),
    ] {
        let (status, _) = post_json(&app, "/candle/train", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn burn_predict_and_info() {
    let dir = TempDir::new().unwrap();
    seed_burn_model(&dir);
    let app = create_model_app(test_state(&dir));

    let (status, info) = get_json(&app, "/info/burn/intents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["name"], "intents");
    assert_eq!(info["type"], "burn");
    assert_eq!(info["layers"], json!(2));
    assert_eq!(info["parameters"], json!(42));
    assert_eq!(info["input_dim"], json!(4));
    assert_eq!(info["output_dim"], json!(2));

    let body = json!({ "model": "intents", "input": [[0.4, 0.3, 0.2, 0.1]] });
    let (status, response) = post_json(&app, "/burn/predict", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["result"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn burn_train_round_trips() {
    let dir = TempDir::new().unwrap();
    seed_burn_model(&dir);
    let app = create_model_app(test_state(&dir));

    let body = json!({
        "model": "intents",
        "trainingData": training_rows(),
        "hyperparams": { "epochs": 2, "batch_size": 4 }
    });
    let (status, response) = post_json(&app, "/burn/train", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["epochs"], json!(2));
}

#[tokio::test]
async fn preload_warms_health_listing() {
    let dir = TempDir::new().unwrap();
    seed_candle_model(&dir);
    seed_burn_model(&dir);

    let state = test_state(&dir);
    state.preload().await;
    let app = create_model_app(state);

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["candle_models"], json!(["digits"]));
    assert_eq!(body["burn_models"], json!(["intents"]));
}
