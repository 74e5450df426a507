//! HTTP servers for the two services.
//!
//! Both services are flat request → lookup/load → model call → serialize
//! pipelines on top of axum. Routers are assembled here; handlers live in
//! `routes`.

use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod middleware;
pub mod routes;
pub mod state;

use state::{ContextState, ModelServerState};

/// Create the context-service application router
pub fn create_context_app(state: ContextState) -> Router {
    Router::new()
        .merge(routes::extract::create_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create the model-server application router
pub fn create_model_app(state: ModelServerState) -> Router {
    let cors_config = state.config.cors.clone();
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    let mut app = Router::new()
        .merge(routes::inference::create_router())
        .merge(routes::info::create_router())
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_config.enabled {
        app = app.layer(middleware::cors_layer(&cors_config));
    }

    app
}

/// Bind and serve until the process exits.
pub async fn start_server(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install shutdown handler: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
