//! Model-server binary.
//!
//! Serves predict, train, introspection and health endpoints over a lazily
//! populated model registry spanning the supported backends.

use anyhow::Result;
use clap::Parser;
use latentserve_core::config::ServiceConfig;
use latentserve_core::server::state::ModelServerState;
use latentserve_core::server::{create_model_app, start_server};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Multi-backend model inference and training server")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override
    #[arg(long)]
    host: Option<String>,

    /// Port override
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Model directory override
    #[arg(long, env = "MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Skip the startup preload scan
    #[arg(long)]
    no_preload: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,latentserve_core=debug")),
        )
        .init();

    let mut config = ServiceConfig::load(args.config.as_deref())?.models;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(model_dir) = args.model_dir {
        config.model_dir = model_dir;
    }
    if args.no_preload {
        config.preload = false;
    }

    info!("Model server starting up");
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = ModelServerState::new(config);
    if state.config.preload {
        state.preload().await;
    }

    start_server(addr, create_model_app(state)).await
}
