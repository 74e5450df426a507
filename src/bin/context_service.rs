//! Context-extraction service binary.
//!
//! Holds one recurrent variational encoder in memory and serves
//! `POST /extract-context` and `GET /health`.

use anyhow::Result;
use clap::Parser;
use latentserve_core::config::ServiceConfig;
use latentserve_core::server::state::ContextState;
use latentserve_core::server::{create_context_app, start_server};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Dialogue context extraction service")]
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

    /// Encoder weights override (safetensors)
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Tokenizer file override (tokenizer.json)
    #[arg(long)]
    tokenizer_path: Option<PathBuf>,
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

    let mut config = ServiceConfig::load(args.config.as_deref())?.context;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(model_path) = args.model_path {
        config.model_path = Some(model_path);
    }
    if let Some(tokenizer_path) = args.tokenizer_path {
        config.tokenizer_path = tokenizer_path;
    }

    info!("Context service starting up");
    let state = ContextState::initialize(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    start_server(addr, create_context_app(state)).await
}
