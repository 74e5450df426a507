//! Configuration management for the latentserve services.
//!
//! Configuration is assembled from multiple sources, later sources
//! overriding earlier ones:
//! 1. Default configuration (embedded in the binary)
//! 2. System-wide configuration file (`/etc/latentserve/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (prefixed with `LATENTSERVE_`, nested keys
//!    separated with `__`, e.g. `LATENTSERVE_MODELS__PORT`)
//! 5. Command-line arguments (applied by the binaries)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration covering both services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Context-extraction service settings
    pub context: ContextConfig,
    /// Model-server settings
    pub models: ModelsConfig,
}

/// Context-extraction service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_context_port")]
    pub port: u16,
    /// Pretrained tokenizer file (tokenizer.json)
    pub tokenizer_path: PathBuf,
    /// Encoder weights (safetensors). Optional: the service starts with an
    /// untrained encoder when absent or missing on disk.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default = "default_latent_dim")]
    pub latent_dim: usize,
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
}

/// Model-server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_models_port")]
    pub port: u16,
    /// Root model directory, one subdirectory per backend
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Warm the registry from disk at startup
    #[serde(default = "default_preload")]
    pub preload: bool,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// CORS configuration for the model server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,
    /// Allowed origins; empty falls back to localhost development origins,
    /// `["*"]` allows any origin (credentials are then disabled)
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_credentials")]
    pub allow_credentials: bool,
    /// Max age for preflight cache (in seconds)
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            allowed_origins: Vec::new(),
            allow_credentials: default_cors_credentials(),
            max_age: default_cors_max_age(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from all sources.
    pub fn load(user_config: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/latentserve/config.toml").required(false));

        if let Some(path) = user_config {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LATENTSERVE").separator("__"),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_context_port() -> u16 {
    8000
}

fn default_models_port() -> u16 {
    5000
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_request_timeout() -> u64 {
    300
}

fn default_preload() -> bool {
    true
}

fn default_latent_dim() -> usize {
    128
}

fn default_max_seq_length() -> usize {
    128
}

fn default_vocab_size() -> usize {
    30522
}

fn default_cors_enabled() -> bool {
    true
}

fn default_cors_credentials() -> bool {
    true
}

fn default_cors_max_age() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServiceConfig::load(None).unwrap();
        assert_eq!(config.context.port, 8000);
        assert_eq!(config.context.latent_dim, 128);
        assert_eq!(config.context.max_seq_length, 128);
        assert_eq!(config.context.vocab_size, 30522);
        assert_eq!(config.models.port, 5000);
        assert_eq!(config.models.request_timeout_secs, 300);
        assert!(config.models.preload);
        assert!(config.models.cors.enabled);
    }
}
