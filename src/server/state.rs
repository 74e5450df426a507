//! Server state management

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::backend::{BackendKind, DiskModelLoader};
use crate::config::{ContextConfig, ModelsConfig};
use crate::registry::ModelRegistry;
use crate::vae::{ContextEncoder, EncoderConfig};

/// Shared state for the context-extraction service.
#[derive(Clone)]
pub struct ContextState {
    pub encoder: Arc<ContextEncoder>,
    /// Model identifier reported by /health
    pub model_name: String,
    /// Device label reported by /health
    pub device: String,
}

impl ContextState {
    pub fn new(encoder: ContextEncoder, device: String) -> Self {
        Self {
            encoder: Arc::new(encoder),
            model_name: "dialogue-vae-lstm".to_string(),
            device,
        }
    }

    /// Build the state from configuration: load tokenizer and weights,
    /// degrading to an untrained encoder when the weights are absent.
    pub fn initialize(config: &ContextConfig) -> anyhow::Result<Self> {
        let device = crate::backend::select_device();
        info!("Using device: {}", device_label(&device));

        let encoder_config = EncoderConfig {
            latent_dim: config.latent_dim,
            max_seq_length: config.max_seq_length,
            vocab_size: config.vocab_size,
        };
        let encoder = ContextEncoder::open(
            encoder_config,
            &config.tokenizer_path,
            config.model_path.as_deref(),
            &device,
        )?;
        Ok(Self::new(encoder, device_label(&device).to_string()))
    }
}

/// Shared state for the model server.
#[derive(Clone)]
pub struct ModelServerState {
    pub registry: Arc<ModelRegistry<DiskModelLoader>>,
    pub config: Arc<ModelsConfig>,
    pub metrics: Arc<Metrics>,
    pub device: String,
    pub started_at: Instant,
}

impl ModelServerState {
    pub fn new(config: ModelsConfig) -> Self {
        let device = device_label(&crate::backend::select_device()).to_string();
        let loader = DiskModelLoader::new(config.model_dir.clone());
        Self {
            registry: Arc::new(ModelRegistry::new(loader)),
            config: Arc::new(config),
            metrics: Arc::new(Metrics::default()),
            device,
            started_at: Instant::now(),
        }
    }

    /// Warm the registry from disk, one backend subdirectory at a time.
    /// Individual load failures are cached as unavailable and logged; the
    /// server starts regardless.
    pub async fn preload(&self) {
        for backend in BackendKind::ALL {
            let dir = self.config.model_dir.join(backend.subdir());
            let names = match discover_models(backend, &dir).await {
                Ok(names) => names,
                Err(e) => {
                    debug!("No {} model directory at {}: {e:#}", backend, dir.display());
                    continue;
                }
            };
            let loads = names.iter().map(|name| self.registry.get_or_load(backend, name));
            let results = futures::future::join_all(loads).await;
            let loaded = results.iter().filter(|r| r.is_some()).count();
            info!("Preloaded {}/{} {} models", loaded, names.len(), backend);
        }
    }
}

/// Names of models present in one backend's subdirectory.
async fn discover_models(backend: BackendKind, dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        match backend {
            BackendKind::Candle => {
                if path.extension().is_some_and(|ext| ext == "safetensors") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
            BackendKind::Burn => {
                if path.is_dir() && path.join("config.json").is_file() {
                    if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                        names.push(name.to_string());
                    }
                }
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Request counters for the model server.
#[derive(Default)]
pub struct Metrics {
    /// Total requests processed
    pub total_requests: AtomicU64,
    /// Running average request latency in milliseconds
    pub avg_latency_ms: RwLock<f64>,
}

impl Metrics {
    pub async fn record_request(&self, latency_ms: f64) {
        let count = self.total_requests.fetch_add(1, Ordering::Relaxed) + 1;
        let mut avg = self.avg_latency_ms.write().await;
        *avg += (latency_ms - *avg) / count as f64;
    }

    pub fn total(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }
}

fn device_label(device: &candle_core::Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else {
        "cpu"
    }
}
