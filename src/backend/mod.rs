//! Closed set of model-serving backends.
//!
//! A loaded model is a tagged variant over the supported runtimes, each
//! providing the same load / predict / train / describe surface. Adding a
//! backend means adding a variant here; there is no dynamic discovery.

pub mod burn_model;
pub mod candle_model;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::registry::ModelLoader;
pub use burn_model::BurnClassifier;
pub use candle_model::CandleClassifier;

/// Supported model runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Candle,
    Burn,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Candle, BackendKind::Burn];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Candle => "candle",
            BackendKind::Burn => "burn",
        }
    }

    /// Subdirectory of the model directory holding this backend's models.
    pub fn subdir(&self) -> &'static str {
        self.as_str()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candle" => Some(BackendKind::Candle),
            "burn" => Some(BackendKind::Burn),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CUDA when compiled in and present, CPU otherwise.
pub fn select_device() -> candle_core::Device {
    use candle_core::Device;
    if candle_core::utils::cuda_is_available() {
        Device::new_cuda(0).unwrap_or(Device::Cpu)
    } else {
        Device::Cpu
    }
}

/// One labelled training example.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSample {
    /// Feature vector
    pub input: Vec<f32>,
    /// Class index
    pub output: u32,
}

/// Training hyperparameters, all optional on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Hyperparams {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
        }
    }
}

fn default_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    0.001
}

/// Per-request inference output: one row of class probabilities per sample
/// plus the highest probability seen across the batch.
#[derive(Debug)]
pub struct PredictOutcome {
    pub result: Vec<Vec<f32>>,
    pub confidence: f32,
}

/// Final-epoch training metrics.
#[derive(Debug)]
pub struct TrainOutcome {
    pub accuracy: f32,
    pub loss: f32,
    pub epochs: usize,
    pub training_time: f64,
}

/// Read-only model metadata for the introspection endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub backend: BackendKind,
    pub layers: usize,
    pub parameters: usize,
    pub trainable_parameters: usize,
    pub input_dim: usize,
    pub output_dim: usize,
}

/// A loaded model from any backend.
pub enum ModelHandle {
    Candle(CandleClassifier),
    Burn(BurnClassifier),
}

impl ModelHandle {
    /// Load `name` from the backend's subdirectory under `dir`.
    pub fn load(backend: BackendKind, dir: &Path, name: &str) -> Result<Self> {
        match backend {
            BackendKind::Candle => Ok(ModelHandle::Candle(CandleClassifier::load(dir, name)?)),
            BackendKind::Burn => Ok(ModelHandle::Burn(BurnClassifier::load(dir, name)?)),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            ModelHandle::Candle(_) => BackendKind::Candle,
            ModelHandle::Burn(_) => BackendKind::Burn,
        }
    }

    pub fn predict(&self, input: &[Vec<f32>]) -> Result<PredictOutcome> {
        match self {
            ModelHandle::Candle(model) => model.predict(input),
            ModelHandle::Burn(model) => model.predict(input),
        }
    }

    /// Run a blocking training pass and persist the updated weights.
    pub fn train(
        &mut self,
        samples: &[TrainingSample],
        validation: Option<&[TrainingSample]>,
        hyperparams: &Hyperparams,
    ) -> Result<TrainOutcome> {
        let started = Instant::now();
        let (accuracy, loss) = match self {
            ModelHandle::Candle(model) => model.train(samples, validation, hyperparams)?,
            ModelHandle::Burn(model) => model.train(samples, validation, hyperparams)?,
        };
        Ok(TrainOutcome {
            accuracy,
            loss,
            epochs: hyperparams.epochs,
            training_time: started.elapsed().as_secs_f64(),
        })
    }

    pub fn describe(&self) -> ModelDescription {
        match self {
            ModelHandle::Candle(model) => model.describe(),
            ModelHandle::Burn(model) => model.describe(),
        }
    }
}

/// Validates a batch of feature rows against the model's input dimension.
fn check_input(input: &[Vec<f32>], input_dim: usize) -> Result<()> {
    if input.is_empty() {
        bail!("input is empty");
    }
    for (i, row) in input.iter().enumerate() {
        if row.len() != input_dim {
            bail!(
                "input row {} has {} features, model expects {}",
                i,
                row.len(),
                input_dim
            );
        }
    }
    Ok(())
}

/// Validates training samples: consistent feature width, labels in range.
fn check_samples(samples: &[TrainingSample], input_dim: usize, output_dim: usize) -> Result<()> {
    if samples.is_empty() {
        bail!("training data is empty");
    }
    for (i, sample) in samples.iter().enumerate() {
        if sample.input.len() != input_dim {
            bail!(
                "sample {} has {} features, model expects {}",
                i,
                sample.input.len(),
                input_dim
            );
        }
        if sample.output as usize >= output_dim {
            bail!(
                "sample {} has class {}, model has {} classes",
                i,
                sample.output,
                output_dim
            );
        }
    }
    Ok(())
}

/// Loads model handles from a conventional on-disk layout: one
/// subdirectory per backend under the configured model directory.
pub struct DiskModelLoader {
    model_dir: PathBuf,
}

impl DiskModelLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }
}

#[async_trait::async_trait]
impl ModelLoader for DiskModelLoader {
    type Handle = ModelHandle;

    async fn load(&self, backend: BackendKind, name: &str) -> Result<ModelHandle> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            bail!("invalid model name: {name:?}");
        }
        let dir = self.model_dir.join(backend.subdir());
        let name = name.to_string();
        // Model loading is blocking, file-and-CPU-bound work.
        tokio::task::spawn_blocking(move || ModelHandle::load(backend, &dir, &name))
            .await
            .map_err(|e| anyhow!("model load task failed: {e}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parse_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BackendKind::parse("onnx"), None);
        assert_eq!(BackendKind::parse(""), None);
    }

    #[test]
    fn hyperparams_defaults() {
        let hp: Hyperparams = serde_json::from_str("{}").unwrap();
        assert_eq!(hp.epochs, 10);
        assert_eq!(hp.batch_size, 32);
        assert!((hp.learning_rate - 0.001).abs() < f64::EPSILON);
    }

    #[test]
    fn input_validation() {
        assert!(check_input(&[], 2).is_err());
        assert!(check_input(&[vec![1.0, 2.0]], 2).is_ok());
        assert!(check_input(&[vec![1.0]], 2).is_err());

        let samples = vec![TrainingSample {
            input: vec![1.0, 2.0],
            output: 3,
        }];
        assert!(check_samples(&samples, 2, 2).is_err());
        assert!(check_samples(&samples, 2, 4).is_ok());
    }
}
