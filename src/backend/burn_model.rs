//! Burn backend: the same classifier shape recorded with burn's file
//! recorder on the CPU (ndarray) backend.
//!
//! The architecture config is saved as a separate JSON file next to the
//! weights; loading rebuilds the model from the config before restoring the
//! record into it. Training happens on the autodiff backend, so the live
//! weights are moved across through a byte recorder, trained, and moved
//! back with `valid()`.

use anyhow::{anyhow, Context, Result};
use burn::module::AutodiffModule;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{BinBytesRecorder, CompactRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::softmax;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    check_input, check_samples, BackendKind, Hyperparams, ModelDescription, PredictOutcome,
    TrainingSample,
};

type InferBackend = burn::backend::NdArray;
type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;
type InferDevice = burn::backend::ndarray::NdArrayDevice;

#[derive(Config, Debug)]
pub struct MlpConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub output_dim: usize,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        Mlp {
            fc1: LinearConfig::new(self.input_dim, self.hidden_dim).init(device),
            fc2: LinearConfig::new(self.hidden_dim, self.output_dim).init(device),
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.fc1.forward(input));
        self.fc2.forward(x)
    }
}

pub struct BurnClassifier {
    name: String,
    config: MlpConfig,
    model: Mlp<InferBackend>,
    device: InferDevice,
    model_dir: PathBuf,
}

impl BurnClassifier {
    /// Load `{dir}/{name}/config.json` + `{dir}/{name}/model` record.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let model_dir = dir.join(name);
        let config_path = model_dir.join("config.json");

        let config: MlpConfig = serde_json::from_str(
            &fs::read_to_string(&config_path)
                .with_context(|| format!("no config file at {}", config_path.display()))?,
        )
        .with_context(|| format!("invalid config file {}", config_path.display()))?;

        let device = InferDevice::default();
        let record = CompactRecorder::new()
            .load(model_dir.join("model"), &device)
            .with_context(|| format!("failed to load weights from {}", model_dir.display()))?;
        let model = config.init::<InferBackend>(&device).load_record(record);

        debug!("Loaded burn model {} ({:?})", name, config);
        Ok(Self {
            name: name.to_string(),
            config,
            model,
            device,
            model_dir,
        })
    }

    /// Create a freshly initialized model on disk.
    pub fn create(dir: &Path, name: &str, config: MlpConfig) -> Result<Self> {
        let model_dir = dir.join(name);
        fs::create_dir_all(&model_dir)
            .with_context(|| format!("cannot create model directory {}", model_dir.display()))?;

        let device = InferDevice::default();
        let model = config.init::<InferBackend>(&device);
        CompactRecorder::new()
            .record(model.clone().into_record(), model_dir.join("model"))
            .map_err(|e| anyhow!("failed to save weights: {e}"))?;
        fs::write(
            model_dir.join("config.json"),
            serde_json::to_string_pretty(&config)?,
        )?;

        Ok(Self {
            name: name.to_string(),
            config,
            model,
            device,
            model_dir,
        })
    }

    pub fn predict(&self, input: &[Vec<f32>]) -> Result<PredictOutcome> {
        check_input(input, self.config.input_dim)?;

        let flat: Vec<f32> = input.iter().flatten().copied().collect();
        let xs: Tensor<InferBackend, 2> = Tensor::from_data(
            TensorData::new(flat, [input.len(), self.config.input_dim]),
            &self.device,
        );

        let probs = softmax(self.model.forward(xs), 1);
        let flat_probs = probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("tensor readback failed: {e:?}"))?;
        let result: Vec<Vec<f32>> = flat_probs
            .chunks(self.config.output_dim)
            .map(|row| row.to_vec())
            .collect();
        let confidence = flat_probs
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);

        Ok(PredictOutcome { result, confidence })
    }

    /// Mini-batch training with Adam; saves the weights back on success and
    /// returns final-epoch (accuracy, loss).
    pub fn train(
        &mut self,
        samples: &[TrainingSample],
        validation: Option<&[TrainingSample]>,
        hyperparams: &Hyperparams,
    ) -> Result<(f32, f32)> {
        check_samples(samples, self.config.input_dim, self.config.output_dim)?;
        if let Some(validation) = validation {
            check_samples(validation, self.config.input_dim, self.config.output_dim)?;
        }

        // Move the live weights onto the autodiff backend.
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = recorder
            .record(self.model.clone().into_record(), ())
            .map_err(|e| anyhow!("failed to snapshot weights: {e}"))?;
        let record = recorder
            .load(bytes, &self.device)
            .map_err(|e| anyhow!("failed to restore weights: {e}"))?;
        let mut model = self.config.init::<TrainBackend>(&self.device).load_record(record);

        let ce: CrossEntropyLoss<TrainBackend> = CrossEntropyLossConfig::new().init(&self.device);
        let mut optim = AdamConfig::new().init();

        let batch_size = hyperparams.batch_size.max(1);
        let mut last_loss = f32::NAN;
        for epoch in 1..=hyperparams.epochs {
            for chunk in samples.chunks(batch_size) {
                let (xb, yb) =
                    batch_tensors::<TrainBackend>(chunk, self.config.input_dim, &self.device);
                let logits = model.forward(xb);
                let loss = ce.forward(logits, yb);
                last_loss = loss.clone().into_scalar().elem::<f32>();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(hyperparams.learning_rate, model, grads);
            }
            debug!("burn {} epoch {}: loss {:.4}", self.name, epoch, last_loss);
        }

        self.model = model.valid();

        let eval = validation.unwrap_or(samples);
        let (ex, ey) = batch_tensors::<InferBackend>(eval, self.config.input_dim, &self.device);
        let logits = self.model.forward(ex);
        // argmax(1) keeps the dim ([n, 1]); flatten down to [n] before equal
        let predicted = logits.argmax(1).flatten::<1>(0, 1);
        let correct: i64 = predicted.equal(ey).int().sum().into_scalar().elem::<i64>();
        let accuracy = correct as f32 / eval.len() as f32;

        CompactRecorder::new()
            .record(self.model.clone().into_record(), self.model_dir.join("model"))
            .map_err(|e| anyhow!("failed to save weights: {e}"))?;

        Ok((accuracy, last_loss))
    }

    pub fn describe(&self) -> ModelDescription {
        let parameters = self.model.num_params();
        ModelDescription {
            name: self.name.clone(),
            backend: BackendKind::Burn,
            layers: 2,
            parameters,
            trainable_parameters: parameters,
            input_dim: self.config.input_dim,
            output_dim: self.config.output_dim,
        }
    }
}

fn batch_tensors<B: Backend>(
    samples: &[TrainingSample],
    input_dim: usize,
    device: &B::Device,
) -> (Tensor<B, 2>, Tensor<B, 1, Int>) {
    let flat: Vec<f32> = samples.iter().flat_map(|s| s.input.iter().copied()).collect();
    let labels: Vec<i64> = samples.iter().map(|s| s.output as i64).collect();
    let xs = Tensor::from_data(TensorData::new(flat, [samples.len(), input_dim]), device);
    let ys = Tensor::from_data(TensorData::new(labels, [samples.len()]), device);
    (xs, ys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn toy_samples() -> Vec<TrainingSample> {
        let mut samples = Vec::new();
        for i in 0..16 {
            let a = 0.1 + (i as f32) * 0.05;
            samples.push(TrainingSample {
                input: vec![a, a + 0.5],
                output: 1,
            });
            samples.push(TrainingSample {
                input: vec![a + 0.5, a],
                output: 0,
            });
        }
        samples
    }

    #[test]
    fn create_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        BurnClassifier::create(dir.path(), "toy", MlpConfig::new(2, 8, 2)).unwrap();

        let model = BurnClassifier::load(dir.path(), "toy").unwrap();
        let description = model.describe();
        assert_eq!(description.layers, 2);
        assert_eq!(description.input_dim, 2);
        assert_eq!(description.output_dim, 2);
        assert_eq!(description.parameters, 42);
    }

    #[test]
    fn load_without_files_fails() {
        let dir = TempDir::new().unwrap();
        assert!(BurnClassifier::load(dir.path(), "ghost").is_err());
    }

    #[test]
    fn predict_returns_probability_rows() {
        let dir = TempDir::new().unwrap();
        let model = BurnClassifier::create(dir.path(), "toy", MlpConfig::new(2, 8, 2)).unwrap();

        let outcome = model.predict(&[vec![0.2, 0.9], vec![0.9, 0.2]]).unwrap();
        assert_eq!(outcome.result.len(), 2);
        for row in &outcome.result {
            assert_eq!(row.len(), 2);
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
        assert!(outcome.confidence > 0.0 && outcome.confidence <= 1.0);
    }

    #[test]
    fn train_updates_weights_and_persists() {
        let dir = TempDir::new().unwrap();
        let mut model = BurnClassifier::create(dir.path(), "toy", MlpConfig::new(2, 8, 2)).unwrap();

        let samples = toy_samples();
        let hp = Hyperparams {
            epochs: 10,
            batch_size: 8,
            learning_rate: 0.05,
        };
        let (accuracy, loss) = model.train(&samples, Some(&samples), &hp).unwrap();
        assert!(loss.is_finite());
        assert!((0.0..=1.0).contains(&accuracy));

        let reloaded = BurnClassifier::load(dir.path(), "toy").unwrap();
        let a = model.predict(&[vec![0.1, 0.9]]).unwrap();
        let b = reloaded.predict(&[vec![0.1, 0.9]]).unwrap();
        assert_eq!(a.result, b.result);
    }
}
