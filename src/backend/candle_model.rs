//! Candle backend: feed-forward classifiers stored as safetensors weights
//! with a JSON architecture sidecar.
//!
//! The sidecar records the layer widths so the network can be rebuilt
//! before the weights are loaded into it; without it the checkpoint is not
//! self-describing.

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::optim::{AdamW, ParamsAdamW};
use candle_nn::{linear, loss, ops, Linear, Module, Optimizer, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    check_input, check_samples, select_device, BackendKind, Hyperparams, ModelDescription,
    PredictOutcome, TrainingSample,
};

/// Architecture sidecar: layer widths from input to output,
/// e.g. `[4, 16, 3]` is a 4-feature, 3-class network with one hidden layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleArch {
    pub dims: Vec<usize>,
}

pub struct CandleClassifier {
    name: String,
    arch: CandleArch,
    varmap: VarMap,
    layers: Vec<Linear>,
    device: Device,
    weights_path: PathBuf,
}

impl CandleClassifier {
    /// Load `{dir}/{name}.safetensors` + `{dir}/{name}.json`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let weights_path = dir.join(format!("{name}.safetensors"));
        let arch_path = dir.join(format!("{name}.json"));

        let arch: CandleArch = serde_json::from_str(
            &fs::read_to_string(&arch_path)
                .with_context(|| format!("no architecture file at {}", arch_path.display()))?,
        )
        .with_context(|| format!("invalid architecture file {}", arch_path.display()))?;

        let device = select_device();
        let mut varmap = VarMap::new();
        let layers = build_layers(&arch, &varmap, &device)?;
        varmap
            .load(&weights_path)
            .with_context(|| format!("failed to load weights from {}", weights_path.display()))?;

        debug!("Loaded candle model {} ({:?})", name, arch.dims);
        Ok(Self {
            name: name.to_string(),
            arch,
            varmap,
            layers,
            device,
            weights_path,
        })
    }

    /// Create a freshly initialized model on disk.
    pub fn create(dir: &Path, name: &str, arch: CandleArch) -> Result<Self> {
        let device = select_device();
        let varmap = VarMap::new();
        let layers = build_layers(&arch, &varmap, &device)?;

        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create model directory {}", dir.display()))?;
        let weights_path = dir.join(format!("{name}.safetensors"));
        varmap.save(&weights_path)?;
        fs::write(
            dir.join(format!("{name}.json")),
            serde_json::to_string_pretty(&arch)?,
        )?;

        Ok(Self {
            name: name.to_string(),
            arch,
            varmap,
            layers,
            device,
            weights_path,
        })
    }

    pub fn predict(&self, input: &[Vec<f32>]) -> Result<PredictOutcome> {
        check_input(input, self.input_dim())?;

        let batch = input.len();
        let flat: Vec<f32> = input.iter().flatten().copied().collect();
        let xs = Tensor::from_vec(flat, (batch, self.input_dim()), &self.device)?;

        let logits = self.forward(&xs)?;
        let probs = ops::softmax_last_dim(&logits)?;
        let result = probs.to_vec2::<f32>()?;
        let confidence = result
            .iter()
            .flatten()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);

        Ok(PredictOutcome { result, confidence })
    }

    /// Mini-batch training with AdamW; saves the weights back on success
    /// and returns final-epoch (accuracy, loss). Accuracy is measured on
    /// `validation` when given, otherwise on the training set.
    pub fn train(
        &mut self,
        samples: &[TrainingSample],
        validation: Option<&[TrainingSample]>,
        hyperparams: &Hyperparams,
    ) -> Result<(f32, f32)> {
        check_samples(samples, self.input_dim(), self.output_dim())?;
        if let Some(validation) = validation {
            check_samples(validation, self.input_dim(), self.output_dim())?;
        }

        let (xs, ys) = self.sample_tensors(samples)?;
        let mut optimizer = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: hyperparams.learning_rate,
                ..Default::default()
            },
        )?;

        let batch_size = hyperparams.batch_size.max(1);
        let mut last_loss = f32::NAN;
        for epoch in 1..=hyperparams.epochs {
            let mut start = 0;
            while start < samples.len() {
                let len = batch_size.min(samples.len() - start);
                let xb = xs.narrow(0, start, len)?;
                let yb = ys.narrow(0, start, len)?;

                let logits = self.forward(&xb)?;
                let batch_loss = loss::cross_entropy(&logits, &yb)?;
                optimizer.backward_step(&batch_loss)?;
                last_loss = batch_loss.to_scalar::<f32>()?;

                start += len;
            }
            debug!("candle {} epoch {}: loss {:.4}", self.name, epoch, last_loss);
        }

        let accuracy = match validation {
            Some(validation) => self.accuracy(validation)?,
            None => self.accuracy(samples)?,
        };

        self.varmap.save(&self.weights_path)?;
        Ok((accuracy, last_loss))
    }

    pub fn describe(&self) -> ModelDescription {
        let parameters: usize = self
            .varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum();
        ModelDescription {
            name: self.name.clone(),
            backend: BackendKind::Candle,
            layers: self.layers.len(),
            parameters,
            // Every variable participates in training.
            trainable_parameters: parameters,
            input_dim: self.input_dim(),
            output_dim: self.output_dim(),
        }
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i != last {
                xs = xs.relu()?;
            }
        }
        Ok(xs)
    }

    fn accuracy(&self, samples: &[TrainingSample]) -> Result<f32> {
        let (xs, ys) = self.sample_tensors(samples)?;
        let logits = self.forward(&xs)?;
        let predicted = logits.argmax(D::Minus1)?;
        let correct = predicted
            .eq(&ys)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        Ok(correct / samples.len() as f32)
    }

    fn sample_tensors(&self, samples: &[TrainingSample]) -> Result<(Tensor, Tensor)> {
        let flat: Vec<f32> = samples.iter().flat_map(|s| s.input.iter().copied()).collect();
        let labels: Vec<u32> = samples.iter().map(|s| s.output).collect();
        let xs = Tensor::from_vec(flat, (samples.len(), self.input_dim()), &self.device)?;
        let ys = Tensor::from_vec(labels, (samples.len(),), &self.device)?;
        Ok((xs, ys))
    }

    fn input_dim(&self) -> usize {
        self.arch.dims[0]
    }

    fn output_dim(&self) -> usize {
        *self.arch.dims.last().unwrap_or(&0)
    }
}

fn build_layers(arch: &CandleArch, varmap: &VarMap, device: &Device) -> Result<Vec<Linear>> {
    if arch.dims.len() < 2 {
        bail!("architecture needs at least input and output widths");
    }
    let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
    let mut layers = Vec::with_capacity(arch.dims.len() - 1);
    for (i, pair) in arch.dims.windows(2).enumerate() {
        layers.push(linear(pair[0], pair[1], vb.pp(format!("fc{i}")))?);
    }
    Ok(layers)
}
