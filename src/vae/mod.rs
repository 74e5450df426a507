//! Dialogue context encoder: the inference half of a recurrent VAE.
//!
//! Text is tokenized to a fixed-length id sequence, embedded, run through a
//! single-layer LSTM, and the final hidden state is projected to a mean and
//! a log-variance. The returned latent is a reparameterized sample,
//! `mu + eps * exp(0.5 * logvar)` with `eps ~ N(0, 1)`, so identical inputs
//! intentionally produce different vectors on every call. The decoder half
//! of the trained VAE is never executed at inference time and is not built.

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{embedding, linear, lstm, Embedding, LSTMConfig, Linear, Module, VarBuilder, VarMap, LSTM, RNN};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{info, warn};

/// Encoder architecture parameters.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub latent_dim: usize,
    pub max_seq_length: usize,
    pub vocab_size: usize,
}

/// Wraps a pretrained tokenizer with fixed-length padding/truncation.
pub struct ContextTokenizer {
    inner: Tokenizer,
    max_len: usize,
    pad_id: u32,
}

impl ContextTokenizer {
    pub fn new(inner: Tokenizer, max_len: usize) -> Self {
        Self {
            inner,
            max_len,
            pad_id: 0,
        }
    }

    pub fn from_file(path: &Path, max_len: usize) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", path.display()))?;
        Ok(Self::new(inner, max_len))
    }

    /// Encode to exactly `max_len` ids, truncating or padding as needed.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow!("tokenization failed: {e}"))?;
        let mut ids = encoding.get_ids().to_vec();
        if ids.is_empty() {
            bail!("tokenization produced an empty sequence for text: {text:?}");
        }
        ids.truncate(self.max_len);
        ids.resize(self.max_len, self.pad_id);
        Ok(ids)
    }
}

/// Embedding → LSTM → mean/log-variance heads.
pub struct DialogueEncoder {
    embedding: Embedding,
    encoder: LSTM,
    fc_mu: Linear,
    fc_logvar: Linear,
    device: Device,
}

impl DialogueEncoder {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let embedding = embedding(config.vocab_size, config.latent_dim, vb.pp("embedding"))?;
        let encoder = lstm(
            config.latent_dim,
            config.latent_dim,
            LSTMConfig::default(),
            vb.pp("encoder"),
        )?;
        let fc_mu = linear(config.latent_dim, config.latent_dim, vb.pp("fc_mu"))?;
        let fc_logvar = linear(config.latent_dim, config.latent_dim, vb.pp("fc_logvar"))?;
        let device = vb.device().clone();
        Ok(Self {
            embedding,
            encoder,
            fc_mu,
            fc_logvar,
            device,
        })
    }

    /// Build the encoder, restoring weights from `weights` when given.
    ///
    /// A full-VAE checkpoint also containing decoder tensors loads fine;
    /// keys not present in the encoder are ignored.
    pub fn open(config: &EncoderConfig, weights: Option<&Path>, device: &Device) -> Result<Self> {
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        if let Some(path) = weights {
            varmap
                .load(path)
                .with_context(|| format!("error loading model from {}", path.display()))?;
            info!("Loaded encoder weights from {}", path.display());
        }
        Ok(model)
    }

    /// Map a `[1, seq]` id tensor to a `[1, latent]` sampled latent.
    pub fn encode(&self, input_ids: &Tensor) -> Result<Tensor> {
        let embedded = self.embedding.forward(input_ids)?;
        let states = self.encoder.seq(&embedded)?;
        let last = states
            .last()
            .ok_or_else(|| anyhow!("encoder produced no states for empty sequence"))?;
        let hidden = last.h();
        let mu = self.fc_mu.forward(hidden)?;
        let logvar = self.fc_logvar.forward(hidden)?;
        self.reparameterize(&mu, &logvar)
    }

    fn reparameterize(&self, mu: &Tensor, logvar: &Tensor) -> Result<Tensor> {
        let std = logvar.affine(0.5, 0.0)?.exp()?;
        let eps = Tensor::randn(0f32, 1f32, std.dims(), &self.device)?;
        Ok(mu.add(&eps.mul(&std)?)?)
    }
}

/// A sampled latent vector plus its tensor shape.
#[derive(Debug)]
pub struct LatentVector {
    pub values: Vec<f32>,
    pub shape: Vec<usize>,
}

/// Everything the context service holds in memory: tokenizer, encoder,
/// and the architecture they were built with.
pub struct ContextEncoder {
    config: EncoderConfig,
    tokenizer: ContextTokenizer,
    model: DialogueEncoder,
    device: Device,
}

impl ContextEncoder {
    pub fn new(config: EncoderConfig, tokenizer: ContextTokenizer, model: DialogueEncoder) -> Self {
        let device = model.device.clone();
        Self {
            config,
            tokenizer,
            model,
            device,
        }
    }

    /// Load tokenizer and encoder from disk. Missing weights degrade to an
    /// untrained encoder rather than failing startup.
    pub fn open(
        config: EncoderConfig,
        tokenizer_path: &Path,
        weights_path: Option<&Path>,
        device: &Device,
    ) -> Result<Self> {
        let tokenizer = ContextTokenizer::from_file(tokenizer_path, config.max_seq_length)?;
        let weights = match weights_path {
            Some(path) if path.exists() => Some(path),
            Some(path) => {
                warn!(
                    "Model file not found at {}, using untrained encoder",
                    path.display()
                );
                None
            }
            None => None,
        };
        let model = match weights {
            Some(path) => match DialogueEncoder::open(&config, Some(path), device) {
                Ok(model) => model,
                Err(e) => {
                    // Degraded start: a bad checkpoint must not abort the
                    // service.
                    warn!("Error loading model: {e:#}; using untrained encoder");
                    DialogueEncoder::open(&config, None, device)?
                }
            },
            None => DialogueEncoder::open(&config, None, device)?,
        };
        Ok(Self::new(config, tokenizer, model))
    }

    pub fn extract(&self, text: &str) -> Result<LatentVector> {
        let ids = self.tokenizer.encode(text)?;
        let input = Tensor::from_vec(ids, (1, self.config.max_seq_length), &self.device)?;
        let latent = self.model.encode(&input)?;
        let shape = latent.dims().to_vec();
        let values = latent.flatten_all()?.to_vec1::<f32>()?;
        Ok(LatentVector { values, shape })
    }

    pub fn latent_dim(&self) -> usize {
        self.config.latent_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenizers::models::wordlevel::WordLevel;

    fn toy_tokenizer(max_len: usize) -> ContextTokenizer {
        let vocab = [("[UNK]", 0u32), ("hello", 1), ("world", 2)]
            .into_iter()
            .map(|(token, id)| (token.to_string(), id))
            .collect();
        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token("[UNK]".to_string())
            .build()
            .unwrap();
        ContextTokenizer::new(Tokenizer::new(model), max_len)
    }

    fn toy_encoder(latent_dim: usize, max_seq_length: usize) -> ContextEncoder {
        let config = EncoderConfig {
            latent_dim,
            max_seq_length,
            vocab_size: 8,
        };
        let model = DialogueEncoder::open(&config, None, &Device::Cpu).unwrap();
        ContextEncoder::new(config, toy_tokenizer(max_seq_length), model)
    }

    #[test]
    fn tokenizer_pads_and_truncates() {
        let tokenizer = toy_tokenizer(4);
        let ids = tokenizer.encode("hello").unwrap();
        assert_eq!(ids, vec![1, 0, 0, 0]);
        assert!(tokenizer.encode("").is_err());
    }

    #[test]
    fn latent_has_configured_dimension() {
        let encoder = toy_encoder(16, 4);
        let latent = encoder.extract("hello").unwrap();
        assert_eq!(latent.values.len(), 16);
        assert_eq!(latent.shape, vec![1, 16]);
    }

    #[test]
    fn corrupt_weights_degrade_to_untrained_encoder() {
        let dir = tempfile::TempDir::new().unwrap();
        let tokenizer_path = dir.path().join("tokenizer.json");
        toy_tokenizer(4).inner.save(&tokenizer_path, false).unwrap();
        let weights_path = dir.path().join("encoder.safetensors");
        std::fs::write(&weights_path, b"not a checkpoint").unwrap();

        let config = EncoderConfig {
            latent_dim: 16,
            max_seq_length: 4,
            vocab_size: 8,
        };
        let encoder =
            ContextEncoder::open(config, &tokenizer_path, Some(&weights_path), &Device::Cpu)
                .unwrap();
        assert_eq!(encoder.extract("hello").unwrap().values.len(), 16);
    }

    #[test]
    fn repeated_extraction_is_stochastic() {
        let encoder = toy_encoder(16, 4);
        let a = encoder.extract("hello").unwrap();
        let b = encoder.extract("hello").unwrap();
        assert_eq!(a.shape, b.shape);
        // The reparameterized sample draws fresh noise each call.
        assert_ne!(a.values, b.values);
    }
}
