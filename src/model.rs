use ndarray::{Array1, Array2, ArrayView2};
use safetensors::{Dtype, SafeTensors};
use std::collections::HashSet;

use crate::attention::MultiHeadAttention;
use crate::backend::Precision;
use crate::common::{LayerKVCache, LayerNorm, ModelKVCache};
use crate::config::GPT2Config;
use crate::error::{GenerationError, ModelLoadError};
use crate::linear::Linear;
use crate::mlp::MLP;

#[derive(Debug, Clone)]
pub struct TransformerBlock {
    ln_1: LayerNorm,
    attn: MultiHeadAttention,
    ln_2: LayerNorm,
    mlp: MLP,
}

impl TransformerBlock {
    pub fn forward(&self, hidden_states: ArrayView2<f32>, cache: &mut LayerKVCache) -> Result<Array2<f32>, GenerationError> {
        let attn_output = self.attn.forward(self.ln_1.forward(hidden_states).view(), cache)?;
        let residual = &hidden_states + &attn_output;
        let mlp_output = self.mlp.forward(self.ln_2.forward(residual.view()).view());
        Ok(residual + &mlp_output)
    }
}

/// Source of named f32 tensors. `expected` is the shape the model needs.
pub trait WeightSource {
    fn tensor(&mut self, name: &str, expected: &[usize]) -> Result<Vec<f32>, ModelLoadError>;
}

/// Reads tensors out of a serialized safetensors buffer. Hub checkpoints
/// sometimes prefix names with `transformer.`; both spellings are accepted.
pub struct SafeTensorWeights<'data> {
    tensors: SafeTensors<'data>,
    used: HashSet<String>,
}

impl<'data> SafeTensorWeights<'data> {
    pub fn new(bytes: &'data [u8]) -> Result<Self, ModelLoadError> {
        let tensors = SafeTensors::deserialize(bytes)
            .map_err(|e| ModelLoadError::InvalidConfig(format!("Invalid SafeTensors format: {}", e)))?;
        Ok(Self {
            tensors,
            used: HashSet::new(),
        })
    }

    /// Tensor names that were never requested.
    pub fn unused(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tensors
            .names()
            .into_iter()
            .filter(|name| !self.used.contains(name.as_str()))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

fn le_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    if cfg!(target_endian = "little") {
        if let Ok(floats) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
            return floats.to_vec();
        }
    }
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl WeightSource for SafeTensorWeights<'_> {
    fn tensor(&mut self, name: &str, expected: &[usize]) -> Result<Vec<f32>, ModelLoadError> {
        let prefixed = format!("transformer.{}", name);
        let (key, view) = match self.tensors.tensor(name) {
            Ok(view) => (name.to_string(), view),
            Err(_) => match self.tensors.tensor(&prefixed) {
                Ok(view) => (prefixed, view),
                Err(_) => return Err(ModelLoadError::MissingWeight(name.to_string())),
            },
        };

        if view.dtype() != Dtype::F32 {
            return Err(ModelLoadError::UnsupportedDtype {
                tensor: key,
                dtype: format!("{:?}", view.dtype()),
            });
        }
        if view.shape() != expected {
            return Err(ModelLoadError::ShapeMismatch {
                tensor: key,
                expected: expected.to_vec(),
                actual: view.shape().to_vec(),
            });
        }
        let data = le_bytes_to_f32(view.data());
        self.used.insert(key);
        Ok(data)
    }
}

#[derive(Debug, Clone)]
pub struct GPT2Model {
    config: GPT2Config,
    precision: Precision,
    wte: Array2<f32>,
    wpe: Array2<f32>,
    h: Vec<TransformerBlock>,
    ln_f: LayerNorm,
}

fn matrix(source: &mut dyn WeightSource, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>, ModelLoadError> {
    let data = source.tensor(name, &[rows, cols])?;
    Array2::from_shape_vec((rows, cols), data).map_err(|e| ModelLoadError::ShapeMismatch {
        tensor: format!("{} ({})", name, e),
        expected: vec![rows, cols],
        actual: Vec::new(),
    })
}

fn vector(source: &mut dyn WeightSource, name: &str, len: usize) -> Result<Array1<f32>, ModelLoadError> {
    Ok(Array1::from(source.tensor(name, &[len])?))
}

fn linear(
    source: &mut dyn WeightSource,
    prefix: &str,
    in_features: usize,
    out_features: usize,
    precision: Precision,
) -> Result<Linear, ModelLoadError> {
    let weight = matrix(source, &format!("{}.weight", prefix), in_features, out_features)?;
    let bias = vector(source, &format!("{}.bias", prefix), out_features)?;
    Linear::new(weight, bias, precision)
}

fn layer_norm(source: &mut dyn WeightSource, prefix: &str, n_embd: usize, epsilon: f32) -> Result<LayerNorm, ModelLoadError> {
    Ok(LayerNorm::new(
        vector(source, &format!("{}.weight", prefix), n_embd)?,
        vector(source, &format!("{}.bias", prefix), n_embd)?,
        epsilon,
    ))
}

impl GPT2Model {
    pub fn load(config: &GPT2Config, source: &mut dyn WeightSource, precision: Precision) -> Result<Self, ModelLoadError> {
        config.validate()?;
        let n_embd = config.n_embd;
        let n_inner = config.inner_dim();
        let eps = config.layer_norm_epsilon;

        let wte = matrix(source, "wte.weight", config.vocab_size, n_embd)?;
        let wpe = matrix(source, "wpe.weight", config.n_positions, n_embd)?;

        let mut h = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            let p = format!("h.{}", i);
            h.push(TransformerBlock {
                ln_1: layer_norm(source, &format!("{}.ln_1", p), n_embd, eps)?,
                attn: MultiHeadAttention::new(
                    linear(source, &format!("{}.attn.c_attn", p), n_embd, 3 * n_embd, precision)?,
                    linear(source, &format!("{}.attn.c_proj", p), n_embd, n_embd, precision)?,
                    config.n_head,
                ),
                ln_2: layer_norm(source, &format!("{}.ln_2", p), n_embd, eps)?,
                mlp: MLP::new(
                    linear(source, &format!("{}.mlp.c_fc", p), n_embd, n_inner, precision)?,
                    linear(source, &format!("{}.mlp.c_proj", p), n_inner, n_embd, precision)?,
                ),
            });
        }
        let ln_f = layer_norm(source, "ln_f", n_embd, eps)?;

        Ok(Self {
            config: config.clone(),
            precision,
            wte,
            wpe,
            h,
            ln_f,
        })
    }

    pub fn from_safetensors(config: &GPT2Config, bytes: &[u8], precision: Precision) -> Result<Self, ModelLoadError> {
        let mut weights = SafeTensorWeights::new(bytes)?;
        let model = Self::load(config, &mut weights, precision)?;
        let unused = weights.unused();
        if !unused.is_empty() {
            // attention bias buffers and the tied lm_head show up here
            log::debug!("Unused weights: {:?}", unused);
        }
        Ok(model)
    }

    pub fn config(&self) -> &GPT2Config {
        &self.config
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn new_cache(&self) -> ModelKVCache {
        (0..self.config.n_layer).map(|_| LayerKVCache::new(self.config.n_embd)).collect()
    }

    /// Runs `token_ids` (the positions after those already in `cache`) and
    /// returns the next-token logits for the last of them.
    pub fn forward(&self, token_ids: &[u32], cache: &mut ModelKVCache) -> Result<Vec<f32>, GenerationError> {
        if token_ids.is_empty() {
            return Err(GenerationError::InvalidInput("Token IDs cannot be empty.".to_string()));
        }
        if cache.len() != self.h.len() {
            return Err(GenerationError::InvalidInput(format!(
                "KV cache has {} layers, model has {}",
                cache.len(),
                self.h.len()
            )));
        }

        let past_len = cache.first().map(LayerKVCache::len).unwrap_or(0);
        let total = past_len + token_ids.len();
        if total > self.config.n_positions {
            return Err(GenerationError::ContextOverflow {
                requested: total,
                limit: self.config.n_positions,
            });
        }

        let mut x = Array2::<f32>::zeros((token_ids.len(), self.config.n_embd));
        for (i, &id) in token_ids.iter().enumerate() {
            if id as usize >= self.config.vocab_size {
                return Err(GenerationError::TokenOutOfRange {
                    token: id,
                    vocab_size: self.config.vocab_size,
                });
            }
            let embedded = &self.wte.row(id as usize) + &self.wpe.row(past_len + i);
            x.row_mut(i).assign(&embedded);
        }

        for (block, layer_cache) in self.h.iter().zip(cache.iter_mut()) {
            x = block.forward(x.view(), layer_cache)?;
        }
        let x = self.ln_f.forward(x.view());

        // lm_head is tied to the token embedding
        let last = x.row(x.nrows() - 1);
        Ok(self.wte.dot(&last).to_vec())
    }
}
