//! Local GPT-2 provider: loads a model directory from disk and runs it on the
//! host CPU.
//!
//! A model directory `<models_dir>/<model_id>/` holds `config.json`,
//! `model.safetensors` (F32 weights) and `tokenizer.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{BackendSpec, DevicePolicy, ModelProvider, Precision, SamplingConfig, TextBackend};
use crate::config::GPT2Config;
use crate::error::{GenerationError, ModelLoadError};
use crate::model::GPT2Model;
use crate::system_resources::DeviceMemory;
use crate::text_generator;
use crate::tokenizer::GPT2Tokenizer;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub struct Gpt2Backend {
    model: GPT2Model,
    tokenizer: GPT2Tokenizer,
    eos_token_id: Option<u32>,
}

impl Gpt2Backend {
    pub fn new(model: GPT2Model, tokenizer: GPT2Tokenizer) -> Self {
        let eos_token_id = tokenizer.eos_token_id().or(model.config().eos_token_id);
        Self {
            model,
            tokenizer,
            eos_token_id,
        }
    }

    /// Text added after the prompt. The prompt itself is never re-decoded
    /// into the output, so special or unknown tokens in it survive verbatim.
    fn decode_continuation(&self, input_ids: &[u32], output_ids: &[u32]) -> Result<String, GenerationError> {
        if output_ids.len() <= input_ids.len() {
            return Ok(String::new());
        }
        // Decoding the whole sequence keeps the separator between the prompt
        // and the first new token for tokenizers that insert one.
        let full = self.tokenizer.decode(output_ids)?;
        let decoded_prompt = self.tokenizer.decode(input_ids)?;
        match full.strip_prefix(decoded_prompt.as_str()) {
            Some(rest) => Ok(rest.to_string()),
            None => self.tokenizer.decode(&output_ids[input_ids.len()..]),
        }
    }
}

impl TextBackend for Gpt2Backend {
    fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String, GenerationError> {
        let input_ids = self.tokenizer.encode(prompt)?;
        if input_ids.is_empty() {
            return Err(GenerationError::InvalidInput("Prompt produced no tokens".to_string()));
        }

        let output_ids = text_generator::generate(&self.model, &input_ids, sampling, self.eos_token_id)?;
        let continuation = self.decode_continuation(&input_ids, &output_ids)?;
        Ok(format!("{}{}", prompt, continuation))
    }
}

/// Loads GPT-2 checkpoints from `models_dir`.
pub struct LocalModelProvider {
    models_dir: PathBuf,
    memory: Arc<dyn DeviceMemory>,
}

/// Rough resident size of a loaded model, given its F32 checkpoint size.
/// Quantized linear layers take a little over a quarter of their F32 bytes;
/// the embeddings stay F32.
fn estimate_resident_bytes(config: &GPT2Config, checkpoint_bytes: u64, precision: Precision) -> u64 {
    match precision {
        Precision::F32 => checkpoint_bytes,
        Precision::Int8 => {
            let embedding_bytes = ((config.vocab_size + config.n_positions) * config.n_embd * 4) as u64;
            let linear_bytes = checkpoint_bytes.saturating_sub(embedding_bytes);
            embedding_bytes + linear_bytes * 9 / 32
        }
    }
}

impl LocalModelProvider {
    pub fn new(models_dir: impl Into<PathBuf>, memory: Arc<dyn DeviceMemory>) -> Self {
        Self {
            models_dir: models_dir.into(),
            memory,
        }
    }

    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(model_id)
    }

    fn preflight(&self, spec: &BackendSpec, config: &GPT2Config, weights_path: &Path) -> Result<(), ModelLoadError> {
        if spec.device != DevicePolicy::Auto {
            return Ok(());
        }
        let checkpoint_bytes = std::fs::metadata(weights_path)
            .map_err(|source| ModelLoadError::Io {
                path: weights_path.to_path_buf(),
                source,
            })?
            .len();
        // the raw checkpoint is held in memory while the layers are built
        let required_bytes = checkpoint_bytes + estimate_resident_bytes(config, checkpoint_bytes, spec.precision);
        let snapshot = self.memory.snapshot();
        log::info!(
            "Memory check for {}: need ~{:.2} GB, {:.2} GB available",
            spec,
            required_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            snapshot.available_gb()
        );
        if required_bytes > snapshot.available_bytes {
            return Err(ModelLoadError::InsufficientMemory {
                required_bytes,
                available_bytes: snapshot.available_bytes,
            });
        }
        Ok(())
    }

    pub fn load_backend(&self, spec: &BackendSpec) -> Result<Gpt2Backend, ModelLoadError> {
        let dir = self.model_dir(&spec.model_id);
        if !dir.is_dir() {
            return Err(ModelLoadError::NotFound(dir));
        }
        let start = Instant::now();

        let config = GPT2Config::load(dir.join(CONFIG_FILE))?;
        let weights_path = dir.join(WEIGHTS_FILE);
        if !weights_path.exists() {
            return Err(ModelLoadError::NotFound(weights_path));
        }
        self.preflight(spec, &config, &weights_path)?;

        let tokenizer = GPT2Tokenizer::from_file(&dir.join(TOKENIZER_FILE))?;
        if let Some(eos) = tokenizer.eos_token_id() {
            if eos as usize >= config.vocab_size {
                return Err(ModelLoadError::InvalidConfig(format!(
                    "tokenizer end-of-text id {} is outside the model vocabulary of {}",
                    eos, config.vocab_size
                )));
            }
        }

        let bytes = std::fs::read(&weights_path).map_err(|source| ModelLoadError::Io {
            path: weights_path.clone(),
            source,
        })?;
        let model = GPT2Model::from_safetensors(&config, &bytes, spec.precision)?;
        drop(bytes);

        log::info!(
            "Loaded {} ({} layers, {} heads, n_embd {}) in {:.2}s",
            spec,
            config.n_layer,
            config.n_head,
            config.n_embd,
            start.elapsed().as_secs_f64()
        );
        Ok(Gpt2Backend::new(model, tokenizer))
    }
}

impl ModelProvider for LocalModelProvider {
    fn load(&self, spec: &BackendSpec) -> Result<Arc<dyn TextBackend>, ModelLoadError> {
        log::info!("Loading {} from {}", spec, self.models_dir.display());
        let backend = self.load_backend(spec)?;
        Ok(Arc::new(backend))
    }
}
