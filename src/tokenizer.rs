use std::path::Path;
use tokenizers::Tokenizer;

use crate::error::{GenerationError, ModelLoadError};

pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Thin wrapper over a HuggingFace `tokenizer.json`.
#[derive(Debug, Clone)]
pub struct GPT2Tokenizer {
    tokenizer: Tokenizer,
}

impl GPT2Tokenizer {
    pub fn from_file(tokenizer_path: &Path) -> Result<Self, ModelLoadError> {
        if !tokenizer_path.exists() {
            return Err(ModelLoadError::NotFound(tokenizer_path.to_path_buf()));
        }
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ModelLoadError::Tokenizer(format!("{}: {}", tokenizer_path.display(), e)))?;
        Ok(Self { tokenizer })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>, GenerationError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| GenerationError::Tokenizer(format!("Encoding failed: {}", e)))?;
        let ids = encoding.get_ids().to_vec();
        #[cfg(feature = "tokenizer-debug-logs")]
        log::debug!("encoded {:?} -> {:?}", text, ids);
        Ok(ids)
    }

    /// Decodes `ids`, dropping special tokens such as `<|endoftext|>`.
    pub fn decode(&self, ids: &[u32]) -> Result<String, GenerationError> {
        #[cfg(feature = "tokenizer-debug-logs")]
        log::debug!("decoding {:?}", ids);
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| GenerationError::Tokenizer(format!("Decoding failed for {} ids: {}", ids.len(), e)))
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.token_id(END_OF_TEXT)
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}
