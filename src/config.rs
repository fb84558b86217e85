use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::backend::{BackendSpec, DevicePolicy, Precision};
use crate::error::{ConfigError, ModelLoadError};
use crate::resolver::ModelCatalog;

fn default_layer_norm_epsilon() -> f32 {
    1e-5
}

fn default_activation_function() -> String {
    "gelu_new".to_string()
}

fn default_model_type() -> String {
    "gpt2".to_string()
}

/// Hyper-parameters read from a model directory's `config.json`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GPT2Config {
    pub vocab_size: usize,
    #[serde(alias = "max_position_embeddings")]
    pub n_positions: usize,
    #[serde(alias = "hidden_size")]
    pub n_embd: usize,
    #[serde(alias = "num_hidden_layers")]
    pub n_layer: usize,
    #[serde(alias = "num_attention_heads")]
    pub n_head: usize,
    #[serde(default)]
    pub n_inner: Option<usize>,
    #[serde(default = "default_activation_function")]
    pub activation_function: String,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f32,
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
    #[serde(default = "default_model_type")]
    pub model_type: String,
}

impl GPT2Config {
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Err(ModelLoadError::NotFound(config_path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(config_path).map_err(|source| ModelLoadError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;

        let config: GPT2Config = serde_json::from_str(&contents).map_err(|e| {
            ModelLoadError::InvalidConfig(format!("{}: {}", config_path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ModelLoadError> {
        if self.model_type != "gpt2" {
            return Err(ModelLoadError::UnsupportedArchitecture(self.model_type.clone()));
        }
        if !matches!(self.activation_function.as_str(), "gelu_new" | "gelu") {
            return Err(ModelLoadError::UnsupportedArchitecture(format!(
                "activation {}",
                self.activation_function
            )));
        }
        if self.n_head == 0 || self.n_embd % self.n_head != 0 {
            return Err(ModelLoadError::InvalidConfig(format!(
                "n_embd {} is not divisible by n_head {}",
                self.n_embd, self.n_head
            )));
        }
        if self.vocab_size == 0 || self.n_positions == 0 || self.n_layer == 0 {
            return Err(ModelLoadError::InvalidConfig(
                "vocab_size, n_positions and n_layer must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    pub fn inner_dim(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served under `/static`.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            static_dir: PathBuf::from("./src/ui/static"),
        }
    }
}

/// Studio settings. Every field has a default, so a config file only needs
/// the keys it wants to change.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StudioConfig {
    pub server: ServerConfig,
    /// Parent directory holding one sub-directory per `model_id`.
    pub models_dir: PathBuf,
    pub fast: BackendSpec,
    pub high_quality: BackendSpec,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            models_dir: PathBuf::from("models"),
            fast: BackendSpec::new("gpt2-medium", Precision::F32, DevicePolicy::Cpu),
            high_quality: BackendSpec::new("gpt2-xl", Precision::Int8, DevicePolicy::Auto),
        }
    }
}

impl StudioConfig {
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }

        let mut file = File::open(config_path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: StudioConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise falls back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog {
            fast: self.fast.clone(),
            high_quality: self.high_quality.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"port": 9000}}, "high_quality": {{"model_id": "gpt2-large", "precision": "int8", "device": "cpu"}}}}"#
        )
        .unwrap();

        let config = StudioConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.models_dir, PathBuf::from("models"));
        assert_eq!(config.fast.model_id, "gpt2-medium");
        assert_eq!(config.high_quality.model_id, "gpt2-large");
        assert_eq!(config.high_quality.device, DevicePolicy::Cpu);
    }

    #[test]
    fn test_missing_file() {
        let err = StudioConfig::load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"server\": ").unwrap();
        assert!(matches!(StudioConfig::load(file.path()), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_gpt2_config_from_hub_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"activation_function": "gelu_new", "architectures": ["GPT2LMHeadModel"],
                "bos_token_id": 50256, "eos_token_id": 50256, "layer_norm_epsilon": 1e-05,
                "model_type": "gpt2", "n_ctx": 1024, "n_embd": 1024, "n_head": 16,
                "n_inner": null, "n_layer": 24, "n_positions": 1024, "vocab_size": 50257}"#,
        )
        .unwrap();

        let config = GPT2Config::load(&path).unwrap();
        assert_eq!(config.n_layer, 24);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.inner_dim(), 4096);
        assert_eq!(config.eos_token_id, Some(50256));
    }

    #[test]
    fn test_gpt2_config_rejects_other_architectures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"model_type": "gptj", "n_embd": 4096, "n_head": 16, "n_layer": 28,
                "n_positions": 2048, "vocab_size": 50400, "activation_function": "gelu_new"}"#,
        )
        .unwrap();
        assert!(matches!(
            GPT2Config::load(&path),
            Err(ModelLoadError::UnsupportedArchitecture(arch)) if arch == "gptj"
        ));
    }

    #[test]
    fn test_no_path_uses_defaults() {
        let config = StudioConfig::load_or_default(None).unwrap();
        assert_eq!(config, StudioConfig::default());
        assert_eq!(config.catalog().high_quality.precision, Precision::Int8);
    }
}
