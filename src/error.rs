//! Error types for the studio.
//!
//! One enum per concern: loading a backend, validating user input, running a
//! generation, and reading the studio configuration. `ActionError` is what a
//! single user action can fail with.

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ModelLoadError {
    NotFound(PathBuf),
    Io { path: PathBuf, source: io::Error },
    InvalidConfig(String),
    UnsupportedArchitecture(String),
    UnsupportedDtype { tensor: String, dtype: String },
    MissingWeight(String),
    ShapeMismatch { tensor: String, expected: Vec<usize>, actual: Vec<usize> },
    Quantization(String),
    Tokenizer(String),
    InsufficientMemory { required_bytes: u64, available_bytes: u64 },
    /// The high-quality backend failed and so did the fallback.
    FallbackFailed {
        primary: Box<ModelLoadError>,
        fallback: Box<ModelLoadError>,
    },
}

impl fmt::Display for ModelLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelLoadError::NotFound(path) => write!(f, "Model files not found at: {}", path.display()),
            ModelLoadError::Io { path, source } => write!(f, "Failed to read {}: {}", path.display(), source),
            ModelLoadError::InvalidConfig(s) => write!(f, "Invalid model config: {}", s),
            ModelLoadError::UnsupportedArchitecture(s) => write!(f, "Unsupported model architecture '{}'", s),
            ModelLoadError::UnsupportedDtype { tensor, dtype } => {
                write!(f, "Unsupported dtype '{}' for tensor '{}'. Only F32 is supported.", dtype, tensor)
            }
            ModelLoadError::MissingWeight(name) => write!(f, "Weight '{}' missing from checkpoint", name),
            ModelLoadError::ShapeMismatch { tensor, expected, actual } => write!(
                f,
                "Weight {} shape mismatch: expected {:?}, got {:?}",
                tensor, expected, actual
            ),
            ModelLoadError::Quantization(s) => write!(f, "Quantization failed: {}", s),
            ModelLoadError::Tokenizer(s) => write!(f, "Failed to load tokenizer: {}", s),
            ModelLoadError::InsufficientMemory { required_bytes, available_bytes } => write!(
                f,
                "Insufficient memory: need about {:.1} GB, {:.1} GB available",
                *required_bytes as f64 / 1e9,
                *available_bytes as f64 / 1e9
            ),
            ModelLoadError::FallbackFailed { primary, fallback } => write!(
                f,
                "High quality model failed ({}) and the fallback model failed too ({})",
                primary, fallback
            ),
        }
    }
}

impl std::error::Error for ModelLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelLoadError::Io { source, .. } => Some(source),
            ModelLoadError::FallbackFailed { fallback, .. } => Some(fallback.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyPrompt,
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyPrompt => write!(f, "Please enter a prompt"),
            ValidationError::OutOfRange { field, value, min, max } => {
                write!(f, "{} must be between {} and {}, got {}", field, min, max, value)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum GenerationError {
    Tokenizer(String),
    InvalidInput(String),
    ContextOverflow { requested: usize, limit: usize },
    TokenOutOfRange { token: u32, vocab_size: usize },
    Backend(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Tokenizer(s) => write!(f, "Tokenizer error: {}", s),
            GenerationError::InvalidInput(s) => write!(f, "Invalid input: {}", s),
            GenerationError::ContextOverflow { requested, limit } => write!(
                f,
                "Sequence of {} tokens exceeds the model context of {}",
                requested, limit
            ),
            GenerationError::TokenOutOfRange { token, vocab_size } => {
                write!(f, "Token ID {} out of vocab size {}", token, vocab_size)
            }
            GenerationError::Backend(s) => write!(f, "Backend error: {}", s),
        }
    }
}

impl std::error::Error for GenerationError {}

#[derive(Debug)]
pub enum ConfigError {
    NotFound(PathBuf),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotFound(path) => write!(f, "Config file not found at: {}", path.display()),
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Json(e) => write!(f, "Failed to deserialize config JSON: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::NotFound(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> ConfigError {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> ConfigError {
        ConfigError::Json(err)
    }
}

/// Everything a single "Generate" action can fail with.
#[derive(Debug)]
pub enum ActionError {
    Validation(ValidationError),
    ModelLoad(ModelLoadError),
    Generation(GenerationError),
}

impl ActionError {
    /// Validation problems are the user's to fix; the others are faults.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ActionError::Validation(_))
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::Validation(e) => write!(f, "{}", e),
            ActionError::ModelLoad(e) => write!(f, "Failed to load model: {}", e),
            ActionError::Generation(e) => write!(f, "Generation failed: {}", e),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActionError::Validation(e) => Some(e),
            ActionError::ModelLoad(e) => Some(e),
            ActionError::Generation(e) => Some(e),
        }
    }
}

impl From<ValidationError> for ActionError {
    fn from(err: ValidationError) -> ActionError {
        ActionError::Validation(err)
    }
}

impl From<ModelLoadError> for ActionError {
    fn from(err: ModelLoadError) -> ActionError {
        ActionError::ModelLoad(err)
    }
}

impl From<GenerationError> for ActionError {
    fn from(err: GenerationError) -> ActionError {
        ActionError::Generation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_fallback_failure_reports_both_causes() {
        let err = ModelLoadError::FallbackFailed {
            primary: Box::new(ModelLoadError::UnsupportedArchitecture("gptj".to_string())),
            fallback: Box::new(ModelLoadError::NotFound(PathBuf::from("models/gpt2-medium"))),
        };
        let msg = err.to_string();
        assert!(msg.contains("gptj"));
        assert!(msg.contains("models/gpt2-medium"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_action_error_classification() {
        assert!(ActionError::from(ValidationError::EmptyPrompt).is_user_error());
        assert!(!ActionError::from(GenerationError::Backend("oom".to_string())).is_user_error());
        assert_eq!(ActionError::from(ValidationError::EmptyPrompt).to_string(), "Please enter a prompt");
    }
}
