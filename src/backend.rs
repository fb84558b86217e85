//! Boundary between the studio and whatever actually runs a language model.
//!
//! The resolver and invoker only ever see `ModelProvider` and `TextBackend`;
//! the local GPT-2 implementation lives in `provider`.

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, ModelLoadError};

/// The user-facing model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelChoice {
    Fast,
    HighQuality,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 2] = [ModelChoice::Fast, ModelChoice::HighQuality];

    pub fn label(&self) -> &'static str {
        match self {
            ModelChoice::Fast => "Fast",
            ModelChoice::HighQuality => "High Quality",
        }
    }

    /// Name used in forms and on the command line.
    pub fn key(&self) -> &'static str {
        match self {
            ModelChoice::Fast => "fast",
            ModelChoice::HighQuality => "high-quality",
        }
    }
}

impl Default for ModelChoice {
    fn default() -> Self {
        ModelChoice::Fast
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    /// Linear layers stored as blocks of i8 with one f32 scale per block.
    Int8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePolicy {
    /// Load unconditionally on the host CPU.
    Cpu,
    /// Check the available memory first and refuse to load if it will not fit.
    Auto,
}

/// Concrete backend a `ModelChoice` maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendSpec {
    pub model_id: String,
    pub precision: Precision,
    pub device: DevicePolicy,
}

impl BackendSpec {
    pub fn new(model_id: impl Into<String>, precision: Precision, device: DevicePolicy) -> Self {
        Self {
            model_id: model_id.into(),
            precision,
            device,
        }
    }
}

impl fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = match self.precision {
            Precision::F32 => "f32",
            Precision::Int8 => "8-bit",
        };
        write!(f, "{} ({})", self.model_id, precision)
    }
}

/// Sampling controls handed to a backend for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Prompt plus continuation, in tokens.
    pub max_length: usize,
    pub temperature: f32,
    pub top_k: usize,
    /// The backend seeds its RNG from this value at the start of the call.
    pub seed: i64,
    pub do_sample: bool,
    pub num_return_sequences: usize,
}

pub trait TextBackend: Send + Sync {
    /// Returns the full generated text (prompt plus continuation).
    fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String, GenerationError>;
}

pub trait ModelProvider: Send + Sync {
    fn load(&self, spec: &BackendSpec) -> Result<Arc<dyn TextBackend>, ModelLoadError>;
}

/// A loaded backend together with the spec it was loaded from.
#[derive(Clone)]
pub struct ModelHandle {
    spec: BackendSpec,
    backend: Arc<dyn TextBackend>,
}

impl ModelHandle {
    pub fn new(spec: BackendSpec, backend: Arc<dyn TextBackend>) -> Self {
        Self { spec, backend }
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub fn backend(&self) -> &dyn TextBackend {
        self.backend.as_ref()
    }

    /// True when both handles share the same loaded backend.
    pub fn same_instance(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl PartialEq for ModelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle").field("spec", &self.spec).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(&'static str);

    impl TextBackend for Constant {
        fn generate(&self, _prompt: &str, _sampling: &SamplingConfig) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_handle_equality_is_by_spec() {
        let spec = BackendSpec::new("gpt2-medium", Precision::F32, DevicePolicy::Cpu);
        let a = ModelHandle::new(spec.clone(), Arc::new(Constant("a")));
        let b = ModelHandle::new(spec, Arc::new(Constant("b")));
        assert_eq!(a, b);
        assert!(!a.same_instance(&b));
        assert!(a.same_instance(&a.clone()));
    }

    #[test]
    fn test_choice_serde_names() {
        let parsed: ModelChoice = serde_json::from_str("\"high-quality\"").unwrap();
        assert_eq!(parsed, ModelChoice::HighQuality);
        assert_eq!(serde_json::to_string(&ModelChoice::Fast).unwrap(), "\"fast\"");
        assert_eq!(ModelChoice::HighQuality.key(), "high-quality");
    }

    #[test]
    fn test_spec_display() {
        let spec = BackendSpec::new("gpt2-xl", Precision::Int8, DevicePolicy::Auto);
        assert_eq!(spec.to_string(), "gpt2-xl (8-bit)");
    }
}
