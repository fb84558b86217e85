#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use creative_text_studio::backend::{BackendSpec, DevicePolicy, ModelProvider, Precision, SamplingConfig, TextBackend};
use creative_text_studio::error::{GenerationError, ModelLoadError};
use creative_text_studio::resolver::{ModelCatalog, ModelResolver};
use creative_text_studio::session::Session;
use creative_text_studio::system_resources::{DeviceMemory, MemorySnapshot};

pub const GB: u64 = 1024 * 1024 * 1024;

/// Appends a continuation that depends only on the model id and the seed.
pub struct ScriptedBackend {
    pub model_id: String,
    pub fail_generation: bool,
}

impl TextBackend for ScriptedBackend {
    fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String, GenerationError> {
        if self.fail_generation {
            return Err(GenerationError::Backend("device lost".to_string()));
        }
        Ok(format!(
            "{}\n<{}> seed={} max_length={}",
            prompt, self.model_id, sampling.seed, sampling.max_length
        ))
    }
}

#[derive(Default)]
pub struct FakeProvider {
    pub loads: AtomicUsize,
    pub loaded: Mutex<Vec<BackendSpec>>,
    pub fail_quantized: bool,
    pub fail_everything: bool,
    pub fail_generation: bool,
}

impl FakeProvider {
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn loaded_specs(&self) -> Vec<BackendSpec> {
        self.loaded.lock().unwrap().clone()
    }
}

impl ModelProvider for FakeProvider {
    fn load(&self, spec: &BackendSpec) -> Result<Arc<dyn TextBackend>, ModelLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded.lock().unwrap().push(spec.clone());
        if self.fail_everything || (self.fail_quantized && spec.precision == Precision::Int8) {
            return Err(ModelLoadError::InsufficientMemory {
                required_bytes: 8 * GB,
                available_bytes: GB,
            });
        }
        Ok(Arc::new(ScriptedBackend {
            model_id: spec.model_id.clone(),
            fail_generation: self.fail_generation,
        }))
    }
}

#[derive(Default)]
pub struct FakeMemory {
    pub releases: AtomicUsize,
}

impl DeviceMemory for FakeMemory {
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            total_bytes: 16 * GB,
            available_bytes: 12 * GB,
        }
    }

    fn release_cache(&self) -> MemorySnapshot {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.snapshot()
    }
}

pub fn catalog() -> ModelCatalog {
    ModelCatalog {
        fast: BackendSpec::new("gpt2-medium", Precision::F32, DevicePolicy::Cpu),
        high_quality: BackendSpec::new("gpt2-xl", Precision::Int8, DevicePolicy::Auto),
    }
}

pub fn session(provider: Arc<FakeProvider>, memory: Arc<FakeMemory>) -> Session {
    let resolver = ModelResolver::new(provider, catalog());
    Session::new(Arc::new(resolver), memory)
}
