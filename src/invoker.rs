//! # Generation Invoker
//!
//! Runs one `GenerationRequest` against a loaded handle and times it.
//! Failures are passed straight back; there is no retry.

use std::time::Instant;

use crate::backend::ModelHandle;
use crate::error::GenerationError;
use crate::presenter::GenerationResult;
use crate::request::GenerationRequest;

pub fn generate(handle: &ModelHandle, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
    let sampling = request.parameters.sampling_config();
    log::debug!(
        "Generating with {} (max_length={}, temperature={}, top_k={}, seed={})",
        handle.spec(),
        sampling.max_length,
        sampling.temperature,
        sampling.top_k,
        sampling.seed
    );

    let start = Instant::now();
    let generated_text = handle.backend().generate(request.prompt.as_str(), &sampling)?;
    let elapsed = start.elapsed();

    log::info!("Generated {} chars with {} in {:.2}s", generated_text.len(), handle.spec(), elapsed.as_secs_f64());
    Ok(GenerationResult { generated_text, elapsed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendSpec, DevicePolicy, Precision, SamplingConfig, TextBackend};
    use crate::request::{build, GenerationParameters};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::{Arc, Mutex};

    /// Appends seed-dependent words and records what it was called with.
    #[derive(Default)]
    struct SeededEcho {
        calls: Mutex<Vec<SamplingConfig>>,
    }

    impl TextBackend for SeededEcho {
        fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String, GenerationError> {
            self.calls.lock().unwrap().push(sampling.clone());
            let mut rng = StdRng::seed_from_u64(sampling.seed as u64);
            let words: Vec<String> = (0..5).map(|_| rng.gen_range(0..1000).to_string()).collect();
            Ok(format!("{} {}", prompt, words.join(" ")))
        }
    }

    struct Failing;

    impl TextBackend for Failing {
        fn generate(&self, _prompt: &str, _sampling: &SamplingConfig) -> Result<String, GenerationError> {
            Err(GenerationError::Backend("out of memory".to_string()))
        }
    }

    fn handle(backend: Arc<dyn TextBackend>) -> ModelHandle {
        ModelHandle::new(BackendSpec::new("echo", Precision::F32, DevicePolicy::Cpu), backend)
    }

    #[test]
    fn test_passes_sampling_settings() {
        let backend = Arc::new(SeededEcho::default());
        let handle = handle(backend.clone());
        let params = GenerationParameters {
            max_length: 200,
            temperature: 0.5,
            top_k: 10,
            seed: 7,
        };
        generate(&handle, &build("Hello", params).unwrap()).unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            SamplingConfig {
                max_length: 200,
                temperature: 0.5,
                top_k: 10,
                seed: 7,
                do_sample: true,
                num_return_sequences: 1,
            }
        );
    }

    #[test]
    fn test_identical_seed_identical_text() {
        let handle = handle(Arc::new(SeededEcho::default()));
        let request = build("AI:", GenerationParameters::default()).unwrap();
        let a = generate(&handle, &request).unwrap();
        let b = generate(&handle, &request).unwrap();
        assert_eq!(a.generated_text, b.generated_text);
        assert!(a.generated_text.starts_with("AI:"));

        let other_seed = build("AI:", GenerationParameters { seed: 43, ..Default::default() }).unwrap();
        assert_ne!(generate(&handle, &other_seed).unwrap().generated_text, a.generated_text);
    }

    #[test]
    fn test_backend_failure_surfaces() {
        let handle = handle(Arc::new(Failing));
        let request = build("AI:", GenerationParameters::default()).unwrap();
        assert!(matches!(generate(&handle, &request), Err(GenerationError::Backend(_))));
    }
}
