//! # Generation Request Builder
//!
//! Validates the prompt and the sampling parameters and assembles an
//! immutable `GenerationRequest`.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::RangeInclusive;

use crate::backend::SamplingConfig;
use crate::error::ValidationError;

pub const MAX_LENGTH_RANGE: RangeInclusive<usize> = 50..=500;
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.1..=1.0;
pub const TOP_K_RANGE: RangeInclusive<usize> = 1..=100;

pub const DEFAULT_MAX_LENGTH: usize = 150;
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_TOP_K: usize = 50;
pub const DEFAULT_SEED: i64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub max_length: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub seed: i64,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            temperature: DEFAULT_TEMPERATURE,
            top_k: DEFAULT_TOP_K,
            seed: DEFAULT_SEED,
        }
    }
}

fn check_range<T>(field: &'static str, value: T, range: &RangeInclusive<T>) -> Result<(), ValidationError>
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            min: range.start().to_string(),
            max: range.end().to_string(),
        })
    }
}

impl GenerationParameters {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("Max length", self.max_length, &MAX_LENGTH_RANGE)?;
        check_range("Temperature", self.temperature, &TEMPERATURE_RANGE)?;
        check_range("Top-K", self.top_k, &TOP_K_RANGE)?;
        Ok(())
    }

    /// Sampling-mode settings for a single returned sequence.
    pub fn sampling_config(&self) -> SamplingConfig {
        SamplingConfig {
            max_length: self.max_length,
            temperature: self.temperature,
            top_k: self.top_k,
            seed: self.seed,
            do_sample: true,
            num_return_sequences: 1,
        }
    }
}

/// A prompt that is known to contain something other than whitespace.
/// The text is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn new(text: impl Into<String>) -> Result<Self, ValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: Prompt,
    pub parameters: GenerationParameters,
}

pub fn build(prompt: &str, params: GenerationParameters) -> Result<GenerationRequest, ValidationError> {
    let prompt = Prompt::new(prompt)?;
    params.validate()?;
    Ok(GenerationRequest {
        prompt,
        parameters: params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with(f: impl FnOnce(&mut GenerationParameters)) -> GenerationParameters {
        let mut params = GenerationParameters::default();
        f(&mut params);
        params
    }

    #[test]
    fn test_rejects_empty_and_blank_prompts() {
        assert_eq!(build("", GenerationParameters::default()), Err(ValidationError::EmptyPrompt));
        assert_eq!(build("  \n\t ", GenerationParameters::default()), Err(ValidationError::EmptyPrompt));
    }

    #[test]
    fn test_rejects_out_of_range_parameters() {
        let rejected = [
            with(|p| p.max_length = 49),
            with(|p| p.max_length = 501),
            with(|p| p.temperature = 0.0),
            with(|p| p.temperature = 1.01),
            with(|p| p.top_k = 0),
            with(|p| p.top_k = 101),
            with(|p| p.temperature = f32::NAN),
        ];
        for params in rejected {
            let result = build("AI:", params);
            assert!(
                matches!(result, Err(ValidationError::OutOfRange { .. })),
                "expected rejection for {:?}",
                params
            );
        }
    }

    #[test]
    fn test_accepts_boundaries() {
        let accepted = [
            with(|p| p.max_length = 50),
            with(|p| p.max_length = 500),
            with(|p| p.temperature = 0.1),
            with(|p| p.temperature = 1.0),
            with(|p| p.top_k = 1),
            with(|p| p.top_k = 100),
        ];
        for params in accepted {
            assert!(build("AI:", params).is_ok(), "expected acceptance for {:?}", params);
        }
    }

    #[test]
    fn test_prompt_checked_before_parameters() {
        let params = with(|p| p.top_k = 0);
        assert_eq!(build(" ", params), Err(ValidationError::EmptyPrompt));
    }

    #[test]
    fn test_out_of_range_message() {
        let err = build("AI:", with(|p| p.max_length = 501)).unwrap_err();
        assert_eq!(err.to_string(), "Max length must be between 50 and 500, got 501");
    }

    #[test]
    fn test_prompt_kept_verbatim() {
        let request = build("  INT. DAY\n", GenerationParameters::default()).unwrap();
        assert_eq!(request.prompt.as_str(), "  INT. DAY\n");
    }

    #[test]
    fn test_sampling_config_is_single_sampled_sequence() {
        let cfg = GenerationParameters::default().sampling_config();
        assert!(cfg.do_sample);
        assert_eq!(cfg.num_return_sequences, 1);
        assert_eq!(cfg.max_length, 150);
        assert_eq!(cfg.seed, 42);
    }

    proptest! {
        #[test]
        fn prop_in_range_parameters_accepted(
            max_length in 50usize..=500,
            temperature in 0.1f32..=1.0,
            top_k in 1usize..=100,
            seed in any::<i64>(),
        ) {
            let params = GenerationParameters { max_length, temperature, top_k, seed };
            prop_assert!(build("Write a haiku", params).is_ok());
        }

        #[test]
        fn prop_whitespace_prompts_rejected(prompt in "[ \t\r\n]*") {
            prop_assert_eq!(build(&prompt, GenerationParameters::default()), Err(ValidationError::EmptyPrompt));
        }
    }
}
