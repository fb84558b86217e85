use crate::backend::SamplingConfig;
use crate::error::GenerationError;
use crate::model::GPT2Model;
use crate::sampling::Sampler;

/// Extends `input_ids` one token at a time until the sequence holds
/// `sampling.max_length` tokens (capped at the model context) or
/// `eos_token_id` is produced. The returned ids include the prompt.
///
/// A prompt that already fills the budget comes back unchanged.
pub fn generate(
    model: &GPT2Model,
    input_ids: &[u32],
    sampling: &SamplingConfig,
    eos_token_id: Option<u32>,
) -> Result<Vec<u32>, GenerationError> {
    if input_ids.is_empty() {
        return Err(GenerationError::InvalidInput("Input IDs cannot be empty.".to_string()));
    }
    if sampling.max_length == 0 {
        return Err(GenerationError::InvalidInput("Max length must be greater than 0.".to_string()));
    }
    if sampling.num_return_sequences != 1 {
        return Err(GenerationError::InvalidInput(format!(
            "Only one sequence per call is supported, got {}.",
            sampling.num_return_sequences
        )));
    }

    let limit = sampling.max_length.min(model.config().n_positions);
    if input_ids.len() >= limit {
        log::debug!("Prompt of {} tokens already reaches the limit of {}", input_ids.len(), limit);
        return Ok(input_ids.to_vec());
    }

    let mut sampler = Sampler::new(sampling);
    let mut cache = model.new_cache();
    let mut generated_ids = input_ids.to_vec();
    let mut pending: Vec<u32> = input_ids.to_vec();

    while generated_ids.len() < limit {
        let mut logits = model.forward(&pending, &mut cache)?;
        let next_token_id = sampler.next_token(&mut logits);
        generated_ids.push(next_token_id);

        if Some(next_token_id) == eos_token_id {
            log::debug!("EOS after {} new tokens", generated_ids.len() - input_ids.len());
            break;
        }
        pending.clear();
        pending.push(next_token_id);
    }

    Ok(generated_ids)
}
