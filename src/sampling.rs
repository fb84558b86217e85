//! Next-token selection over raw logits: temperature, then top-k, then a
//! categorical draw from a caller-supplied RNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::SamplingConfig;

pub fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0u32;
    let mut max_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > max_val {
            max_val = v;
            best = i as u32;
        }
    }
    best
}

pub fn apply_temperature(logits: &mut [f32], temperature: f32) {
    if temperature <= 0.0 || temperature == 1.0 {
        return;
    }
    for v in logits.iter_mut() {
        *v /= temperature;
    }
}

/// Masks everything below the k-th largest logit to `-inf`. Ties with the
/// k-th value survive.
pub fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }
    let mut sorted = logits.to_vec();
    let pivot = sorted.len() - k;
    sorted.select_nth_unstable_by(pivot, |a, b| a.total_cmp(b));
    let threshold = sorted[pivot];
    for v in logits.iter_mut() {
        if *v < threshold {
            *v = f32::NEG_INFINITY;
        }
    }
}

pub fn sample_categorical<R: Rng>(logits: &[f32], rng: &mut R) -> u32 {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if max_val == f32::NEG_INFINITY {
        return argmax(logits);
    }
    let weights: Vec<f32> = logits.iter().map(|&v| (v - max_val).exp()).collect();
    let total: f32 = weights.iter().sum();

    let target = rng.gen::<f32>() * total;
    let mut cumsum = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumsum += w;
        if target < cumsum {
            return i as u32;
        }
    }
    // rounding can leave target just above the final cumsum
    weights.iter().rposition(|&w| w > 0.0).unwrap_or(0) as u32
}

/// Seeded token picker for one generation call.
pub struct Sampler {
    rng: StdRng,
    temperature: f32,
    top_k: usize,
    do_sample: bool,
}

impl Sampler {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed as u64),
            temperature: config.temperature,
            top_k: config.top_k,
            do_sample: config.do_sample,
        }
    }

    pub fn next_token(&mut self, logits: &mut [f32]) -> u32 {
        if !self.do_sample {
            return argmax(logits);
        }
        apply_temperature(logits, self.temperature);
        apply_top_k(logits, self.top_k);
        sample_categorical(logits, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: i64, top_k: usize) -> SamplingConfig {
        SamplingConfig {
            max_length: 50,
            temperature: 0.8,
            top_k,
            seed,
            do_sample: true,
            num_return_sequences: 1,
        }
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[1.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[-1.0, -2.0, -0.5]), 2);
    }

    #[test]
    fn test_top_k_masks_the_tail() {
        let mut logits = vec![1.0, 5.0, 3.0, 2.0, 4.0];
        apply_top_k(&mut logits, 2);
        assert_eq!(logits[1], 5.0);
        assert_eq!(logits[4], 4.0);
        assert!(logits[0].is_infinite() && logits[2].is_infinite() && logits[3].is_infinite());

        let mut untouched = vec![1.0, 2.0];
        apply_top_k(&mut untouched, 5);
        assert_eq!(untouched, vec![1.0, 2.0]);
    }

    #[test]
    fn test_temperature_scales_logits() {
        let mut logits = vec![1.0, -2.0];
        apply_temperature(&mut logits, 0.5);
        assert_eq!(logits, vec![2.0, -4.0]);
    }

    #[test]
    fn test_top_one_is_greedy() {
        let mut sampler = Sampler::new(&config(3, 1));
        for _ in 0..20 {
            let mut logits = vec![0.1, 0.3, 0.2, 0.25];
            assert_eq!(sampler.next_token(&mut logits), 1);
        }
    }

    #[test]
    fn test_same_seed_same_draws() {
        let draws = |seed| {
            let mut sampler = Sampler::new(&config(seed, 50));
            (0..32)
                .map(|_| sampler.next_token(&mut vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]))
                .collect::<Vec<_>>()
        };
        assert_eq!(draws(42), draws(42));
        assert_ne!(draws(42), draws(7));
    }

    #[test]
    fn test_never_samples_masked_tokens() {
        let mut sampler = Sampler::new(&config(11, 2));
        for _ in 0..100 {
            let mut logits = vec![0.0, 0.0, 5.0, 4.9, -1.0];
            let token = sampler.next_token(&mut logits);
            assert!(token == 2 || token == 3);
        }
    }

    #[test]
    fn test_negative_seed_is_accepted() {
        let mut a = Sampler::new(&config(-1, 50));
        let mut b = Sampler::new(&config(-1, 50));
        assert_eq!(a.next_token(&mut vec![0.0; 8]), b.next_token(&mut vec![0.0; 8]));
    }
}
