use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

use crate::common::{softmax_rows, LayerKVCache};
use crate::error::GenerationError;
use crate::linear::Linear;

/// Causal multi-head self-attention with an append-only key/value cache.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
}

impl MultiHeadAttention {
    pub fn new(c_attn: Linear, c_proj: Linear, n_head: usize) -> Self {
        Self { c_attn, c_proj, n_head }
    }

    /// `hidden_states` holds the new positions only; earlier positions come
    /// from `cache`, which is extended with this call's keys and values.
    pub fn forward(
        &self,
        hidden_states: ArrayView2<f32>,
        cache: &mut LayerKVCache,
    ) -> Result<Array2<f32>, GenerationError> {
        let seq_len = hidden_states.nrows();
        let qkv = self.c_attn.forward(hidden_states);
        let n_embd = qkv.ncols() / 3;
        let head_dim = n_embd / self.n_head;

        let q = qkv.slice(s![.., 0..n_embd]);
        let k_new = qkv.slice(s![.., n_embd..2 * n_embd]);
        let v_new = qkv.slice(s![.., 2 * n_embd..]);

        let keys = concatenate(Axis(0), &[cache.keys.view(), k_new])
            .map_err(|e| GenerationError::Backend(format!("key cache append failed: {}", e)))?;
        let values = concatenate(Axis(0), &[cache.values.view(), v_new])
            .map_err(|e| GenerationError::Backend(format!("value cache append failed: {}", e)))?;
        cache.keys = keys;
        cache.values = values;

        let total_len = cache.len();
        let past_len = total_len - seq_len;
        let scale = 1.0 / (head_dim as f32).sqrt();

        let mut merged = Array2::<f32>::zeros((seq_len, n_embd));
        for head in 0..self.n_head {
            let cols = head * head_dim..(head + 1) * head_dim;
            let q_h = q.slice(s![.., cols.clone()]);
            let k_h = cache.keys.slice(s![.., cols.clone()]);
            let v_h = cache.values.slice(s![.., cols.clone()]);

            let mut scores = q_h.dot(&k_h.t()) * scale;
            // query i sits at absolute position past_len + i
            for (i, mut row) in scores.rows_mut().into_iter().enumerate() {
                row.slice_mut(s![past_len + i + 1..]).fill(f32::NEG_INFINITY);
            }
            softmax_rows(&mut scores);

            merged.slice_mut(s![.., cols]).assign(&scores.dot(&v_h));
        }

        Ok(self.c_proj.forward(merged.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Precision;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, Array1};

    fn attention(n_embd: usize, n_head: usize) -> MultiHeadAttention {
        let c_attn = Array::from_shape_fn((n_embd, 3 * n_embd), |(r, c)| ((r * 5 + c) % 7) as f32 * 0.1 - 0.3);
        let c_proj = Array::from_shape_fn((n_embd, n_embd), |(r, c)| ((r + 2 * c) % 5) as f32 * 0.1 - 0.2);
        MultiHeadAttention::new(
            Linear::new(c_attn, Array1::zeros(3 * n_embd), Precision::F32).unwrap(),
            Linear::new(c_proj, Array1::zeros(n_embd), Precision::F32).unwrap(),
            n_head,
        )
    }

    #[test]
    fn test_incremental_decoding_matches_full_pass() {
        let attn = attention(8, 2);
        let x = Array::from_shape_fn((4, 8), |(r, c)| ((r * 3 + c) % 9) as f32 * 0.1);

        let mut full_cache = LayerKVCache::new(8);
        let full = attn.forward(x.view(), &mut full_cache).unwrap();

        let mut step_cache = LayerKVCache::new(8);
        let prefix = attn.forward(x.slice(s![0..3, ..]), &mut step_cache).unwrap();
        let last = attn.forward(x.slice(s![3..4, ..]), &mut step_cache).unwrap();

        assert_eq!(step_cache.len(), 4);
        for (a, b) in full.row(3).iter().zip(last.row(0).iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
        for (a, b) in full.slice(s![0..3, ..]).iter().zip(prefix.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_first_position_ignores_later_ones() {
        let attn = attention(8, 4);
        let x = Array::from_shape_fn((3, 8), |(r, c)| (r * 8 + c) as f32 * 0.05);

        let mut cache = LayerKVCache::new(8);
        let full = attn.forward(x.view(), &mut cache).unwrap();
        let mut single_cache = LayerKVCache::new(8);
        let single = attn.forward(x.slice(s![0..1, ..]), &mut single_cache).unwrap();

        for (a, b) in full.row(0).iter().zip(single.row(0).iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }
}
