use ndarray::{Array1, Array2, ArrayView2, Zip};
use ndarray_stats::QuantileExt;

#[derive(Debug, Clone)]
pub struct LayerNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    epsilon: f32,
}

impl LayerNorm {
    pub fn new(gamma: Array1<f32>, beta: Array1<f32>, epsilon: f32) -> Self {
        Self { gamma, beta, epsilon }
    }

    /// Normalises each row of `[seq_len, n_embd]`.
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut out = x.to_owned();
        let width = out.ncols() as f32;
        for mut row in out.rows_mut() {
            let mean = row.sum() / width;
            let variance = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / width;
            let inv_std_dev = 1.0 / (variance + self.epsilon).sqrt();
            Zip::from(&mut row)
                .and(&self.gamma)
                .and(&self.beta)
                .for_each(|v, &g, &b| *v = (*v - mean) * inv_std_dev * g + b);
        }
        out
    }
}

const GELU_COEFF: f32 = 0.044_715;
// sqrt(2 / pi)
const SQRT_2_OVER_PI: f32 = 0.797_884_6;

/// The tanh approximation GPT-2 was trained with ("gelu_new").
pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + libm::tanhf(SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x)))
}

/// Row-wise softmax. Rows that are entirely `-inf` become all zeros.
pub fn softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.rows_mut() {
        let max = *row.max_skipnan();
        if max == f32::NEG_INFINITY {
            row.fill(0.0);
            continue;
        }
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

/// Per-layer key/value history, `[positions, n_embd]` each.
#[derive(Debug, Clone)]
pub struct LayerKVCache {
    pub keys: Array2<f32>,
    pub values: Array2<f32>,
}

impl LayerKVCache {
    pub fn new(n_embd: usize) -> Self {
        Self {
            keys: Array2::zeros((0, n_embd)),
            values: Array2::zeros((0, n_embd)),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ModelKVCache = Vec<LayerKVCache>;
