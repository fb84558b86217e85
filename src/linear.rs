//! Affine layers in either full precision or 8-bit block quantization.
//!
//! GPT-2 stores its projection weights as `[in_features, out_features]`
//! (Conv1D layout), so the dense path is a plain `x.dot(w)`.

use ndarray::{Array1, Array2, ArrayView2};

use crate::backend::Precision;
use crate::error::ModelLoadError;

/// Elements sharing one scale.
pub const Q8_BLOCK_SIZE: usize = 32;

/// Weights quantized to i8 in blocks of `Q8_BLOCK_SIZE` along the input
/// dimension, with one f32 scale per block. Stored output-row major.
#[derive(Debug, Clone)]
pub struct QuantizedMatrix {
    out_features: usize,
    in_features: usize,
    values: Vec<i8>,
    scales: Vec<f32>,
}

impl QuantizedMatrix {
    /// Quantizes a `[in_features, out_features]` weight.
    pub fn quantize(weight: ArrayView2<f32>) -> Result<Self, ModelLoadError> {
        let (in_features, out_features) = weight.dim();
        if in_features % Q8_BLOCK_SIZE != 0 {
            return Err(ModelLoadError::Quantization(format!(
                "input dimension {} is not a multiple of the block size {}",
                in_features, Q8_BLOCK_SIZE
            )));
        }

        let blocks_per_row = in_features / Q8_BLOCK_SIZE;
        let mut values = Vec::with_capacity(in_features * out_features);
        let mut scales = Vec::with_capacity(blocks_per_row * out_features);
        let mut block = [0.0f32; Q8_BLOCK_SIZE];

        for column in weight.columns() {
            for block_idx in 0..blocks_per_row {
                let start = block_idx * Q8_BLOCK_SIZE;
                for (i, slot) in block.iter_mut().enumerate() {
                    *slot = column[start + i];
                }
                let amax = block.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()));
                let scale = if amax == 0.0 { 0.0 } else { amax / 127.0 };
                let inv_scale = if scale == 0.0 { 0.0 } else { 1.0 / scale };
                scales.push(scale);
                values.extend(block.iter().map(|&v| (v * inv_scale).round().clamp(-127.0, 127.0) as i8));
            }
        }

        Ok(Self {
            out_features,
            in_features,
            values,
            scales,
        })
    }

    /// Bytes held by the quantized values and scales.
    pub fn size_bytes(&self) -> usize {
        self.values.len() + self.scales.len() * std::mem::size_of::<f32>()
    }

    /// `x` is `[seq_len, in_features]`; returns `[seq_len, out_features]`.
    pub fn matmul(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let blocks_per_row = self.in_features / Q8_BLOCK_SIZE;
        let mut out = Array2::zeros((x.nrows(), self.out_features));
        for (x_row, mut out_row) in x.rows().into_iter().zip(out.rows_mut()) {
            let input: Vec<f32> = x_row.iter().copied().collect();
            for (o, out_val) in out_row.iter_mut().enumerate() {
                let row_values = &self.values[o * self.in_features..(o + 1) * self.in_features];
                let row_scales = &self.scales[o * blocks_per_row..(o + 1) * blocks_per_row];
                let mut acc = 0.0f32;
                for ((q_block, x_block), &scale) in row_values
                    .chunks_exact(Q8_BLOCK_SIZE)
                    .zip(input.chunks_exact(Q8_BLOCK_SIZE))
                    .zip(row_scales)
                {
                    let dot: f32 = q_block.iter().zip(x_block).map(|(&q, &xv)| q as f32 * xv).sum();
                    acc += dot * scale;
                }
                *out_val = acc;
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
enum LinearWeight {
    Dense(Array2<f32>),
    Int8(QuantizedMatrix),
}

#[derive(Debug, Clone)]
pub struct Linear {
    weight: LinearWeight,
    bias: Array1<f32>,
}

impl Linear {
    /// `weight` is `[in_features, out_features]`.
    pub fn new(weight: Array2<f32>, bias: Array1<f32>, precision: Precision) -> Result<Self, ModelLoadError> {
        if weight.ncols() != bias.len() {
            return Err(ModelLoadError::ShapeMismatch {
                tensor: "bias".to_string(),
                expected: vec![weight.ncols()],
                actual: vec![bias.len()],
            });
        }
        let weight = match precision {
            Precision::F32 => LinearWeight::Dense(weight),
            Precision::Int8 => LinearWeight::Int8(QuantizedMatrix::quantize(weight.view())?),
        };
        Ok(Self { weight, bias })
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let projected = match &self.weight {
            LinearWeight::Dense(w) => x.dot(w),
            LinearWeight::Int8(q) => q.matmul(x),
        };
        projected + &self.bias
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self.weight, LinearWeight::Int8(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn ramp(rows: usize, cols: usize) -> Array2<f32> {
        Array::from_shape_fn((rows, cols), |(r, c)| ((r * 7 + c * 3) % 11) as f32 / 11.0 - 0.5)
    }

    #[test]
    fn test_quantized_matmul_tracks_dense() {
        let weight = ramp(64, 5);
        let x = ramp(3, 64);
        let dense = x.dot(&weight);
        let quantized = QuantizedMatrix::quantize(weight.view()).unwrap().matmul(x.view());

        assert_eq!(quantized.dim(), (3, 5));
        for (a, b) in dense.iter().zip(quantized.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 0.1);
        }
    }

    #[test]
    fn test_quantize_rejects_unaligned_input() {
        let weight = ramp(30, 4);
        assert!(matches!(
            QuantizedMatrix::quantize(weight.view()),
            Err(ModelLoadError::Quantization(_))
        ));
    }

    #[test]
    fn test_zero_block_stays_zero() {
        let weight = Array2::<f32>::zeros((32, 2));
        let q = QuantizedMatrix::quantize(weight.view()).unwrap();
        let out = q.matmul(Array2::ones((1, 32)).view());
        assert_eq!(out, Array2::<f32>::zeros((1, 2)));
        assert_eq!(q.size_bytes(), 64 + 2 * 4);
    }

    #[test]
    fn test_linear_adds_bias_and_reports_precision() {
        let weight = ramp(32, 3);
        let bias = Array1::from(vec![1.0f32, 2.0, 3.0]);
        let dense = Linear::new(weight.clone(), bias.clone(), Precision::F32).unwrap();
        let int8 = Linear::new(weight, bias, Precision::Int8).unwrap();
        assert!(!dense.is_quantized());
        assert!(int8.is_quantized());

        let x = Array2::zeros((2, 32));
        assert_eq!(dense.forward(x.view()).row(1).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(int8.forward(x.view()).row(0).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_linear_bias_shape_checked() {
        let err = Linear::new(ramp(32, 3), Array1::zeros(4), Precision::F32).unwrap_err();
        assert!(matches!(err, ModelLoadError::ShapeMismatch { .. }));
    }
}
