use ndarray::{Array2, ArrayView2};

use crate::common::gelu;
use crate::linear::Linear;

#[derive(Debug, Clone)]
pub struct MLP {
    c_fc: Linear,
    c_proj: Linear,
}

impl MLP {
    pub fn new(c_fc: Linear, c_proj: Linear) -> Self {
        Self { c_fc, c_proj }
    }

    pub fn forward(&self, hidden_states: ArrayView2<f32>) -> Array2<f32> {
        let mut h = self.c_fc.forward(hidden_states);
        h.mapv_inplace(gelu);
        self.c_proj.forward(h.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Precision;
    use ndarray::{Array1, Array2};

    #[test]
    fn test_mlp_shapes_and_identity_path() {
        // c_fc copies the input into the first two hidden units; c_proj reads them back.
        let mut fc = Array2::<f32>::zeros((2, 4));
        fc[[0, 0]] = 1.0;
        fc[[1, 1]] = 1.0;
        let mut proj = Array2::<f32>::zeros((4, 2));
        proj[[0, 0]] = 1.0;
        proj[[1, 1]] = 1.0;

        let mlp = MLP::new(
            Linear::new(fc, Array1::zeros(4), Precision::F32).unwrap(),
            Linear::new(proj, Array1::zeros(2), Precision::F32).unwrap(),
        );
        let x = ndarray::array![[0.0f32, 1.0]];
        let y = mlp.forward(x.view());
        assert_eq!(y.dim(), (1, 2));
        assert_eq!(y[[0, 0]], 0.0);
        assert!((y[[0, 1]] - gelu(1.0)).abs() < 1e-6);
    }
}
