use ndarray::{Array2, Zip};

use crate::{
    arch::FeatureShape,
    error::Result,
};

/// Row-wise normalized exponential; the model's output stage.
pub struct Softmax {
    // Forward metadata
    a: Array2<f32>,
}

impl Softmax {
    pub fn new() -> Self {
        Self {
            a: Array2::zeros((0, 0)),
        }
    }

    pub fn size(&self) -> usize {
        0
    }

    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        Ok(input)
    }

    /// Shifts each row by its maximum before exponentiating, so large logits
    /// cannot overflow.
    pub fn forward(&mut self, x: Array2<f32>) -> Array2<f32> {
        let mut a = x;
        for mut row in a.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        self.a = a.clone();
        a
    }

    /// Full Jacobian-vector product: `dz_j = a_j * (d_j - sum_k d_k a_k)`.
    pub fn backward(&mut self, d: Array2<f32>) -> Array2<f32> {
        let mut dz = Array2::zeros(d.dim());
        for i in 0..d.nrows() {
            let a_row = self.a.row(i);
            let d_row = d.row(i);
            let dot = d_row.dot(&a_row);
            Zip::from(dz.row_mut(i))
                .and(&a_row)
                .and(&d_row)
                .for_each(|dz, &a, &d| *dz = a * (d - dot));
        }
        dz
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new()
    }
}
