use ndarray::{Array2, ArrayView2, ArrayViewMut2, linalg};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{
    arch::FeatureShape,
    error::{PipelineError, Result},
};

/// A fully connected layer without bias.
///
/// The weight matrix is the layer's slice of the flat parameter buffer,
/// viewed as `(in_features, out_features)`.
pub struct Dense {
    dim: (usize, usize),
    size: usize,

    // Forward metadata
    x: Array2<f32>,
}

impl Dense {
    pub fn new(dim: (usize, usize)) -> Self {
        Self {
            dim,
            size: dim.0 * dim.1,
            x: Array2::zeros((0, 0)),
        }
    }

    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// He-normal initialization over the input fan-in.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) {
        let normal = Normal::new(0.0, (2.0 / self.dim.0 as f32).sqrt()).unwrap();
        for p in params.iter_mut() {
            *p = normal.sample(rng);
        }
    }

    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        match input {
            FeatureShape::Flat { features } if features == self.dim.0 => Ok(FeatureShape::Flat {
                features: self.dim.1,
            }),
            FeatureShape::Flat { features } => Err(PipelineError::ShapeMismatch {
                what: "dense input features",
                got: features,
                expected: self.dim.0,
            }),
            FeatureShape::Maps { .. } => Err(PipelineError::FeatureKind {
                layer: "dense",
                expected: "flat features",
            }),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Array2<f32> {
        let w = self.view_params(params);
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        self.x = x;
        z
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Array2<f32> {
        let mut dw = self.view_grad(grad);
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);

        let w = self.view_params(params);
        let mut dx = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);
        dx
    }

    /// Gives a view of the raw parameter slice as this layer's weights.
    fn view_params<'a>(&self, params: &'a [f32]) -> ArrayView2<'a, f32> {
        ArrayView2::from_shape(self.dim, params).unwrap()
    }

    /// Gives a view of the raw gradient slice as the weight gradient.
    fn view_grad<'a>(&self, grad: &'a mut [f32]) -> ArrayViewMut2<'a, f32> {
        ArrayViewMut2::from_shape(self.dim, grad).unwrap()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn forward_is_a_plain_matrix_product() {
        let mut layer = Dense::new((2, 2));
        // identity weights
        let params = vec![1.0, 0.0, 0.0, 1.0];

        let x = array![[3.0, -1.0], [0.5, 2.0]];
        let y = layer.forward(&params, x.clone());
        assert_eq!(y, x);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut layer = Dense::new((3, 2));
        let mut params: Vec<f32> = (0..layer.size()).map(|k| 0.3 * k as f32 - 0.8).collect();

        let x = Array2::from_shape_fn((4, 3), |(i, j)| 0.25 * i as f32 - 0.4 * j as f32 + 0.1);
        let coef = Array2::from_shape_fn((4, 2), |(i, j)| 0.5 + 0.1 * (i + 2 * j) as f32);

        let objective = |layer: &mut Dense, params: &[f32], x: &Array2<f32>| -> f32 {
            (&layer.forward(params, x.clone()) * &coef).sum()
        };

        let mut grad = vec![0.0; layer.size()];
        layer.forward(&params, x.clone());
        let dx = layer.backward(&params, &mut grad, coef.clone());

        let h = 1e-2;
        for k in 0..params.len() {
            let orig = params[k];
            params[k] = orig + h;
            let up = objective(&mut layer, &params, &x);
            params[k] = orig - h;
            let down = objective(&mut layer, &params, &x);
            params[k] = orig;

            let fd = (up - down) / (2.0 * h);
            assert!(
                (fd - grad[k]).abs() < 1e-2 * grad[k].abs().max(1.0),
                "weight {k}: finite diff {fd} vs backward {}",
                grad[k]
            );
        }

        let mut x_probe = x.clone();
        for idx in [(0, 0), (1, 2), (3, 1)] {
            let orig = x_probe[idx];
            x_probe[idx] = orig + h;
            let up = objective(&mut layer, &params, &x_probe);
            x_probe[idx] = orig - h;
            let down = objective(&mut layer, &params, &x_probe);
            x_probe[idx] = orig;

            let fd = (up - down) / (2.0 * h);
            assert!(
                (fd - dx[idx]).abs() < 1e-2 * dx[idx].abs().max(1.0),
                "input {idx:?}: finite diff {fd} vs backward {}",
                dx[idx]
            );
        }
    }
}
