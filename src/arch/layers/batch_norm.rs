use ndarray::{Array1, Array2, Array4, Zip, s};
use rand::Rng;

use crate::{
    arch::{FeatureShape, Phase},
    error::{PipelineError, Result},
};

const MOMENTUM: f32 = 0.1;
const EPS: f32 = 1e-5;

/// Per-channel normalization over `(batch, height, width)`.
///
/// Scale and shift are the layer's parameters, laid out as `channels` scale
/// values followed by `channels` shift values. Running statistics use biased
/// variance, like the batch statistics, and are updated only in
/// [`Phase::Train`].
pub struct BatchNorm2d {
    channels: usize,

    running_mean: Array1<f32>,
    running_var: Array1<f32>,

    // Forward metadata
    x_hat: Array4<f32>,
    inv_std: Array1<f32>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            x_hat: Array4::zeros((0, 0, 0, 0)),
            inv_std: Array1::zeros(channels),
        }
    }

    /// The amount of parameters this layer has: scale then shift.
    pub fn size(&self) -> usize {
        2 * self.channels
    }

    /// Scale starts at one, shift at zero.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], _rng: &mut R) {
        let (scale, shift) = params.split_at_mut(self.channels);
        scale.fill(1.0);
        shift.fill(0.0);
    }

    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        match input {
            FeatureShape::Maps { channels, .. } if channels == self.channels => Ok(input),
            FeatureShape::Maps { channels, .. } => Err(PipelineError::ShapeMismatch {
                what: "batch-norm channels",
                got: channels,
                expected: self.channels,
            }),
            FeatureShape::Flat { .. } => Err(PipelineError::FeatureKind {
                layer: "2d batch-norm",
                expected: "channel maps",
            }),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array4<f32>, phase: Phase) -> Array4<f32> {
        let (scale, shift) = params.split_at(self.channels);
        let (n, _, h, w) = x.dim();
        let m = (n * h * w) as f32;
        let mut y = Array4::zeros(x.dim());

        if phase == Phase::Train {
            self.x_hat = Array4::zeros(x.dim());
        }

        for c in 0..self.channels {
            let xc = x.slice(s![.., c, .., ..]);

            let (mean, inv_std) = match phase {
                Phase::Train => {
                    let mean = xc.sum() / m;
                    let var = xc.fold(0.0, |acc, &v| acc + (v - mean).powi(2)) / m;
                    self.running_mean[c] = (1.0 - MOMENTUM) * self.running_mean[c] + MOMENTUM * mean;
                    self.running_var[c] = (1.0 - MOMENTUM) * self.running_var[c] + MOMENTUM * var;
                    self.inv_std[c] = 1.0 / (var + EPS).sqrt();
                    (mean, self.inv_std[c])
                }
                Phase::Eval => (
                    self.running_mean[c],
                    1.0 / (self.running_var[c] + EPS).sqrt(),
                ),
            };

            let (g, b) = (scale[c], shift[c]);
            match phase {
                Phase::Train => {
                    Zip::from(y.slice_mut(s![.., c, .., ..]))
                        .and(self.x_hat.slice_mut(s![.., c, .., ..]))
                        .and(&xc)
                        .for_each(|y, x_hat, &v| {
                            *x_hat = (v - mean) * inv_std;
                            *y = g * *x_hat + b;
                        });
                }
                Phase::Eval => {
                    Zip::from(y.slice_mut(s![.., c, .., ..]))
                        .and(&xc)
                        .for_each(|y, &v| *y = g * (v - mean) * inv_std + b);
                }
            }
        }

        y
    }

    /// Backward over the batch-statistics path; only valid after a
    /// [`Phase::Train`] forward.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array4<f32>) -> Array4<f32> {
        let (scale, _) = params.split_at(self.channels);
        let (d_scale, d_shift) = grad.split_at_mut(self.channels);
        let (n, _, h, w) = d.dim();
        let m = (n * h * w) as f32;
        let mut dx = Array4::zeros(d.dim());

        for c in 0..self.channels {
            let dc = d.slice(s![.., c, .., ..]);
            let x_hat = self.x_hat.slice(s![.., c, .., ..]);

            let sum_d = dc.sum();
            let sum_d_x_hat = Zip::from(&dc).and(&x_hat).fold(0.0, |acc, &d, &x| acc + d * x);
            d_scale[c] = sum_d_x_hat;
            d_shift[c] = sum_d;

            let k = scale[c] * self.inv_std[c] / m;
            Zip::from(dx.slice_mut(s![.., c, .., ..]))
                .and(&dc)
                .and(&x_hat)
                .for_each(|dx, &d, &x| *dx = k * (m * d - sum_d - x * sum_d_x_hat));
        }

        dx
    }
}

/// Per-feature normalization over the batch axis.
///
/// The flat-feature counterpart of [`BatchNorm2d`]; identical parameter
/// layout and statistics handling, with the batch axis as the only reduction
/// axis.
pub struct BatchNorm1d {
    features: usize,

    running_mean: Array1<f32>,
    running_var: Array1<f32>,

    // Forward metadata
    x_hat: Array2<f32>,
    inv_std: Array1<f32>,
}

impl BatchNorm1d {
    pub fn new(features: usize) -> Self {
        Self {
            features,
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
            x_hat: Array2::zeros((0, 0)),
            inv_std: Array1::zeros(features),
        }
    }

    pub fn size(&self) -> usize {
        2 * self.features
    }

    pub fn init_params<R: Rng>(&self, params: &mut [f32], _rng: &mut R) {
        let (scale, shift) = params.split_at_mut(self.features);
        scale.fill(1.0);
        shift.fill(0.0);
    }

    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        match input {
            FeatureShape::Flat { features } if features == self.features => Ok(input),
            FeatureShape::Flat { features } => Err(PipelineError::ShapeMismatch {
                what: "batch-norm features",
                got: features,
                expected: self.features,
            }),
            FeatureShape::Maps { .. } => Err(PipelineError::FeatureKind {
                layer: "1d batch-norm",
                expected: "flat features",
            }),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>, phase: Phase) -> Array2<f32> {
        let (scale, shift) = params.split_at(self.features);
        let m = x.nrows() as f32;
        let mut y = Array2::zeros(x.dim());

        if phase == Phase::Train {
            self.x_hat = Array2::zeros(x.dim());
        }

        for c in 0..self.features {
            let xc = x.slice(s![.., c]);

            let (mean, inv_std) = match phase {
                Phase::Train => {
                    let mean = xc.sum() / m;
                    let var = xc.fold(0.0, |acc, &v| acc + (v - mean).powi(2)) / m;
                    self.running_mean[c] = (1.0 - MOMENTUM) * self.running_mean[c] + MOMENTUM * mean;
                    self.running_var[c] = (1.0 - MOMENTUM) * self.running_var[c] + MOMENTUM * var;
                    self.inv_std[c] = 1.0 / (var + EPS).sqrt();
                    (mean, self.inv_std[c])
                }
                Phase::Eval => (
                    self.running_mean[c],
                    1.0 / (self.running_var[c] + EPS).sqrt(),
                ),
            };

            let (g, b) = (scale[c], shift[c]);
            match phase {
                Phase::Train => {
                    Zip::from(y.slice_mut(s![.., c]))
                        .and(self.x_hat.slice_mut(s![.., c]))
                        .and(&xc)
                        .for_each(|y, x_hat, &v| {
                            *x_hat = (v - mean) * inv_std;
                            *y = g * *x_hat + b;
                        });
                }
                Phase::Eval => {
                    Zip::from(y.slice_mut(s![.., c]))
                        .and(&xc)
                        .for_each(|y, &v| *y = g * (v - mean) * inv_std + b);
                }
            }
        }

        y
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Array2<f32> {
        let (scale, _) = params.split_at(self.features);
        let (d_scale, d_shift) = grad.split_at_mut(self.features);
        let m = d.nrows() as f32;
        let mut dx = Array2::zeros(d.dim());

        for c in 0..self.features {
            let dc = d.slice(s![.., c]);
            let x_hat = self.x_hat.slice(s![.., c]);

            let sum_d = dc.sum();
            let sum_d_x_hat = Zip::from(&dc).and(&x_hat).fold(0.0, |acc, &d, &x| acc + d * x);
            d_scale[c] = sum_d_x_hat;
            d_shift[c] = sum_d;

            let k = scale[c] * self.inv_std[c] / m;
            Zip::from(dx.slice_mut(s![.., c]))
                .and(&dc)
                .and(&x_hat)
                .for_each(|dx, &d, &x| *dx = k * (m * d - sum_d - x * sum_d_x_hat));
        }

        dx
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit_params(size: usize) -> Vec<f32> {
        let mut params = vec![0.0; size];
        let channels = size / 2;
        params[..channels].fill(1.0);
        params
    }

    #[test]
    fn train_forward_normalizes_each_channel() {
        let mut layer = BatchNorm2d::new(2);
        let params = unit_params(layer.size());

        let x = Array4::from_shape_fn((4, 2, 2, 2), |(b, c, i, j)| {
            (b * 8 + c * 4 + i * 2 + j) as f32 * 0.3 + c as f32
        });
        let y = layer.forward(&params, x, Phase::Train);

        for c in 0..2 {
            let yc = y.slice(s![.., c, .., ..]);
            let m = yc.len() as f32;
            let mean = yc.sum() / m;
            let var = yc.fold(0.0, |acc, &v| acc + (v - mean).powi(2)) / m;
            assert!(mean.abs() < 1e-5, "channel {c} mean {mean}");
            assert!((var - 1.0).abs() < 1e-2, "channel {c} var {var}");
        }
    }

    #[test]
    fn eval_forward_uses_running_statistics() {
        let mut layer = BatchNorm2d::new(1);
        let params = unit_params(layer.size());

        let x = Array4::from_shape_fn((2, 1, 2, 2), |(b, _, i, j)| (b + i + j) as f32);
        let batch_mean = x.sum() / 8.0;
        layer.forward(&params, x.clone(), Phase::Train);

        // first update from (0, 1) initialization
        let expected_mean = MOMENTUM * batch_mean;
        assert!((layer.running_mean[0] - expected_mean).abs() < 1e-6);

        let y = layer.forward(&params, x.clone(), Phase::Eval);
        let expected = (x[[0, 0, 0, 0]] - layer.running_mean[0])
            / (layer.running_var[0] + EPS).sqrt();
        assert!((y[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn gradients_match_finite_differences_2d() {
        let mut layer = BatchNorm2d::new(2);
        let mut params: Vec<f32> = vec![1.1, 0.7, 0.2, -0.4];

        let x = Array4::from_shape_fn((3, 2, 2, 2), |(b, c, i, j)| {
            0.5 * b as f32 - 0.3 * c as f32 + 0.2 * i as f32 + 0.1 * j as f32
        });
        let coef = Array4::from_shape_fn((3, 2, 2, 2), |(b, c, i, j)| {
            0.05 * (b * 8 + c * 4 + i * 2 + j) as f32 - 0.4
        });

        let objective = |layer: &mut BatchNorm2d, params: &[f32], x: &Array4<f32>| -> f32 {
            (&layer.forward(params, x.clone(), Phase::Train) * &coef).sum()
        };

        let mut grad = vec![0.0; layer.size()];
        layer.forward(&params, x.clone(), Phase::Train);
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
                "param {k}: finite diff {fd} vs backward {}",
                grad[k]
            );
        }

        let mut x_probe = x.clone();
        for idx in [(0, 0, 0, 0), (1, 1, 1, 0), (2, 0, 1, 1)] {
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

    #[test]
    fn gradients_match_finite_differences_1d() {
        let mut layer = BatchNorm1d::new(3);
        let mut params: Vec<f32> = vec![1.2, 0.8, -0.5, 0.1, -0.2, 0.3];

        let x = Array2::from_shape_fn((5, 3), |(i, j)| 0.4 * i as f32 - 0.3 * j as f32 + 0.2);
        let coef = Array2::from_shape_fn((5, 3), |(i, j)| 0.1 * (i * 3 + j) as f32 - 0.6);

        let objective = |layer: &mut BatchNorm1d, params: &[f32], x: &Array2<f32>| -> f32 {
            (&layer.forward(params, x.clone(), Phase::Train) * &coef).sum()
        };

        let mut grad = vec![0.0; layer.size()];
        layer.forward(&params, x.clone(), Phase::Train);
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
                "param {k}: finite diff {fd} vs backward {}",
                grad[k]
            );
        }

        let mut x_probe = x.clone();
        for idx in [(0, 0), (2, 1), (4, 2)] {
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
