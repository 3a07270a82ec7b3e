use ndarray::{Array4, ArrayView4, ArrayViewMut4, Axis, Zip};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{
    arch::FeatureShape,
    error::{PipelineError, Result},
};

const KERNEL: usize = 3;
const PAD: usize = 1;

/// A 3x3, stride-1, same-padding convolution without bias.
///
/// The kernel lives in the layer's slice of the flat parameter buffer, laid
/// out as `(out_channels, in_channels, 3, 3)`.
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    size: usize,

    // Forward metadata
    x: Array4<f32>,
}

impl Conv2d {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            size: out_channels * in_channels * KERNEL * KERNEL,
            x: Array4::zeros((0, 0, 0, 0)),
        }
    }

    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// He-normal initialization over the kernel fan-in.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) {
        let fan_in = (self.in_channels * KERNEL * KERNEL) as f32;
        let normal = Normal::new(0.0, (2.0 / fan_in).sqrt()).unwrap();
        for p in params.iter_mut() {
            *p = normal.sample(rng);
        }
    }

    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        match input {
            FeatureShape::Maps {
                channels,
                height,
                width,
            } if channels == self.in_channels => Ok(FeatureShape::Maps {
                channels: self.out_channels,
                height,
                width,
            }),
            FeatureShape::Maps { channels, .. } => Err(PipelineError::ShapeMismatch {
                what: "convolution input channels",
                got: channels,
                expected: self.in_channels,
            }),
            FeatureShape::Flat { .. } => Err(PipelineError::FeatureKind {
                layer: "convolution",
                expected: "channel maps",
            }),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array4<f32>) -> Array4<f32> {
        let (n, _, h, w) = x.dim();
        let kernel = self.view_params(params);
        let mut y = Array4::zeros((n, self.out_channels, h, w));

        let (cin, cout) = (self.in_channels, self.out_channels);
        Zip::from(y.axis_iter_mut(Axis(0)))
            .and(x.axis_iter(Axis(0)))
            .par_for_each(|mut yb, xb| {
                for co in 0..cout {
                    for i in 0..h {
                        for j in 0..w {
                            let mut acc = 0.0;
                            for ci in 0..cin {
                                for ki in 0..KERNEL {
                                    let Some(ii) = (i + ki).checked_sub(PAD) else {
                                        continue;
                                    };
                                    if ii >= h {
                                        continue;
                                    }
                                    for kj in 0..KERNEL {
                                        let Some(jj) = (j + kj).checked_sub(PAD) else {
                                            continue;
                                        };
                                        if jj >= w {
                                            continue;
                                        }
                                        acc += kernel[[co, ci, ki, kj]] * xb[[ci, ii, jj]];
                                    }
                                }
                            }
                            yb[[co, i, j]] = acc;
                        }
                    }
                }
            });

        self.x = x;
        y
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array4<f32>) -> Array4<f32> {
        let (n, _, h, w) = d.dim();
        let (cin, cout) = (self.in_channels, self.out_channels);
        let kernel = self.view_params(params);
        let mut dk = self.view_grad(grad);
        let x = &self.x;

        for co in 0..cout {
            for ci in 0..cin {
                for ki in 0..KERNEL {
                    for kj in 0..KERNEL {
                        let mut acc = 0.0;
                        for b in 0..n {
                            for i in 0..h {
                                let Some(ii) = (i + ki).checked_sub(PAD) else {
                                    continue;
                                };
                                if ii >= h {
                                    continue;
                                }
                                for j in 0..w {
                                    let Some(jj) = (j + kj).checked_sub(PAD) else {
                                        continue;
                                    };
                                    if jj >= w {
                                        continue;
                                    }
                                    acc += d[[b, co, i, j]] * x[[b, ci, ii, jj]];
                                }
                            }
                        }
                        dk[[co, ci, ki, kj]] = acc;
                    }
                }
            }
        }

        // Input gradient: every output position that read (ii, jj) through
        // kernel offset (ki, kj) contributes back.
        let mut dx = Array4::zeros(x.dim());
        Zip::from(dx.axis_iter_mut(Axis(0)))
            .and(d.axis_iter(Axis(0)))
            .par_for_each(|mut dxb, db| {
                for ci in 0..cin {
                    for ii in 0..h {
                        for jj in 0..w {
                            let mut acc = 0.0;
                            for co in 0..cout {
                                for ki in 0..KERNEL {
                                    let Some(i) = (ii + PAD).checked_sub(ki) else {
                                        continue;
                                    };
                                    if i >= h {
                                        continue;
                                    }
                                    for kj in 0..KERNEL {
                                        let Some(j) = (jj + PAD).checked_sub(kj) else {
                                            continue;
                                        };
                                        if j >= w {
                                            continue;
                                        }
                                        acc += db[[co, i, j]] * kernel[[co, ci, ki, kj]];
                                    }
                                }
                            }
                            dxb[[ci, ii, jj]] = acc;
                        }
                    }
                }
            });

        dx
    }

    /// Gives a view of the raw parameter slice as this layer's kernel.
    fn view_params<'a>(&self, params: &'a [f32]) -> ArrayView4<'a, f32> {
        let dim = (self.out_channels, self.in_channels, KERNEL, KERNEL);
        ArrayView4::from_shape(dim, params).unwrap()
    }

    /// Gives a view of the raw gradient slice as the kernel gradient.
    fn view_grad<'a>(&self, grad: &'a mut [f32]) -> ArrayViewMut4<'a, f32> {
        let dim = (self.out_channels, self.in_channels, KERNEL, KERNEL);
        ArrayViewMut4::from_shape(dim, grad).unwrap()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A single all-ones 3x3 kernel sums the 3x3 neighborhood under same
    /// padding.
    #[test]
    fn forward_sums_neighborhood_with_ones_kernel() {
        let mut layer = Conv2d::new(1, 1);
        let params = vec![1.0; layer.size()];

        let x = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, i, j)| (i * 3 + j) as f32);
        let y = layer.forward(&params, x);

        // center: sum of all nine values 0..=8
        assert_eq!(y[[0, 0, 1, 1]], 36.0);
        // top-left corner: 0 + 1 + 3 + 4
        assert_eq!(y[[0, 0, 0, 0]], 8.0);
        // bottom edge center: 3 + 4 + 5 + 6 + 7 + 8
        assert_eq!(y[[0, 0, 2, 1]], 33.0);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut layer = Conv2d::new(2, 2);
        let mut params: Vec<f32> = (0..layer.size())
            .map(|k| 0.13 * (k as f32) - 1.1)
            .collect();

        let x = Array4::from_shape_fn((2, 2, 4, 4), |(b, c, i, j)| {
            0.1 * (b + 2 * c) as f32 + 0.07 * i as f32 - 0.05 * j as f32
        });
        let coef = Array4::from_shape_fn((2, 2, 4, 4), |(b, c, i, j)| {
            0.02 * (b * 31 + c * 17 + i * 5 + j) as f32 - 0.3
        });

        // scalar objective: sum(coef * forward(x)), so coef is exactly the
        // output gradient
        let objective = |layer: &mut Conv2d, params: &[f32], x: &Array4<f32>| -> f32 {
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
                "kernel param {k}: finite diff {fd} vs backward {}",
                grad[k]
            );
        }

        let mut x_probe = x.clone();
        for idx in [(0, 0, 0, 0), (1, 1, 2, 3), (0, 1, 3, 1)] {
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
    fn rejects_wrong_channel_count() {
        let layer = Conv2d::new(3, 8);
        let result = layer.out_shape(FeatureShape::Maps {
            channels: 1,
            height: 8,
            width: 8,
        });
        assert!(matches!(
            result,
            Err(PipelineError::ShapeMismatch { got: 1, expected: 3, .. })
        ));
    }
}
