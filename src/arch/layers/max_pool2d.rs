use ndarray::Array4;

use crate::{
    arch::FeatureShape,
    error::{PipelineError, Result},
};

const POOL: usize = 2;

/// 2x2 max-pooling with stride 2; halves both spatial dimensions.
pub struct MaxPool2d {
    // Forward metadata: argmax within each window, encoded `dy * 2 + dx`, so
    // the backward pass can route each gradient to the winning position.
    idx: Array4<u8>,
    in_dim: (usize, usize, usize, usize),
}

impl MaxPool2d {
    pub fn new() -> Self {
        Self {
            idx: Array4::zeros((0, 0, 0, 0)),
            in_dim: (0, 0, 0, 0),
        }
    }

    pub fn size(&self) -> usize {
        0
    }

    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        match input {
            FeatureShape::Maps {
                channels,
                height,
                width,
            } => Ok(FeatureShape::Maps {
                channels,
                height: height / POOL,
                width: width / POOL,
            }),
            FeatureShape::Flat { .. } => Err(PipelineError::FeatureKind {
                layer: "max-pooling",
                expected: "channel maps",
            }),
        }
    }

    pub fn forward(&mut self, x: Array4<f32>) -> Array4<f32> {
        let (n, c, h, w) = x.dim();
        let (ph, pw) = (h / POOL, w / POOL);
        let mut y = Array4::zeros((n, c, ph, pw));
        self.idx = Array4::zeros((n, c, ph, pw));
        self.in_dim = x.dim();

        for b in 0..n {
            for ci in 0..c {
                for i in 0..ph {
                    for j in 0..pw {
                        let mut best = f32::NEG_INFINITY;
                        let mut best_idx = 0u8;
                        for dy in 0..POOL {
                            for dx in 0..POOL {
                                let v = x[[b, ci, i * POOL + dy, j * POOL + dx]];
                                if v > best {
                                    best = v;
                                    best_idx = (dy * POOL + dx) as u8;
                                }
                            }
                        }
                        y[[b, ci, i, j]] = best;
                        self.idx[[b, ci, i, j]] = best_idx;
                    }
                }
            }
        }

        y
    }

    /// Scatters each gradient back to the window position that won the
    /// forward pass.
    pub fn backward(&mut self, d: Array4<f32>) -> Array4<f32> {
        let (n, c, ph, pw) = d.dim();
        let mut dx = Array4::zeros(self.in_dim);

        for b in 0..n {
            for ci in 0..c {
                for i in 0..ph {
                    for j in 0..pw {
                        let a = self.idx[[b, ci, i, j]] as usize;
                        let (dy, dx_off) = (a / POOL, a % POOL);
                        dx[[b, ci, i * POOL + dy, j * POOL + dx_off]] += d[[b, ci, i, j]];
                    }
                }
            }
        }

        dx
    }
}

impl Default for MaxPool2d {
    fn default() -> Self {
        Self::new()
    }
}
