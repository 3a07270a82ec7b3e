use ndarray::{Array2, Array4};

use crate::{
    arch::FeatureShape,
    error::{PipelineError, Result},
};

/// Converts channel maps into one flat feature vector per sample.
pub struct Flatten {
    in_dim: (usize, usize, usize, usize),
}

impl Flatten {
    pub fn new() -> Self {
        Self {
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
            } => Ok(FeatureShape::Flat {
                features: channels * height * width,
            }),
            FeatureShape::Flat { .. } => Err(PipelineError::FeatureKind {
                layer: "flatten",
                expected: "channel maps",
            }),
        }
    }

    pub fn forward(&mut self, x: Array4<f32>) -> Array2<f32> {
        let (n, c, h, w) = x.dim();
        self.in_dim = x.dim();
        x.into_shape_with_order((n, c * h * w)).unwrap()
    }

    pub fn backward(&mut self, d: Array2<f32>) -> Array4<f32> {
        d.into_shape_with_order(self.in_dim).unwrap()
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}
