use crate::{
    arch::{Feature, FeatureShape},
    error::{PipelineError, Result},
};

/// Rectifying non-linearity; works on both channel maps and flat features.
pub struct Relu {
    // Forward metadata
    z: Feature,
}

impl Relu {
    pub fn new() -> Self {
        Self {
            z: Feature::Flat(ndarray::Array2::zeros((0, 0))),
        }
    }

    pub fn size(&self) -> usize {
        0
    }

    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        Ok(input)
    }

    pub fn forward(&mut self, x: Feature) -> Feature {
        let y = match &x {
            Feature::Maps(m) => Feature::Maps(m.mapv(|v| v.max(0.0))),
            Feature::Flat(m) => Feature::Flat(m.mapv(|v| v.max(0.0))),
        };
        self.z = x;
        y
    }

    /// Zeroes the gradient wherever the forward input was non-positive.
    pub fn backward(&mut self, mut d: Feature) -> Result<Feature> {
        match (&self.z, &mut d) {
            (Feature::Maps(z), Feature::Maps(d)) => {
                d.zip_mut_with(z, |d, &z| {
                    if z <= 0.0 {
                        *d = 0.0;
                    }
                });
            }
            (Feature::Flat(z), Feature::Flat(d)) => {
                d.zip_mut_with(z, |d, &z| {
                    if z <= 0.0 {
                        *d = 0.0;
                    }
                });
            }
            _ => {
                return Err(PipelineError::FeatureKind {
                    layer: "relu",
                    expected: "the feature kind seen on the forward pass",
                });
            }
        }
        Ok(d)
    }
}

impl Default for Relu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn clamps_negatives_and_masks_their_gradient() {
        let mut layer = Relu::new();

        let x = array![[-1.0, 0.0, 2.0], [3.0, -0.5, 1.5]];
        let y = layer
            .forward(Feature::Flat(x))
            .into_flat("test")
            .unwrap();
        assert_eq!(y, array![[0.0, 0.0, 2.0], [3.0, 0.0, 1.5]]);

        let d = Array2::ones((2, 3));
        let dz = layer
            .backward(Feature::Flat(d))
            .unwrap()
            .into_flat("test")
            .unwrap();
        assert_eq!(dz, array![[0.0, 0.0, 1.0], [1.0, 0.0, 1.0]]);
    }
}
