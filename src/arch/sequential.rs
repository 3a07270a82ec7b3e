use ndarray::{Array2, Array4};
use rand::Rng;

use super::{Feature, FeatureShape, Phase, layers::Layer};
use crate::error::{PipelineError, Result};

/// A sequential model: information flows forward when computing an output
/// and backward when computing the *deltas* of its layers.
///
/// Parameters are not owned here; the caller holds one flat buffer of
/// [`size`](Sequential::size) values and each layer views its slice of it, in
/// stack order.
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// The amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    /// Runs shape inference over the whole stack.
    ///
    /// Any disagreement between two adjacent layers surfaces here, at
    /// construction time, instead of as a shape error on the first forward
    /// pass.
    ///
    /// # Returns
    /// The output shape for the given input shape.
    pub fn check_shapes(&self, input: FeatureShape) -> Result<FeatureShape> {
        let mut shape = input;
        for layer in &self.layers {
            shape = layer.out_shape(shape)?;
        }
        Ok(shape)
    }

    /// Writes initial values for every layer into the flat parameter buffer.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) {
        let mut offset = 0;
        for layer in &self.layers {
            let size = layer.size();
            layer.init_params(&mut params[offset..offset + size], rng);
            offset += size;
        }
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The flat parameter buffer.
    /// * `x` - An image batch, `(batch, channels, height, width)`.
    /// * `phase` - Whether batch-norm layers use batch or running statistics.
    ///
    /// # Returns
    /// One probability vector per sample, `(batch, classes)`.
    pub fn forward(&mut self, params: &[f32], x: Array4<f32>, phase: Phase) -> Result<Array2<f32>> {
        self.check_params_len(params.len())?;

        let mut x = Feature::Maps(x);
        let mut offset = 0;
        for layer in self.layers.iter_mut() {
            let size = layer.size();
            x = layer.forward(&params[offset..offset + size], x, phase)?;
            offset += size;
        }

        x.into_flat("model output")
    }

    /// Walks the stack in reverse, writing every layer's parameter gradient
    /// into `grad`.
    ///
    /// Only valid after a [`Phase::Train`] forward pass over the same batch.
    ///
    /// # Arguments
    /// * `params` - The flat parameter buffer used on the forward pass.
    /// * `grad` - The flat gradient buffer, parallel to `params`.
    /// * `d` - The loss gradient with respect to the model output.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()> {
        self.check_params_len(params.len())?;
        self.check_params_len(grad.len())?;

        let mut d = Feature::Flat(d);
        let mut end = self.size();
        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }

    fn check_params_len(&self, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(PipelineError::ShapeMismatch {
                what: "parameter buffer",
                got,
                expected,
            });
        }
        Ok(())
    }
}
