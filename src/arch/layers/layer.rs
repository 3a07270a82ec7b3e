use rand::Rng;

use super::{BatchNorm1d, BatchNorm2d, Conv2d, Dense, Flatten, MaxPool2d, Relu, Softmax};
use crate::{
    arch::{Feature, FeatureShape, Phase},
    error::Result,
};

/// One stage of a [`Sequential`](crate::arch::Sequential) stack.
///
/// Each variant wraps a concrete layer; dispatch stays a plain `match` so a
/// stack is just a `Vec<Layer>` with no trait objects involved.
pub enum Layer {
    Conv2d(Conv2d),
    BatchNorm2d(BatchNorm2d),
    BatchNorm1d(BatchNorm1d),
    Relu(Relu),
    MaxPool2d(MaxPool2d),
    Flatten(Flatten),
    Dense(Dense),
    Softmax(Softmax),
}

impl Layer {
    pub fn conv2d(in_channels: usize, out_channels: usize) -> Self {
        Layer::Conv2d(Conv2d::new(in_channels, out_channels))
    }

    pub fn batch_norm2d(channels: usize) -> Self {
        Layer::BatchNorm2d(BatchNorm2d::new(channels))
    }

    pub fn batch_norm1d(features: usize) -> Self {
        Layer::BatchNorm1d(BatchNorm1d::new(features))
    }

    pub fn relu() -> Self {
        Layer::Relu(Relu::new())
    }

    pub fn max_pool2d() -> Self {
        Layer::MaxPool2d(MaxPool2d::new())
    }

    pub fn flatten() -> Self {
        Layer::Flatten(Flatten::new())
    }

    pub fn dense(dim: (usize, usize)) -> Self {
        Layer::Dense(Dense::new(dim))
    }

    pub fn softmax() -> Self {
        Layer::Softmax(Softmax::new())
    }

    /// The amount of parameters this layer views in the flat buffer.
    pub fn size(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.size(),
            Layer::BatchNorm2d(l) => l.size(),
            Layer::BatchNorm1d(l) => l.size(),
            Layer::Relu(l) => l.size(),
            Layer::MaxPool2d(l) => l.size(),
            Layer::Flatten(l) => l.size(),
            Layer::Dense(l) => l.size(),
            Layer::Softmax(l) => l.size(),
        }
    }

    /// Writes this layer's initial parameter values into its slice.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) {
        match self {
            Layer::Conv2d(l) => l.init_params(params, rng),
            Layer::BatchNorm2d(l) => l.init_params(params, rng),
            Layer::BatchNorm1d(l) => l.init_params(params, rng),
            Layer::Dense(l) => l.init_params(params, rng),
            Layer::Relu(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) | Layer::Softmax(_) => {}
        }
    }

    /// Shape inference for construction-time checking.
    pub fn out_shape(&self, input: FeatureShape) -> Result<FeatureShape> {
        match self {
            Layer::Conv2d(l) => l.out_shape(input),
            Layer::BatchNorm2d(l) => l.out_shape(input),
            Layer::BatchNorm1d(l) => l.out_shape(input),
            Layer::Relu(l) => l.out_shape(input),
            Layer::MaxPool2d(l) => l.out_shape(input),
            Layer::Flatten(l) => l.out_shape(input),
            Layer::Dense(l) => l.out_shape(input),
            Layer::Softmax(l) => l.out_shape(input),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Feature, phase: Phase) -> Result<Feature> {
        match self {
            Layer::Conv2d(l) => Ok(Feature::Maps(
                l.forward(params, x.into_maps("convolution")?),
            )),
            Layer::BatchNorm2d(l) => Ok(Feature::Maps(l.forward(
                params,
                x.into_maps("2d batch-norm")?,
                phase,
            ))),
            Layer::BatchNorm1d(l) => Ok(Feature::Flat(l.forward(
                params,
                x.into_flat("1d batch-norm")?,
                phase,
            ))),
            Layer::Relu(l) => Ok(l.forward(x)),
            Layer::MaxPool2d(l) => Ok(Feature::Maps(l.forward(x.into_maps("max-pooling")?))),
            Layer::Flatten(l) => Ok(Feature::Flat(l.forward(x.into_maps("flatten")?))),
            Layer::Dense(l) => Ok(Feature::Flat(l.forward(params, x.into_flat("dense")?))),
            Layer::Softmax(l) => Ok(Feature::Flat(l.forward(x.into_flat("softmax")?))),
        }
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Feature) -> Result<Feature> {
        match self {
            Layer::Conv2d(l) => Ok(Feature::Maps(l.backward(
                params,
                grad,
                d.into_maps("convolution")?,
            ))),
            Layer::BatchNorm2d(l) => Ok(Feature::Maps(l.backward(
                params,
                grad,
                d.into_maps("2d batch-norm")?,
            ))),
            Layer::BatchNorm1d(l) => Ok(Feature::Flat(l.backward(
                params,
                grad,
                d.into_flat("1d batch-norm")?,
            ))),
            Layer::Relu(l) => l.backward(d),
            Layer::MaxPool2d(l) => Ok(Feature::Maps(l.backward(d.into_maps("max-pooling")?))),
            Layer::Flatten(l) => Ok(Feature::Maps(l.backward(d.into_flat("flatten")?))),
            Layer::Dense(l) => Ok(Feature::Flat(l.backward(
                params,
                grad,
                d.into_flat("dense")?,
            ))),
            Layer::Softmax(l) => Ok(Feature::Flat(l.backward(d.into_flat("softmax")?))),
        }
    }
}
