use ndarray::{Array2, Array4};

use crate::error::{PipelineError, Result};

/// Forward mode.
///
/// Batch-norm layers normalize with batch statistics and update their running
/// statistics in `Train`; in `Eval` they normalize with the running
/// statistics and leave them untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Eval,
}

/// A value flowing between layers.
///
/// Convolutional stages exchange channel maps of shape `(batch, channels,
/// height, width)`; everything after the flatten stage exchanges flat
/// features of shape `(batch, features)`.
#[derive(Debug, Clone)]
pub enum Feature {
    Maps(Array4<f32>),
    Flat(Array2<f32>),
}

impl Feature {
    /// Number of samples along the batch axis.
    pub fn batch(&self) -> usize {
        match self {
            Feature::Maps(x) => x.dim().0,
            Feature::Flat(x) => x.dim().0,
        }
    }

    /// Unwraps channel maps, failing when the value is flat.
    pub fn into_maps(self, layer: &'static str) -> Result<Array4<f32>> {
        match self {
            Feature::Maps(x) => Ok(x),
            Feature::Flat(_) => Err(PipelineError::FeatureKind {
                layer,
                expected: "channel maps",
            }),
        }
    }

    /// Unwraps flat features, failing when the value still carries maps.
    pub fn into_flat(self, layer: &'static str) -> Result<Array2<f32>> {
        match self {
            Feature::Flat(x) => Ok(x),
            Feature::Maps(_) => Err(PipelineError::FeatureKind {
                layer,
                expected: "flat features",
            }),
        }
    }
}

/// Shape of a [`Feature`], without the batch axis.
///
/// Used for construction-time shape inference over a layer stack, so that a
/// disagreement between two layers is an error before any data is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    Maps {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat {
        features: usize,
    },
}
