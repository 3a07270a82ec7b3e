use std::{fs, num::NonZeroUsize, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    data::Granularity,
    error::{PipelineError, Result},
};

/// Input image dimensions, channel count included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDim {
    pub height: NonZeroUsize,
    pub width: NonZeroUsize,
    pub channels: NonZeroUsize,
}

impl InputDim {
    pub fn new(height: usize, width: usize, channels: usize) -> Option<Self> {
        Some(Self {
            height: NonZeroUsize::new(height)?,
            width: NonZeroUsize::new(width)?,
            channels: NonZeroUsize::new(channels)?,
        })
    }

    /// Flattened feature count after the two 2x2 pooling stages, given the
    /// final channel count.
    pub fn pooled_features(&self, channels: usize) -> usize {
        channels * (self.height.get() / 4) * (self.width.get() / 4)
    }
}

/// Compute device selection.
///
/// Only `cpu` is implemented; requesting anything else fails the build with
/// a compute-resource error instead of silently falling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSpec {
    Cpu,
    Cuda,
}

/// Optimizer selection and configuration. The learning rate is shared and
/// lives at the top level of [`PipelineSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam,
    GradientDescent,
}

/// Specification for a full train/validate/test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Directory holding the `training`/`validation`/`testing` splits.
    pub data_root: PathBuf,
    /// Coarse or fine-grained category derivation from filenames.
    #[serde(default)]
    pub granularity: Granularity,
    /// Image height, width and channel count fed to the model.
    pub input_dim: InputDim,
    /// Channel count of the first convolution block.
    pub hidden_dim: NonZeroUsize,
    /// Width of the hidden dense layer.
    pub linear_dim: NonZeroUsize,
    /// Number of output classes.
    pub n_classes: NonZeroUsize,
    #[serde(default = "default_device")]
    pub device: DeviceSpec,
    /// Learning rate, strictly positive.
    pub lr: f32,
    pub n_epochs: NonZeroUsize,
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    #[serde(default = "default_optimizer")]
    pub optimizer: OptimizerSpec,
    /// Seed for deterministic parameter init and shuffling.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PipelineSpec {
    /// The in-repo defaults: coarse labels under `data/`, 32x32 RGB inputs,
    /// Adam for ten epochs.
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            granularity: Granularity::default(),
            input_dim: InputDim::new(32, 32, 3).unwrap(),
            hidden_dim: NonZeroUsize::new(32).unwrap(),
            linear_dim: NonZeroUsize::new(128).unwrap(),
            n_classes: NonZeroUsize::new(4).unwrap(),
            device: default_device(),
            lr: 1e-3,
            n_epochs: NonZeroUsize::new(10).unwrap(),
            batch_size: default_batch_size(),
            optimizer: default_optimizer(),
            seed: None,
        }
    }
}

fn default_device() -> DeviceSpec {
    DeviceSpec::Cpu
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(32).unwrap()
}

fn default_optimizer() -> OptimizerSpec {
    OptimizerSpec::Adam
}

impl PipelineSpec {
    /// Reads a spec from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;
        let spec: PipelineSpec = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("cannot parse {}: {e}", path.display())))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks the value-level invariants the type system does not encode.
    ///
    /// Both pooling stages halve the spatial dimensions, so height and width
    /// must be divisible by 4 for the flattened feature count to agree with
    /// the first dense layer. Catching that here keeps it a configuration
    /// error instead of a shape error at the first forward pass.
    pub fn validate(&self) -> Result<()> {
        let h = self.input_dim.height.get();
        let w = self.input_dim.width.get();

        if h % 4 != 0 {
            return Err(PipelineError::Config(format!(
                "input height {h} is not divisible by 4"
            )));
        }
        if w % 4 != 0 {
            return Err(PipelineError::Config(format!(
                "input width {w} is not divisible by 4"
            )));
        }
        if !(self.lr > 0.0) {
            return Err(PipelineError::Config(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(height: usize, width: usize) -> PipelineSpec {
        PipelineSpec {
            data_root: PathBuf::from("data"),
            granularity: Granularity::Coarse,
            input_dim: InputDim::new(height, width, 3).unwrap(),
            hidden_dim: NonZeroUsize::new(8).unwrap(),
            linear_dim: NonZeroUsize::new(16).unwrap(),
            n_classes: NonZeroUsize::new(3).unwrap(),
            device: DeviceSpec::Cpu,
            lr: 1e-3,
            n_epochs: NonZeroUsize::new(1).unwrap(),
            batch_size: NonZeroUsize::new(32).unwrap(),
            optimizer: OptimizerSpec::Adam,
            seed: Some(7),
        }
    }

    #[test]
    fn accepts_dims_divisible_by_four() {
        assert!(spec(32, 20).validate().is_ok());
    }

    #[test]
    fn rejects_height_not_divisible_by_four() {
        assert!(spec(30, 32).validate().is_err());
    }

    #[test]
    fn rejects_width_not_divisible_by_four() {
        assert!(spec(32, 18).validate().is_err());
    }

    #[test]
    fn rejects_non_positive_learning_rate() {
        let mut s = spec(32, 32);
        s.lr = 0.0;
        assert!(s.validate().is_err());
        s.lr = f32::NAN;
        assert!(s.validate().is_err());
    }

    #[test]
    fn parses_snake_case_json() {
        let raw = r#"{
            "data_root": "data",
            "granularity": "fine",
            "input_dim": { "height": 32, "width": 32, "channels": 3 },
            "hidden_dim": 32,
            "linear_dim": 128,
            "n_classes": 4,
            "device": "cpu",
            "lr": 0.001,
            "n_epochs": 10
        }"#;
        let spec: PipelineSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.granularity, Granularity::Fine);
        assert_eq!(spec.batch_size.get(), 32);
        assert_eq!(spec.optimizer, OptimizerSpec::Adam);
        assert!(spec.seed.is_none());
    }
}
