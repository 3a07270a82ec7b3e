use rand::{SeedableRng, rngs::StdRng};

use super::Trainer;
use crate::{
    arch::{FeatureShape, Sequential, layers::Layer, loss::CrossEntropy},
    config::{DeviceSpec, OptimizerSpec, PipelineSpec},
    data::{ImageFolder, Split},
    error::{PipelineError, Result},
    optimization::{Adam, GradientDescent, Optimizer},
};

/// Builds [`Trainer`]s given a specification.
///
/// Resolution happens stage by stage: config invariants, device, datasets
/// (the training split's vocabulary is shared with the other two), model
/// with its shape check, optimizer, RNG. Every stage failure is a build
/// error; nothing is constructed lazily at run time.
#[derive(Default)]
pub struct TrainerBuilder;

impl TrainerBuilder {
    /// Creates a new `TrainerBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Trainer` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the whole run.
    pub fn build(&self, spec: &PipelineSpec) -> Result<Trainer<CrossEntropy>> {
        spec.validate()?;
        self.resolve_device(spec)?;

        let (training, validation, testing) = self.resolve_datasets(spec)?;
        let model = self.resolve_model(spec)?;
        let optimizer = self.resolve_optimizer(spec, model.size());
        let rng = self.generate_rng(spec.seed);

        Ok(Trainer::new(
            model,
            optimizer,
            CrossEntropy::new(),
            training,
            validation,
            testing,
            spec.batch_size,
            spec.n_epochs,
            rng,
        ))
    }

    /// Only the CPU is implemented; anything else fails the build instead of
    /// silently falling back.
    fn resolve_device(&self, spec: &PipelineSpec) -> Result<()> {
        match spec.device {
            DeviceSpec::Cpu => Ok(()),
            DeviceSpec::Cuda => Err(PipelineError::ComputeResource {
                requested: "cuda".into(),
            }),
        }
    }

    fn resolve_datasets(
        &self,
        spec: &PipelineSpec,
    ) -> Result<(ImageFolder, ImageFolder, ImageFolder)> {
        let training = ImageFolder::training(&spec.data_root, spec.granularity, spec.input_dim)?;

        let found = training.vocabulary().len();
        let expected = spec.n_classes.get();
        if found != expected {
            return Err(PipelineError::Config(format!(
                "training split defines {found} classes, spec says n_classes = {expected}"
            )));
        }

        let validation = ImageFolder::with_vocabulary(
            &spec.data_root,
            Split::Validation,
            spec.granularity,
            spec.input_dim,
            training.vocabulary().clone(),
        )?;
        let testing = ImageFolder::with_vocabulary(
            &spec.data_root,
            Split::Testing,
            spec.granularity,
            spec.input_dim,
            training.vocabulary().clone(),
        )?;

        // partial trailing batches are discarded, so a split smaller than one
        // batch would contribute zero samples
        for dataset in [&training, &validation, &testing] {
            if dataset.len() < spec.batch_size.get() {
                return Err(PipelineError::Config(format!(
                    "{} split has {} samples, smaller than one batch of {}",
                    dataset.split().dir_name(),
                    dataset.len(),
                    spec.batch_size
                )));
            }
        }

        Ok((training, validation, testing))
    }

    /// The fixed classifier stack: two conv blocks, flatten, two dense
    /// blocks, softmax.
    fn resolve_model(&self, spec: &PipelineSpec) -> Result<Sequential> {
        let (h, w) = (spec.input_dim.height.get(), spec.input_dim.width.get());
        let channels = spec.input_dim.channels.get();
        let hidden = spec.hidden_dim.get();
        let linear = spec.linear_dim.get();
        let classes = spec.n_classes.get();

        let model = Sequential::new([
            Layer::conv2d(channels, hidden),
            Layer::batch_norm2d(hidden),
            Layer::relu(),
            Layer::max_pool2d(),
            Layer::conv2d(hidden, hidden * 2),
            Layer::batch_norm2d(hidden * 2),
            Layer::relu(),
            Layer::max_pool2d(),
            Layer::flatten(),
            Layer::dense((spec.input_dim.pooled_features(hidden * 2), linear)),
            Layer::batch_norm1d(linear),
            Layer::relu(),
            Layer::dense((linear, classes)),
            Layer::softmax(),
        ]);

        let out = model.check_shapes(FeatureShape::Maps {
            channels,
            height: h,
            width: w,
        })?;
        if out != (FeatureShape::Flat { features: classes }) {
            return Err(PipelineError::ShapeMismatch {
                what: "model output features",
                got: match out {
                    FeatureShape::Flat { features } => features,
                    FeatureShape::Maps { channels, .. } => channels,
                },
                expected: classes,
            });
        }

        Ok(model)
    }

    fn resolve_optimizer(&self, spec: &PipelineSpec, size: usize) -> Box<dyn Optimizer> {
        match spec.optimizer {
            OptimizerSpec::Adam => Box::new(Adam::new(size, spec.lr)),
            OptimizerSpec::GradientDescent => Box::new(GradientDescent::new(spec.lr)),
        }
    }

    fn generate_rng(&self, seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}
