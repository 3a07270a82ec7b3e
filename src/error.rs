use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::data::DataError;

/// The result type used across the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The pipeline's error type.
#[derive(Debug)]
pub enum PipelineError {
    /// A hyperparameter is invalid for semantic or domain reasons.
    Config(String),

    /// Two parts of the layer stack disagree on a dimension.
    ShapeMismatch {
        /// Human-readable context for the mismatch (e.g. "dense input").
        what: &'static str,
        /// Observed value.
        got: usize,
        /// Expected value.
        expected: usize,
    },

    /// A layer received the wrong kind of inter-layer value (channel maps
    /// where flat features were expected, or the reverse).
    FeatureKind {
        layer: &'static str,
        expected: &'static str,
    },

    /// The requested compute device is not available. There is no automatic
    /// fallback; the run aborts.
    ComputeResource { requested: String },

    /// A dataset could not be built or read.
    Data(DataError),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Config(reason) => write!(f, "invalid configuration: {reason}"),
            PipelineError::ShapeMismatch {
                what,
                got,
                expected,
            } => {
                write!(f, "shape mismatch for {what}: got {got}, expected {expected}")
            }
            PipelineError::FeatureKind { layer, expected } => {
                write!(f, "{layer} layer expected {expected} as input")
            }
            PipelineError::ComputeResource { requested } => {
                write!(f, "compute device {requested:?} is not available")
            }
            PipelineError::Data(e) => write!(f, "dataset error: {e}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::Data(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DataError> for PipelineError {
    fn from(e: DataError) -> Self {
        PipelineError::Data(e)
    }
}
