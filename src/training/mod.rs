mod builder;
mod state;
mod trainer;

pub use builder::TrainerBuilder;
pub use state::{TrainingReport, TrainingState};
pub use trainer::Trainer;
