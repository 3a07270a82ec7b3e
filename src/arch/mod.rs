pub mod layers;
pub mod loss;

mod feature;
mod sequential;

pub use feature::{Feature, FeatureShape, Phase};
pub use sequential::Sequential;
