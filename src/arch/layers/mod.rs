mod batch_norm;
mod conv2d;
mod dense;
mod flatten;
mod layer;
mod max_pool2d;
mod relu;
mod softmax;

pub use batch_norm::{BatchNorm1d, BatchNorm2d};
pub use conv2d::Conv2d;
pub use dense::Dense;
pub use flatten::Flatten;
pub use layer::Layer;
pub use max_pool2d::MaxPool2d;
pub use relu::Relu;
pub use softmax::Softmax;
