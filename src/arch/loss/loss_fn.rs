use ndarray::{Array2, ArrayView2};

/// A loss over predicted class probabilities and integer labels.
pub trait LossFn {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> f32;
    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Array2<f32>;
}
