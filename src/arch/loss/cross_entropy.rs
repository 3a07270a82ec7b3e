use ndarray::{Array2, ArrayView2};

use super::LossFn;

// keeps the log (and its derivative) finite when a class probability
// collapses to zero
const EPS: f32 = 1e-9;

/// Cross-entropy over integer class labels, averaged over the batch.
#[derive(Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> f32 {
        let n = labels.len() as f32;
        labels
            .iter()
            .enumerate()
            .map(|(i, &y)| -y_pred[[i, y]].max(EPS).ln())
            .sum::<f32>()
            / n
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Array2<f32> {
        let n = labels.len() as f32;
        let mut d = Array2::zeros(y_pred.dim());
        for (i, &y) in labels.iter().enumerate() {
            d[[i, y]] = -1.0 / (y_pred[[i, y]].max(EPS) * n);
        }
        d
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arch::layers::Softmax;
    use ndarray::{Array2, array};

    #[test]
    fn perfect_prediction_has_near_zero_loss() {
        let y_pred = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let loss = CrossEntropy.loss(y_pred.view(), &[0, 2]);
        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn uniform_prediction_loses_ln_of_class_count() {
        let y_pred = Array2::from_elem((4, 3), 1.0 / 3.0);
        let loss = CrossEntropy.loss(y_pred.view(), &[0, 1, 2, 0]);
        assert!((loss - 3.0f32.ln()).abs() < 1e-5);
    }

    /// Composed with the softmax backward pass, the gradient at the logits
    /// must come out as `(probabilities - one_hot) / batch`.
    #[test]
    fn composes_with_softmax_to_the_classic_delta() {
        let mut softmax = Softmax::new();
        let logits = array![[2.0, -1.0, 0.5], [0.0, 1.0, -2.0]];
        let labels = [2usize, 0];

        let p = softmax.forward(logits);
        let d = CrossEntropy.loss_prime(p.view(), &labels);
        let dz = softmax.backward(d);

        let n = labels.len() as f32;
        for (i, &y) in labels.iter().enumerate() {
            for j in 0..3 {
                let one_hot = if j == y { 1.0 } else { 0.0 };
                let expected = (p[[i, j]] - one_hot) / n;
                assert!(
                    (dz[[i, j]] - expected).abs() < 1e-5,
                    "delta[{i},{j}] = {}, expected {expected}",
                    dz[[i, j]]
                );
            }
        }
    }
}
