use std::num::NonZeroUsize;

use log::{debug, info};
use ndarray::{ArrayView1, ArrayView2};
use rand::{rngs::StdRng, seq::SliceRandom};

use super::{TrainingReport, TrainingState};
use crate::{
    arch::{Phase, Sequential, loss::LossFn},
    data::{Batch, ImageFolder},
    error::Result,
    optimization::Optimizer,
};

/// The explicit pipeline object: everything a run needs, bundled.
///
/// Owns the model, the flat parameter and gradient buffers, the optimizer,
/// the three dataset splits and the RNG, so a run is a method call instead of
/// a constellation of globals. Built by
/// [`TrainerBuilder`](super::TrainerBuilder).
pub struct Trainer<L: LossFn> {
    model: Sequential,
    optimizer: Box<dyn Optimizer>,
    loss_fn: L,

    params: Vec<f32>,
    grad: Vec<f32>,

    training: ImageFolder,
    validation: ImageFolder,
    testing: ImageFolder,

    batch_size: NonZeroUsize,
    n_epochs: NonZeroUsize,
    rng: StdRng,
    state: TrainingState,
}

impl<L: LossFn> Trainer<L> {
    /// Returns a new `Trainer` with freshly initialized parameters.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained; must pass its shape check.
    /// * `optimizer` - The parameter update rule.
    /// * `loss_fn` - Measures the distance between predictions and labels.
    /// * `training`, `validation`, `testing` - The three dataset splits.
    /// * `batch_size` - Samples per step; trailing partial batches are
    ///   discarded everywhere.
    /// * `n_epochs` - Training epochs before the final test pass.
    /// * `rng` - Drives parameter initialization and epoch shuffling.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        model: Sequential,
        optimizer: Box<dyn Optimizer>,
        loss_fn: L,
        training: ImageFolder,
        validation: ImageFolder,
        testing: ImageFolder,
        batch_size: NonZeroUsize,
        n_epochs: NonZeroUsize,
        mut rng: StdRng,
    ) -> Self {
        let mut params = vec![0.0; model.size()];
        model.init_params(&mut params, &mut rng);
        let grad = vec![0.0; model.size()];

        Self {
            model,
            optimizer,
            loss_fn,
            params,
            grad,
            training,
            validation,
            testing,
            batch_size,
            n_epochs,
            rng,
            state: TrainingState::default(),
        }
    }

    /// Drives the whole run: `n_epochs` training epochs, each followed by a
    /// validation pass, then one test pass.
    ///
    /// Prints one `Validation accuracy` line per epoch and one final
    /// `Test accuracy` line. Any error aborts the run; lines already printed
    /// are the only partial output.
    pub fn run(&mut self) -> Result<TrainingReport> {
        self.state = TrainingState::default();
        let n_epochs = self.n_epochs.get();
        let mut validation_accuracy = Vec::with_capacity(n_epochs);

        for epoch in 0..n_epochs {
            self.train_epoch(epoch)?;

            let accuracy = evaluate(
                &mut self.model,
                &self.params,
                &self.validation,
                self.batch_size.get(),
            )?;
            println!("Validation accuracy {accuracy:.2}");
            validation_accuracy.push(accuracy);
        }

        let test_accuracy = evaluate(
            &mut self.model,
            &self.params,
            &self.testing,
            self.batch_size.get(),
        )?;
        println!("Test accuracy {test_accuracy:.2}");

        Ok(TrainingReport {
            validation_accuracy,
            test_accuracy,
        })
    }

    /// One shuffled pass over the training split.
    fn train_epoch(&mut self, epoch: usize) -> Result<()> {
        self.state.begin_epoch(epoch);

        let mut indices: Vec<usize> = (0..self.training.len()).collect();
        indices.shuffle(&mut self.rng);

        for batch_indices in indices.chunks_exact(self.batch_size.get()) {
            let Batch { images, labels } = self.training.load_batch(batch_indices)?;

            let y_pred = self.model.forward(&self.params, images, Phase::Train)?;
            let loss = self.loss_fn.loss(y_pred.view(), &labels);
            let correct = correct_predictions(y_pred.view(), &labels);

            // fresh gradient per batch, no accumulation across batches
            self.grad.fill(0.0);
            let d = self.loss_fn.loss_prime(y_pred.view(), &labels);
            self.model.backward(&self.params, &mut self.grad, d)?;
            self.optimizer.update_params(&mut self.params, &self.grad);

            self.state.observe_batch(loss, correct, labels.len());
            debug!("epoch {epoch} step {} loss {loss:.4}", self.state.step());
        }

        info!(
            "epoch {epoch}: loss {:.4}, training accuracy {:.2}",
            self.state.running_loss(),
            self.state.running_accuracy()
        );
        Ok(())
    }

    /// The loop state after the most recent epoch.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }
}

/// Accuracy of the model over a split: fixed order, full batches only, no
/// parameter updates.
fn evaluate(
    model: &mut Sequential,
    params: &[f32],
    dataset: &ImageFolder,
    batch_size: usize,
) -> Result<f32> {
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut correct = 0;
    let mut total = 0;

    for batch_indices in indices.chunks_exact(batch_size) {
        let Batch { images, labels } = dataset.load_batch(batch_indices)?;
        let y_pred = model.forward(params, images, Phase::Eval)?;
        correct += correct_predictions(y_pred.view(), &labels);
        total += labels.len();
    }

    Ok(correct as f32 / total as f32)
}

/// Index of the highest score in a probability row.
fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = (0, f32::NEG_INFINITY);
    for (i, &v) in row.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// Count of samples whose arg-max prediction matches the label.
fn correct_predictions(y_pred: ArrayView2<f32>, labels: &[usize]) -> usize {
    let mut correct = 0;
    for (row, &label) in y_pred.rows().into_iter().zip(labels) {
        if argmax(row) == label {
            correct += 1;
        }
    }
    correct
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn argmax_picks_the_first_highest_score() {
        let row = array![0.1, 0.7, 0.2];
        assert_eq!(argmax(row.view()), 1);

        let tied = array![0.5, 0.5];
        assert_eq!(argmax(tied.view()), 0);
    }

    #[test]
    fn counts_matching_predictions() {
        let y_pred = array![[0.9, 0.1], [0.3, 0.7], [0.6, 0.4]];
        assert_eq!(correct_predictions(y_pred.view(), &[0, 1, 1]), 2);
    }
}
