/// Counters for the run in progress.
///
/// Ephemeral: reset at the start of every run and at every epoch boundary,
/// never persisted. Fields stay private so the internal counters can evolve
/// without breaking the public API.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingState {
    epoch: usize,
    step: usize,
    total_loss: f32,
    batches: usize,
    correct: usize,
    seen: usize,
}

impl TrainingState {
    /// Resets the per-epoch accumulators; the global step count survives.
    pub fn begin_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.total_loss = 0.0;
        self.batches = 0;
        self.correct = 0;
        self.seen = 0;
    }

    /// Folds one training batch into the running counters.
    ///
    /// # Args
    /// * `loss` - Mean loss over the batch.
    /// * `correct` - Samples whose arg-max prediction matched the label.
    /// * `samples` - Batch size.
    pub fn observe_batch(&mut self, loss: f32, correct: usize, samples: usize) {
        self.step += 1;
        self.batches += 1;
        self.total_loss += loss;
        self.correct += correct;
        self.seen += samples;
    }

    /// The current epoch index.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Optimizer steps taken since the run started.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Mean batch loss over the epoch so far.
    pub fn running_loss(&self) -> f32 {
        if self.batches == 0 {
            return 0.0;
        }
        self.total_loss / self.batches as f32
    }

    /// Share of training samples predicted correctly this epoch.
    pub fn running_accuracy(&self) -> f32 {
        if self.seen == 0 {
            return 0.0;
        }
        self.correct as f32 / self.seen as f32
    }
}

/// What a finished run hands back, beyond its console output.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// One accuracy per epoch, in epoch order.
    pub validation_accuracy: Vec<f32>,
    /// Accuracy of the single test pass after the last epoch.
    pub test_accuracy: f32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accumulates_and_resets_per_epoch() {
        let mut state = TrainingState::default();

        state.begin_epoch(0);
        state.observe_batch(2.0, 10, 32);
        state.observe_batch(1.0, 20, 32);
        assert_eq!(state.step(), 2);
        assert!((state.running_loss() - 1.5).abs() < 1e-6);
        assert!((state.running_accuracy() - 30.0 / 64.0).abs() < 1e-6);

        state.begin_epoch(1);
        assert_eq!(state.epoch(), 1);
        assert_eq!(state.step(), 2);
        assert_eq!(state.running_loss(), 0.0);
        assert_eq!(state.running_accuracy(), 0.0);
    }
}
