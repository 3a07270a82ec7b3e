use super::Optimizer;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// Adam optimization algorithm.
///
/// Keeps first- and second-moment estimates per parameter, with the usual
/// bias correction folded into a single step size per update.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of
    ///   training per update.
    pub fn new(len: usize, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) {
        debug_assert_eq!(params.len(), self.v.len());
        debug_assert_eq!(params.len(), grad.len());

        let lr = self.learning_rate;

        self.beta1_t *= BETA1;
        self.beta2_t *= BETA2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = BETA1 * *v + (1. - BETA1) * g;
                *s = BETA2 * *s + (1. - BETA2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + EPSILON);
            });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// After bias correction the very first step reduces to
    /// `learning_rate * sign(gradient)`.
    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let mut optimizer = Adam::new(2, 0.1);
        let mut params = vec![1.0, 2.0];
        optimizer.update_params(&mut params, &[0.5, -0.5]);

        assert!((params[0] - 0.9).abs() < 1e-4);
        assert!((params[1] - 2.1).abs() < 1e-4);
    }

    #[test]
    fn repeated_steps_approach_a_minimum() {
        // objective: (p - 3)^2, gradient: 2 (p - 3)
        let mut optimizer = Adam::new(1, 0.05);
        let mut params = vec![0.0];
        for _ in 0..500 {
            let grad = [2.0 * (params[0] - 3.0)];
            optimizer.update_params(&mut params, &grad);
        }
        assert!((params[0] - 3.0).abs() < 0.1, "ended at {}", params[0]);
    }
}
