use ndarray::{Array, Array1, Array2, ArrayD, Dimension};
use std::collections::HashMap;

/// Adam with bias correction and the per-step learning-rate decay
/// lr_t = lr / (1 + decay * t). Moment slots are keyed by parameter name and
/// created lazily on first update.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub decay: f64,
    step: u64,
    slots: HashMap<String, (ArrayD<f64>, ArrayD<f64>)>,
}

impl Adam {
    pub fn new(learning_rate: f64, decay: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            decay,
            step: 0,
            slots: HashMap::new(),
        }
    }

    /// Advances the shared step counter; call once per mini-batch before the
    /// parameter updates of that batch.
    pub fn begin_step(&mut self) {
        self.step += 1;
    }

    pub fn current_learning_rate(&self) -> f64 {
        self.learning_rate / (1.0 + self.decay * self.step as f64)
    }

    pub fn update2(&mut self, key: &str, param: &mut Array2<f64>, grad: &Array2<f64>) {
        self.update(key, param, grad);
    }

    pub fn update1(&mut self, key: &str, param: &mut Array1<f64>, grad: &Array1<f64>) {
        self.update(key, param, grad);
    }

    fn update<D: Dimension>(&mut self, key: &str, param: &mut Array<f64, D>, grad: &Array<f64, D>) {
        debug_assert!(self.step > 0, "begin_step must run before updates");
        let learning_rate = self.current_learning_rate();
        let grad = grad.view().into_dyn();
        let (m, v) = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| (ArrayD::zeros(grad.raw_dim()), ArrayD::zeros(grad.raw_dim())));

        *m = &*m * self.beta1 + &grad * (1.0 - self.beta1);
        *v = &*v * self.beta2 + &grad.mapv(|g| g * g) * (1.0 - self.beta2);

        let m_hat = &*m / (1.0 - self.beta1.powi(self.step as i32));
        let v_hat = &*v / (1.0 - self.beta2.powi(self.step as i32));

        let delta = m_hat * learning_rate / (v_hat.mapv(f64::sqrt) + self.epsilon);
        let delta = delta
            .into_dimensionality::<D>()
            .expect("moment slot shape matches the parameter");
        *param -= &delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adam_moves_against_the_gradient() {
        let mut optimizer = Adam::new(0.001, 0.0);
        let mut weights = Array2::ones((3, 2));
        let grads = Array2::ones((3, 2));

        for _ in 0..10 {
            optimizer.begin_step();
            optimizer.update2("w", &mut weights, &grads);
        }

        assert!(weights.iter().all(|w| *w < 1.0));
    }

    #[test]
    fn decay_shrinks_the_learning_rate() {
        let mut optimizer = Adam::new(0.001, 0.1);
        assert_eq!(optimizer.current_learning_rate(), 0.001);
        for _ in 0..10 {
            optimizer.begin_step();
        }
        assert!((optimizer.current_learning_rate() - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn separate_keys_keep_separate_moments() {
        let mut optimizer = Adam::new(0.01, 0.0);
        let mut a = Array1::zeros(2);
        let mut b = Array1::zeros(3);
        optimizer.begin_step();
        optimizer.update1("a", &mut a, &Array1::ones(2));
        optimizer.update1("b", &mut b, &Array1::from_elem(3, -1.0));

        assert!(a.iter().all(|v| *v < 0.0));
        assert!(b.iter().all(|v| *v > 0.0));
    }
}
