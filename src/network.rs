use crate::layers::{Activation, BatchNorm, Dense, Dropout, LstmLayer};
use crate::optimizer::Adam;
use anyhow::{Context, Result};
use ndarray::{s, Array2, Array3};
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECURRENT_UNITS: usize = 128;
pub const DENSE_UNITS: usize = 32;
const OUTPUT_CLASSES: usize = 2;
const PROBABILITY_FLOOR: f64 = 1e-15;
const EVAL_CHUNK: usize = 256;

/// Stacked recurrent direction classifier: three LSTM layers, each followed
/// by dropout and batch normalization (the last one collapsing to its final
/// hidden state), a ReLU hidden layer with dropout, and a two-class softmax
/// head. The preprocessing geometry it was trained with travels with the
/// weights so inference can reject mismatched inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionNet {
    pub sequence_length: usize,
    pub horizon: usize,
    pub feature_names: Vec<String>,

    lstm1: LstmLayer,
    drop1: Dropout,
    norm1: BatchNorm,
    lstm2: LstmLayer,
    drop2: Dropout,
    norm2: BatchNorm,
    lstm3: LstmLayer,
    drop3: Dropout,
    norm3: BatchNorm,
    hidden: Dense,
    drop4: Dropout,
    output: Dense,
}

impl DirectionNet {
    pub fn new(
        sequence_length: usize,
        horizon: usize,
        feature_names: Vec<String>,
        rng: &mut StdRng,
    ) -> Self {
        Self::with_units(
            sequence_length,
            horizon,
            feature_names,
            RECURRENT_UNITS,
            DENSE_UNITS,
            rng,
        )
    }

    pub fn with_units(
        sequence_length: usize,
        horizon: usize,
        feature_names: Vec<String>,
        recurrent_units: usize,
        dense_units: usize,
        rng: &mut StdRng,
    ) -> Self {
        let features = feature_names.len();
        Self {
            sequence_length,
            horizon,
            feature_names,
            lstm1: LstmLayer::new(features, recurrent_units, rng),
            drop1: Dropout::new(0.2),
            norm1: BatchNorm::new(recurrent_units),
            lstm2: LstmLayer::new(recurrent_units, recurrent_units, rng),
            drop2: Dropout::new(0.1),
            norm2: BatchNorm::new(recurrent_units),
            lstm3: LstmLayer::new(recurrent_units, recurrent_units, rng),
            drop3: Dropout::new(0.2),
            norm3: BatchNorm::new(recurrent_units),
            hidden: Dense::new(recurrent_units, dense_units, Activation::Relu, rng),
            drop4: Dropout::new(0.2),
            output: Dense::new(dense_units, OUTPUT_CLASSES, Activation::Linear, rng),
        }
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    /// Training forward pass: caches layer state for `backward` and applies
    /// dropout with `rng`. Returns class probabilities `[batch, 2]`.
    pub fn forward_training(&mut self, input: &Array3<f64>, rng: &mut StdRng) -> Array2<f64> {
        let steps = input.dim().1;

        let h1 = self.lstm1.forward_cached(input);
        let h1 = self.drop1.forward_seq(&h1, Some(&mut *rng));
        let h1 = normalize_sequence_batch(&mut self.norm1, &h1);

        let h2 = self.lstm2.forward_cached(&h1);
        let h2 = self.drop2.forward_seq(&h2, Some(&mut *rng));
        let h2 = normalize_sequence_batch(&mut self.norm2, &h2);

        let h3 = self.lstm3.forward_cached(&h2);
        let last = h3.slice(s![.., steps - 1, ..]).to_owned();
        let last = self.drop3.forward(&last, Some(&mut *rng));
        let last = self.norm3.normalize_batch(&last);

        let dense = self.hidden.forward_cached(&last);
        let dense = self.drop4.forward(&dense, Some(&mut *rng));
        let logits = self.output.forward_cached(&dense);
        softmax(&logits)
    }

    /// Inference forward pass; no dropout, running batch-norm statistics,
    /// shared-reference so evaluation can fan out over chunks.
    pub fn infer(&self, input: &Array3<f64>) -> Array2<f64> {
        let steps = input.dim().1;

        let h1 = self.lstm1.forward(input);
        let h1 = normalize_sequence(&self.norm1, &h1);
        let h2 = self.lstm2.forward(&h1);
        let h2 = normalize_sequence(&self.norm2, &h2);
        let h3 = self.lstm3.forward(&h2);
        let last = h3.slice(s![.., steps - 1, ..]).to_owned();
        let last = self.norm3.normalize(&last);
        let dense = self.hidden.forward(&last);
        let logits = self.output.forward(&dense);
        softmax(&logits)
    }

    /// Backpropagates the softmax cross-entropy gradient and applies every
    /// parameter update through `optimizer`.
    pub fn backward(&mut self, probabilities: &Array2<f64>, labels: &[u8], optimizer: &mut Adam) {
        let batch = labels.len();
        let steps = self.sequence_length;

        // Softmax + cross-entropy collapses to (p - onehot) / batch.
        let mut d_logits = probabilities.clone();
        for (row, label) in labels.iter().enumerate() {
            d_logits[[row, *label as usize]] -= 1.0;
        }
        d_logits /= batch as f64;

        let (d_dense, dw, db) = self.output.backward(&d_logits);
        self.output.apply_gradients(&dw, &db, optimizer, "output");

        let d_dense = self.drop4.backward(&d_dense);
        let (d_last, dw, db) = self.hidden.backward(&d_dense);
        self.hidden.apply_gradients(&dw, &db, optimizer, "hidden");

        let (d_last, dg, dbeta) = self.norm3.backward(&d_last);
        self.norm3.apply_gradients(&dg, &dbeta, optimizer, "norm3");
        let d_last = self.drop3.backward(&d_last);

        let mut d_h3 = Array3::zeros((batch, steps, self.lstm3.hidden_size));
        d_h3.slice_mut(s![.., steps - 1, ..]).assign(&d_last);
        let (d_h2, grads) = self.lstm3.backward(&d_h3);
        self.lstm3.apply_gradients(&grads, optimizer, "lstm3");

        let d_h2 = backward_sequence_norm(&mut self.norm2, &d_h2, optimizer, "norm2");
        let d_h2 = self.drop2.backward_seq(&d_h2);
        let (d_h1, grads) = self.lstm2.backward(&d_h2);
        self.lstm2.apply_gradients(&grads, optimizer, "lstm2");

        let d_h1 = backward_sequence_norm(&mut self.norm1, &d_h1, optimizer, "norm1");
        let d_h1 = self.drop1.backward_seq(&d_h1);
        let (_, grads) = self.lstm1.backward(&d_h1);
        self.lstm1.apply_gradients(&grads, optimizer, "lstm1");
    }

    /// Mean sparse categorical cross-entropy.
    pub fn loss(probabilities: &Array2<f64>, labels: &[u8]) -> f64 {
        let total: f64 = labels
            .iter()
            .enumerate()
            .map(|(row, label)| {
                -probabilities[[row, *label as usize]]
                    .max(PROBABILITY_FLOOR)
                    .ln()
            })
            .sum();
        total / labels.len().max(1) as f64
    }

    /// Chunked parallel evaluation; returns (loss, accuracy).
    pub fn evaluate(&self, features: &Array3<f64>, labels: &[u8]) -> (f64, f64) {
        if labels.is_empty() {
            return (0.0, 0.0);
        }
        let chunks: Vec<(usize, usize)> = (0..labels.len())
            .step_by(EVAL_CHUNK)
            .map(|start| (start, (start + EVAL_CHUNK).min(labels.len())))
            .collect();

        let (loss_sum, correct) = chunks
            .par_iter()
            .map(|&(start, end)| {
                let slice = features.slice(s![start..end, .., ..]).to_owned();
                let probabilities = self.infer(&slice);
                let chunk_labels = &labels[start..end];
                let loss = Self::loss(&probabilities, chunk_labels) * chunk_labels.len() as f64;
                let correct = crate::metrics::correct_predictions(&probabilities, chunk_labels);
                (loss, correct)
            })
            .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

        (
            loss_sum / labels.len() as f64,
            correct as f64 / labels.len() as f64,
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = bincode::serialize(self).context("Failed to serialize model")?;
        fs::write(path, encoded).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        bincode::deserialize(&bytes)
            .with_context(|| format!("{} is not a valid model file", path.display()))
    }
}

/// Applies batch normalization over a `[batch, time, features]` tensor by
/// folding batch and time into one statistics axis.
fn normalize_sequence_batch(norm: &mut BatchNorm, input: &Array3<f64>) -> Array3<f64> {
    let (batch, steps, features) = input.dim();
    let flat = input
        .to_owned()
        .into_shape((batch * steps, features))
        .expect("sequence tensor is contiguous");
    let normalized = norm.normalize_batch(&flat);
    normalized
        .into_shape((batch, steps, features))
        .expect("normalized tensor keeps its shape")
}

fn normalize_sequence(norm: &BatchNorm, input: &Array3<f64>) -> Array3<f64> {
    let (batch, steps, features) = input.dim();
    let flat = input
        .to_owned()
        .into_shape((batch * steps, features))
        .expect("sequence tensor is contiguous");
    let normalized = norm.normalize(&flat);
    normalized
        .into_shape((batch, steps, features))
        .expect("normalized tensor keeps its shape")
}

fn backward_sequence_norm(
    norm: &mut BatchNorm,
    d_output: &Array3<f64>,
    optimizer: &mut Adam,
    prefix: &str,
) -> Array3<f64> {
    let (batch, steps, features) = d_output.dim();
    let flat = d_output
        .to_owned()
        .into_shape((batch * steps, features))
        .expect("sequence tensor is contiguous");
    let (d_input, d_gamma, d_beta) = norm.backward(&flat);
    norm.apply_gradients(&d_gamma, &d_beta, optimizer, prefix);
    d_input
        .into_shape((batch, steps, features))
        .expect("gradient tensor keeps its shape")
}

fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut probabilities = logits.clone();
    for mut row in probabilities.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;

    fn tiny_net(rng: &mut StdRng) -> DirectionNet {
        DirectionNet::with_units(
            5,
            3,
            vec!["a".into(), "b".into()],
            8,
            4,
            rng,
        )
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let logits = Array2::from_shape_vec((2, 2), vec![1.0, 3.0, -2.0, 0.5]).unwrap();
        let probabilities = softmax(&logits);
        for row in probabilities.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
            assert!(row.iter().all(|p| *p > 0.0));
        }
    }

    #[test]
    fn forward_shapes_and_probability_rows() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut net = tiny_net(&mut rng);
        let input = Array3::random_using((6, 5, 2), Uniform::new(-1.0, 1.0), &mut rng);

        let probabilities = net.forward_training(&input, &mut rng);
        assert_eq!(probabilities.dim(), (6, 2));
        for row in probabilities.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }

        let inference = net.infer(&input);
        assert_eq!(inference.dim(), (6, 2));
    }

    #[test]
    fn training_reduces_loss_on_a_separable_problem() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut net = tiny_net(&mut rng);

        // Label 1 when the sequence trends up, 0 when it trends down.
        let samples = 32;
        let mut input = Array3::zeros((samples, 5, 2));
        let mut labels = Vec::with_capacity(samples);
        for sample in 0..samples {
            let up = sample % 2 == 0;
            for step in 0..5 {
                let slope = if up { step as f64 } else { -(step as f64) };
                input[[sample, step, 0]] = slope * 0.5;
                input[[sample, step, 1]] = -slope * 0.25;
            }
            labels.push(u8::from(up));
        }

        let mut optimizer = Adam::new(0.01, 0.0);
        let initial = {
            let probabilities = net.forward_training(&input, &mut rng);
            DirectionNet::loss(&probabilities, &labels)
        };
        for _ in 0..30 {
            optimizer.begin_step();
            let probabilities = net.forward_training(&input, &mut rng);
            net.backward(&probabilities, &labels, &mut optimizer);
        }
        let trained = {
            let probabilities = net.forward_training(&input, &mut rng);
            DirectionNet::loss(&probabilities, &labels)
        };

        assert!(
            trained < initial,
            "loss should drop: {initial} -> {trained}"
        );
    }

    #[test]
    fn save_and_load_round_trip_predictions() {
        let mut rng = StdRng::seed_from_u64(11);
        let net = tiny_net(&mut rng);
        let input = Array3::random_using((3, 5, 2), Uniform::new(-1.0, 1.0), &mut rng);
        let before = net.infer(&input);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        net.save(&path).unwrap();
        let restored = DirectionNet::load(&path).unwrap();

        assert_eq!(restored.sequence_length, net.sequence_length);
        assert_eq!(restored.horizon, net.horizon);
        assert_eq!(restored.feature_names, net.feature_names);
        let after = restored.infer(&input);
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn evaluate_agrees_with_direct_loss() {
        let mut rng = StdRng::seed_from_u64(12);
        let net = tiny_net(&mut rng);
        let input = Array3::random_using((7, 5, 2), Uniform::new(-1.0, 1.0), &mut rng);
        let labels = vec![0u8, 1, 1, 0, 1, 0, 0];

        let probabilities = net.infer(&input);
        let direct = DirectionNet::loss(&probabilities, &labels);
        let (loss, accuracy) = net.evaluate(&input, &labels);

        assert!((loss - direct).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&accuracy));
    }
}
