use crate::dataset::LABEL_COLUMN;
use crate::frame::PriceFrame;
use crate::models::ClassCounts;
use anyhow::{anyhow, Context, Result};
use log::info;
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::VecDeque;

/// One model input: a fixed-length run of consecutive feature rows paired
/// with the direction label of the run's last row.
#[derive(Debug, Clone)]
pub struct WindowSample {
    pub features: Array2<f64>,
    pub label: u8,
}

/// Class-balanced, shuffled tensors ready for training.
#[derive(Debug, Clone)]
pub struct BalancedDataset {
    /// [samples, sequence_length, features]
    pub features: Array3<f64>,
    pub labels: Vec<u8>,
    pub feature_names: Vec<String>,
    /// Label histogram before undersampling.
    pub raw_counts: ClassCounts,
}

impl BalancedDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn counts(&self) -> ClassCounts {
        ClassCounts::from_labels(&self.labels)
    }
}

/// Runs the per-split preprocessing over an already labeled frame:
/// percent-change + scale every feature column, window the cleaned rows,
/// then balance the classes by undersampling. All shuffles draw from `rng`.
pub fn prepare_split(
    mut frame: PriceFrame,
    sequence_length: usize,
    rng: &mut StdRng,
) -> Result<BalancedDataset> {
    if sequence_length == 0 {
        return Err(anyhow!("Sequence length must be positive"));
    }

    frame
        .percent_change_and_scale(LABEL_COLUMN)
        .context("Percent-change normalization failed")?;
    let (feature_names, rows) = frame
        .feature_rows(LABEL_COLUMN)
        .context("Labeled frame is missing its label column")?;

    let mut windows = window_sequences(&rows, sequence_length, feature_names.len());
    info!(
        "Windowed {} cleaned rows into {} sequences of length {}",
        rows.len(),
        windows.len(),
        sequence_length
    );
    if windows.is_empty() {
        return Err(anyhow!(
            "No sequences produced: {} cleaned rows is fewer than the window length {}",
            rows.len(),
            sequence_length
        ));
    }

    windows.shuffle(rng);
    let raw_counts = ClassCounts::from_labels(windows.iter().map(|w| &w.label));
    let balanced = balance_classes(windows, rng)?;

    to_tensors(balanced, feature_names, raw_counts, sequence_length)
}

/// Slides a discard-oldest buffer over the rows and emits one sample per
/// step once the buffer is full. Overlapping windows, stride 1.
fn window_sequences(
    rows: &[(Vec<f64>, u8)],
    sequence_length: usize,
    feature_count: usize,
) -> Vec<WindowSample> {
    let mut buffer: VecDeque<&[f64]> = VecDeque::with_capacity(sequence_length);
    let mut windows = Vec::with_capacity(rows.len().saturating_sub(sequence_length - 1));

    for (features, label) in rows {
        if buffer.len() == sequence_length {
            buffer.pop_front();
        }
        buffer.push_back(features);
        if buffer.len() == sequence_length {
            let mut window = Array2::zeros((sequence_length, feature_count));
            for (step, row) in buffer.iter().enumerate() {
                for (column, value) in row.iter().enumerate() {
                    window[[step, column]] = *value;
                }
            }
            windows.push(WindowSample {
                features: window,
                label: *label,
            });
        }
    }

    windows
}

/// Partitions by label, shuffles each pool, truncates both to the smaller
/// pool's size, concatenates and shuffles again. Excess majority samples are
/// discarded.
fn balance_classes(windows: Vec<WindowSample>, rng: &mut StdRng) -> Result<Vec<WindowSample>> {
    let (mut ups, mut downs): (Vec<_>, Vec<_>) = windows.into_iter().partition(|w| w.label == 1);

    ups.shuffle(rng);
    downs.shuffle(rng);

    let lower = ups.len().min(downs.len());
    if lower == 0 {
        return Err(anyhow!(
            "Cannot balance classes: {} up vs {} down sequences",
            ups.len(),
            downs.len()
        ));
    }
    ups.truncate(lower);
    downs.truncate(lower);

    let mut balanced = ups;
    balanced.append(&mut downs);
    balanced.shuffle(rng);
    Ok(balanced)
}

fn to_tensors(
    windows: Vec<WindowSample>,
    feature_names: Vec<String>,
    raw_counts: ClassCounts,
    sequence_length: usize,
) -> Result<BalancedDataset> {
    let samples = windows.len();
    let feature_count = feature_names.len();
    let mut features = Array3::zeros((samples, sequence_length, feature_count));
    let mut labels = Vec::with_capacity(samples);

    for (sample, window) in windows.into_iter().enumerate() {
        features
            .slice_mut(ndarray::s![sample, .., ..])
            .assign(&window.features);
        labels.push(window.label);
    }

    Ok(BalancedDataset {
        features,
        labels,
        feature_names,
        raw_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sample_rows(labels: &[u8]) -> Vec<(Vec<f64>, u8)> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| (vec![i as f64, -(i as f64)], *label))
            .collect()
    }

    #[test]
    fn window_count_matches_formula() {
        for rows in [3usize, 5, 10, 12] {
            let labels = vec![0u8; rows];
            let windows = window_sequences(&sample_rows(&labels), 5, 2);
            assert_eq!(windows.len(), rows.saturating_sub(5 - 1).max(0));
            for window in &windows {
                assert_eq!(window.features.shape(), &[5, 2]);
            }
        }
    }

    #[test]
    fn window_label_comes_from_last_row() {
        let rows = sample_rows(&[0, 0, 1, 0, 1]);
        let windows = window_sequences(&rows, 3, 2);
        assert_eq!(windows.len(), 3);
        // Windows end at rows 2, 3, 4.
        assert_eq!(windows[0].label, 1);
        assert_eq!(windows[1].label, 0);
        assert_eq!(windows[2].label, 1);
        // Last row of the first window is row 2.
        assert_eq!(windows[0].features[[2, 0]], 2.0);
    }

    #[test]
    fn balancing_truncates_to_smaller_pool() {
        let rows = sample_rows(&[1, 1, 1, 1, 1, 0, 0, 1, 1, 1]);
        let windows = window_sequences(&rows, 1, 2);
        let mut rng = StdRng::seed_from_u64(7);
        let balanced = balance_classes(windows, &mut rng).unwrap();

        let counts = ClassCounts::from_labels(balanced.iter().map(|w| &w.label));
        assert_eq!(counts.up, counts.down);
        assert_eq!(counts.up, 2);
    }

    #[test]
    fn balancing_fails_with_a_single_class() {
        let rows = sample_rows(&[1, 1, 1]);
        let windows = window_sequences(&rows, 1, 2);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(balance_classes(windows, &mut rng).is_err());
    }

    #[test]
    fn prepare_split_is_deterministic_for_a_seed() {
        let build_frame = || {
            let mut frame = PriceFrame::new((0..40).collect());
            frame
                .add_column("a_close", (1..=40).map(|v| v as f64).collect())
                .unwrap();
            frame
                .add_column(
                    "a_volume",
                    (1..=40).map(|v| (v * v) as f64).collect(),
                )
                .unwrap();
            let labels = (0..40).map(|v| f64::from(u8::from(v % 3 == 0))).collect();
            frame.add_column(LABEL_COLUMN, labels).unwrap();
            frame
        };

        let mut rng_a = StdRng::seed_from_u64(11);
        let mut rng_b = StdRng::seed_from_u64(11);
        let a = prepare_split(build_frame(), 6, &mut rng_a).unwrap();
        let b = prepare_split(build_frame(), 6, &mut rng_b).unwrap();

        assert_eq!(a.labels, b.labels);
        assert_eq!(a.features, b.features);
        let counts = a.counts();
        assert_eq!(counts.up, counts.down);
    }
}
