use ndarray::Array2;

/// Index of the largest probability in a row.
pub fn argmax_row(row: &[f64]) -> usize {
    let mut best = 0;
    for (idx, value) in row.iter().enumerate() {
        if *value > row[best] {
            best = idx;
        }
    }
    best
}

/// Number of rows whose argmax matches the label.
pub fn correct_predictions(probabilities: &Array2<f64>, labels: &[u8]) -> usize {
    probabilities
        .rows()
        .into_iter()
        .zip(labels)
        .filter(|(row, label)| {
            argmax_row(row.as_slice().unwrap_or(&[])) == **label as usize
        })
        .count()
}

/// Fraction of rows classified correctly.
pub fn accuracy(probabilities: &Array2<f64>, labels: &[u8]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    correct_predictions(probabilities, labels) as f64 / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_the_largest() {
        assert_eq!(argmax_row(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax_row(&[0.9, 0.1]), 0);
    }

    #[test]
    fn accuracy_counts_matching_rows() {
        let probabilities =
            Array2::from_shape_vec((3, 2), vec![0.8, 0.2, 0.3, 0.7, 0.6, 0.4]).unwrap();
        let labels = [0u8, 1, 1];
        assert_eq!(correct_predictions(&probabilities, &labels), 2);
        assert!((accuracy(&probabilities, &labels) - 2.0 / 3.0).abs() < 1e-12);
    }
}
