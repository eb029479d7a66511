use statrs::statistics::Statistics;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("duplicate column {0}")]
    DuplicateColumn(String),
    #[error("column {column} has {actual} rows, frame has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("frame has no rows")]
    Empty,
    #[error("column {0} contains a non-finite value after transformation")]
    NonFinite(String),
}

/// Column-major frame of f64 series keyed by a shared, ascending timestamp
/// index. Missing cells are represented as NaN until `forward_fill` /
/// `drop_null_rows` have run; every read-side consumer may assume a clean
/// frame is fully finite.
#[derive(Debug, Clone)]
pub struct PriceFrame {
    timestamps: Vec<i64>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl PriceFrame {
    pub fn new(timestamps: Vec<i64>) -> Self {
        Self {
            timestamps,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Result<&[f64], FrameError> {
        let idx = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FrameError::UnknownColumn(name.to_string()))?;
        Ok(&self.columns[idx])
    }

    pub fn add_column(&mut self, name: &str, values: Vec<f64>) -> Result<(), FrameError> {
        if self.names.iter().any(|n| n == name) {
            return Err(FrameError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.timestamps.len() {
            return Err(FrameError::LengthMismatch {
                column: name.to_string(),
                expected: self.timestamps.len(),
                actual: values.len(),
            });
        }
        self.names.push(name.to_string());
        self.columns.push(values);
        Ok(())
    }

    /// Replaces each NaN cell with the most recent finite value in the same
    /// column. Leading NaNs stay in place for `drop_null_rows` to remove.
    pub fn forward_fill(&mut self) {
        for column in &mut self.columns {
            let mut last = f64::NAN;
            for value in column.iter_mut() {
                if value.is_nan() {
                    *value = last;
                } else {
                    last = *value;
                }
            }
        }
    }

    /// Removes every row that still contains a NaN in any column.
    pub fn drop_null_rows(&mut self) {
        let keep: Vec<bool> = (0..self.len())
            .map(|row| self.columns.iter().all(|col| !col[row].is_nan()))
            .collect();
        self.retain_rows(&keep);
    }

    fn retain_rows(&mut self, keep: &[bool]) {
        let mut iter = keep.iter();
        self.timestamps.retain(|_| *iter.next().unwrap_or(&false));
        for column in &mut self.columns {
            let mut iter = keep.iter();
            column.retain(|_| *iter.next().unwrap_or(&false));
        }
    }

    /// Drops the last `count` rows.
    pub fn truncate_tail(&mut self, count: usize) {
        let remaining = self.len().saturating_sub(count);
        self.timestamps.truncate(remaining);
        for column in &mut self.columns {
            column.truncate(remaining);
        }
    }

    fn drop_head_row(&mut self) {
        if self.is_empty() {
            return;
        }
        self.timestamps.remove(0);
        for column in &mut self.columns {
            column.remove(0);
        }
    }

    /// Splits the frame into (rows before `boundary`, rows at or after
    /// `boundary`) by timestamp.
    pub fn split_at_timestamp(self, boundary: i64) -> (PriceFrame, PriceFrame) {
        let cut = self.timestamps.partition_point(|ts| *ts < boundary);
        let mut head = PriceFrame::new(self.timestamps[..cut].to_vec());
        let mut tail = PriceFrame::new(self.timestamps[cut..].to_vec());
        for (name, column) in self.names.iter().zip(&self.columns) {
            head.names.push(name.clone());
            head.columns.push(column[..cut].to_vec());
            tail.names.push(name.clone());
            tail.columns.push(column[cut..].to_vec());
        }
        (head, tail)
    }

    /// Percent-change transform followed by zero-mean/unit-variance scaling,
    /// applied to every column except `skip`, one column at a time.
    ///
    /// Each column's differencing nulls the first remaining row, which is
    /// dropped from the whole frame before that column is scaled; every later
    /// column therefore operates on a frame already shortened by one row per
    /// processed column. Scaling statistics come from the column's own
    /// remaining rows.
    pub fn percent_change_and_scale(&mut self, skip: &str) -> Result<(), FrameError> {
        for idx in 0..self.columns.len() {
            if self.names[idx] == skip {
                continue;
            }
            if self.is_empty() {
                return Err(FrameError::Empty);
            }

            let column = &mut self.columns[idx];
            let mut previous = column[0];
            column[0] = f64::NAN;
            for value in column.iter_mut().skip(1) {
                let current = *value;
                *value = current / previous - 1.0;
                previous = current;
            }

            self.drop_head_row();

            let column = &mut self.columns[idx];
            if column.iter().any(|v| !v.is_finite()) {
                return Err(FrameError::NonFinite(self.names[idx].clone()));
            }
            scale_in_place(column);
        }
        Ok(())
    }

    /// Materializes the frame as rows of feature values paired with the
    /// `label` column, in timestamp order. Feature order follows column
    /// insertion order with the label column removed.
    pub fn feature_rows(&self, label: &str) -> Result<(Vec<String>, Vec<(Vec<f64>, u8)>), FrameError> {
        let label_idx = self
            .names
            .iter()
            .position(|n| n == label)
            .ok_or_else(|| FrameError::UnknownColumn(label.to_string()))?;

        let feature_names: Vec<String> = self
            .names
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != label_idx)
            .map(|(_, name)| name.clone())
            .collect();

        let rows = (0..self.len())
            .map(|row| {
                let features: Vec<f64> = self
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != label_idx)
                    .map(|(_, col)| col[row])
                    .collect();
                (features, self.columns[label_idx][row] as u8)
            })
            .collect();

        Ok((feature_names, rows))
    }
}

/// Centers to zero mean and divides by the population standard deviation.
/// A constant column stays centered (all zeros) rather than dividing by zero,
/// matching common scaler behavior.
fn scale_in_place(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let mean = values.iter().copied().mean();
    let std_dev = values.iter().copied().population_std_dev();
    for value in values.iter_mut() {
        *value -= mean;
        if std_dev > 0.0 {
            *value /= std_dev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(columns: &[(&str, Vec<f64>)]) -> PriceFrame {
        let len = columns[0].1.len();
        let mut frame = PriceFrame::new((0..len as i64).collect());
        for (name, values) in columns {
            frame.add_column(name, values.clone()).unwrap();
        }
        frame
    }

    #[test]
    fn forward_fill_keeps_leading_nulls() {
        let mut frame = frame_with(&[("a", vec![f64::NAN, 2.0, f64::NAN, 4.0])]);
        frame.forward_fill();
        let col = frame.column("a").unwrap();
        assert!(col[0].is_nan());
        assert_eq!(col[1], 2.0);
        assert_eq!(col[2], 2.0);
        assert_eq!(col[3], 4.0);
    }

    #[test]
    fn drop_null_rows_removes_only_dirty_rows() {
        let mut frame = frame_with(&[
            ("a", vec![f64::NAN, 2.0, 3.0]),
            ("b", vec![1.0, 2.0, 3.0]),
        ]);
        frame.drop_null_rows();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.timestamps(), &[1, 2]);
    }

    #[test]
    fn percent_change_drops_one_row_per_column() {
        let mut frame = frame_with(&[
            ("a", vec![1.0, 2.0, 4.0, 8.0, 16.0]),
            ("b", vec![10.0, 20.0, 30.0, 40.0, 50.0]),
            ("target", vec![0.0, 1.0, 0.0, 1.0, 0.0]),
        ]);
        frame.percent_change_and_scale("target").unwrap();

        // Two feature columns processed, one head row dropped per column.
        assert_eq!(frame.len(), 3);
        for name in ["a", "b"] {
            assert!(frame.column(name).unwrap().iter().all(|v| v.is_finite()));
        }
        // Label column is untouched apart from the dropped rows.
        assert_eq!(frame.column("target").unwrap(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn scaled_columns_have_zero_mean_unit_variance() {
        let mut values = vec![5.0, 7.0, 11.0, 13.0, 29.0, 31.0];
        scale_in_place(&mut values);
        let mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
        let var: f64 = values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_column_scales_to_zeros() {
        let mut values = vec![3.0, 3.0, 3.0];
        scale_in_place(&mut values);
        assert!(values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn split_at_timestamp_partitions_rows() {
        let frame = frame_with(&[("a", vec![1.0, 2.0, 3.0, 4.0])]);
        let (head, tail) = frame.split_at_timestamp(2);
        assert_eq!(head.timestamps(), &[0, 1]);
        assert_eq!(tail.timestamps(), &[2, 3]);
        assert_eq!(head.column("a").unwrap(), &[1.0, 2.0]);
        assert_eq!(tail.column("a").unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn feature_rows_exclude_label_column() {
        let frame = frame_with(&[
            ("a", vec![1.0, 2.0]),
            ("target", vec![1.0, 0.0]),
            ("b", vec![3.0, 4.0]),
        ]);
        let (names, rows) = frame.feature_rows("target").unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(rows[0], (vec![1.0, 3.0], 1));
        assert_eq!(rows[1], (vec![2.0, 4.0], 0));
    }
}
