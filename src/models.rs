use serde::{Deserialize, Serialize};

/// One raw OHLCV row as stored in the per-asset CSV files: unix-second
/// timestamp followed by low, high, open, close and volume. Field order
/// matches the headerless column order on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn values(&self) -> [f64; 5] {
        [self.low, self.high, self.open, self.close, self.volume]
    }
}

/// Label histogram for a binary direction dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCounts {
    pub down: usize,
    pub up: usize,
}

impl ClassCounts {
    pub fn from_labels<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a u8>,
    {
        let mut counts = ClassCounts::default();
        for label in labels {
            if *label == 0 {
                counts.down += 1;
            } else {
                counts.up += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.down + self.up
    }

    pub fn smaller(&self) -> usize {
        self.down.min(self.up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_counts_tally_labels() {
        let counts = ClassCounts::from_labels(&[0, 1, 1, 0, 1]);
        assert_eq!(counts.down, 2);
        assert_eq!(counts.up, 3);
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.smaller(), 2);
    }
}
