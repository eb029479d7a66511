use crate::frame::PriceFrame;
use crate::models::Candle;
use anyhow::{anyhow, Context, Result};
use log::info;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reads one headerless per-asset CSV (time, low, high, open, close, volume)
/// and validates it: every value finite, timestamps strictly ascending.
pub fn load_asset_csv(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut candles = Vec::new();
    for (row, record) in reader.deserialize::<Candle>().enumerate() {
        let candle: Candle =
            record.with_context(|| format!("Malformed row {} in {}", row + 1, path.display()))?;
        if candle.values().iter().any(|v| !v.is_finite()) {
            return Err(anyhow!(
                "Non-finite value at row {} in {}",
                row + 1,
                path.display()
            ));
        }
        if let Some(previous) = candles.last() {
            let previous: &Candle = previous;
            if candle.timestamp <= previous.timestamp {
                return Err(anyhow!(
                    "Timestamps must be strictly ascending in {} (row {}: {} after {})",
                    path.display(),
                    row + 1,
                    candle.timestamp,
                    previous.timestamp
                ));
            }
        }
        candles.push(candle);
    }

    if candles.is_empty() {
        return Err(anyhow!("{} contains no rows", path.display()));
    }

    Ok(candles)
}

fn asset_path(data_dir: &Path, asset: &str) -> PathBuf {
    data_dir.join(format!("{asset}.csv"))
}

/// Loads every asset and joins close/volume onto the first asset's timestamp
/// spine. Timestamps the spine lacks are ignored; spine timestamps an asset
/// lacks become nulls, forward-filled afterwards, with still-null leading
/// rows dropped.
pub fn build_joined_frame(data_dir: &Path, assets: &[String]) -> Result<PriceFrame> {
    if assets.is_empty() {
        return Err(anyhow!("At least one asset is required"));
    }
    let series: Vec<(String, Vec<Candle>)> = assets
        .par_iter()
        .map(|asset| {
            let candles = load_asset_csv(&asset_path(data_dir, asset))?;
            Ok((asset.clone(), candles))
        })
        .collect::<Result<Vec<_>>>()?;

    let spine: Vec<i64> = series[0].1.iter().map(|c| c.timestamp).collect();
    info!(
        "Joining {} assets on a {}-row timestamp spine from {}",
        series.len(),
        spine.len(),
        series[0].0
    );

    let mut frame = PriceFrame::new(spine.clone());
    for (asset, candles) in &series {
        let by_timestamp: HashMap<i64, (f64, f64)> = candles
            .iter()
            .map(|c| (c.timestamp, (c.close, c.volume)))
            .collect();
        let mut closes = Vec::with_capacity(spine.len());
        let mut volumes = Vec::with_capacity(spine.len());
        for ts in &spine {
            match by_timestamp.get(ts) {
                Some((close, volume)) => {
                    closes.push(*close);
                    volumes.push(*volume);
                }
                None => {
                    closes.push(f64::NAN);
                    volumes.push(f64::NAN);
                }
            }
        }
        frame.add_column(&format!("{asset}_close"), closes)?;
        frame.add_column(&format!("{asset}_volume"), volumes)?;
    }

    frame.forward_fill();
    let before = frame.len();
    frame.drop_null_rows();
    if frame.len() < before {
        info!(
            "Dropped {} leading rows that could not be forward-filled",
            before - frame.len()
        );
    }
    if frame.is_empty() {
        return Err(anyhow!(
            "Joined frame is empty after forward-fill; the assets share no usable history"
        ));
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_csv(dir: &Path, asset: &str, rows: &[(i64, f64, f64)]) {
        let mut body = String::new();
        for (ts, close, volume) in rows {
            body.push_str(&format!(
                "{ts},1.0,2.0,1.5,{close},{volume}\n"
            ));
        }
        fs::write(asset_path(dir, asset), body).unwrap();
    }

    #[test]
    fn load_rejects_unsorted_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "AAA-USD", &[(10, 1.0, 1.0), (9, 2.0, 1.0)]);
        let err = load_asset_csv(&asset_path(dir.path(), "AAA-USD")).unwrap_err();
        assert!(err.to_string().contains("strictly ascending"));
    }

    #[test]
    fn load_rejects_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(asset_path(dir.path(), "AAA-USD"), "10,1.0,2.0\n").unwrap();
        assert!(load_asset_csv(&asset_path(dir.path(), "AAA-USD")).is_err());
    }

    #[test]
    fn join_fills_gaps_and_drops_leading_nulls() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "AAA-USD",
            &[(1, 10.0, 1.0), (2, 11.0, 1.0), (3, 12.0, 1.0), (4, 13.0, 1.0)],
        );
        // BBB starts later and skips the spine timestamp 3.
        write_csv(dir.path(), "BBB-USD", &[(2, 20.0, 2.0), (4, 22.0, 2.0)]);

        let assets = vec!["AAA-USD".to_string(), "BBB-USD".to_string()];
        let frame = build_joined_frame(dir.path(), &assets).unwrap();

        // Timestamp 1 has no BBB value to fill from and is dropped.
        assert_eq!(frame.timestamps(), &[2, 3, 4]);
        assert_eq!(frame.column("BBB-USD_close").unwrap(), &[20.0, 20.0, 22.0]);
        assert_eq!(frame.column("AAA-USD_close").unwrap(), &[11.0, 12.0, 13.0]);
    }

    #[test]
    fn join_fails_without_overlap() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "AAA-USD", &[(1, 10.0, 1.0)]);
        write_csv(dir.path(), "BBB-USD", &[(5, 20.0, 2.0)]);
        let assets = vec!["AAA-USD".to_string(), "BBB-USD".to_string()];
        assert!(build_joined_frame(dir.path(), &assets).is_err());
    }
}
