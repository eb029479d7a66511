use crate::config::PipelineConfig;
use crate::models::ClassCounts;
use crate::pipeline;
use crate::preprocess::BalancedDataset;
use anyhow::{Context, Result};
use log::info;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form of the prepared splits, for remote training or inspection
/// without re-running the pipeline.
#[derive(Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub version: u32,
    pub sequence_length: usize,
    pub horizon: usize,
    pub target_asset: String,
    pub feature_names: Vec<String>,
    pub train_features: Array3<f64>,
    pub train_labels: Vec<u8>,
    pub validation_features: Array3<f64>,
    pub validation_labels: Vec<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportSummary {
    output: String,
    train_sequences: usize,
    train_counts: ClassCounts,
    validation_sequences: usize,
    validation_counts: ClassCounts,
    feature_names: Vec<String>,
}

/// Runs the data stages only and writes both balanced splits as a bincode
/// snapshot.
pub fn run(pipeline_config: &PipelineConfig, output: &Path) -> Result<()> {
    let (train_set, validation_set) = pipeline::build_splits(pipeline_config)?;

    let snapshot = DatasetSnapshot {
        version: SNAPSHOT_VERSION,
        sequence_length: pipeline_config.sequence_length,
        horizon: pipeline_config.horizon,
        target_asset: pipeline_config.target_asset.clone(),
        feature_names: train_set.feature_names.clone(),
        train_features: train_set.features.clone(),
        train_labels: train_set.labels.clone(),
        validation_features: validation_set.features.clone(),
        validation_labels: validation_set.labels.clone(),
    };

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let encoded = bincode::serialize(&snapshot).context("Failed to serialize dataset snapshot")?;
    fs::write(output, encoded)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote dataset snapshot to {}", output.display());

    let summary = ExportSummary {
        output: output.display().to_string(),
        train_sequences: train_set.len(),
        train_counts: train_set.counts(),
        validation_sequences: validation_set.len(),
        validation_counts: validation_set.counts(),
        feature_names: train_set.feature_names.clone(),
    };
    match serde_json::to_string(&summary) {
        Ok(payload) => println!("TRENDNET_EXPORT_SUMMARY={payload}"),
        Err(err) => log::warn!("Failed to serialize export summary: {err}"),
    }
    Ok(())
}

/// Reads a snapshot back; used by tests and remote consumers.
pub fn load_snapshot(path: &Path) -> Result<(BalancedDataset, BalancedDataset)> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: DatasetSnapshot =
        bincode::deserialize(&bytes).with_context(|| format!("{} is not a valid dataset snapshot", path.display()))?;

    let train_counts = ClassCounts::from_labels(&snapshot.train_labels);
    let validation_counts = ClassCounts::from_labels(&snapshot.validation_labels);
    let train = BalancedDataset {
        features: snapshot.train_features,
        labels: snapshot.train_labels,
        feature_names: snapshot.feature_names.clone(),
        raw_counts: train_counts,
    };
    let validation = BalancedDataset {
        features: snapshot.validation_features,
        labels: snapshot.validation_labels,
        feature_names: snapshot.feature_names,
        raw_counts: validation_counts,
    };
    Ok((train, validation))
}
