use crate::config::PipelineConfig;
use crate::dataset;
use crate::ingest;
use crate::preprocess::{self, BalancedDataset};
use anyhow::{Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Runs ingestion through class balancing and returns the
/// (training, validation) datasets. Both splits are preprocessed
/// independently with their own normalization statistics.
pub fn build_splits(config: &PipelineConfig) -> Result<(BalancedDataset, BalancedDataset)> {
    config.validate()?;

    let mut frame = ingest::build_joined_frame(&config.data_dir, &config.assets)
        .context("Ingestion failed")?;
    dataset::attach_direction_labels(&mut frame, &config.target_asset, config.horizon)?;
    let (train_frame, validation_frame) =
        dataset::split_last_fraction(frame, config.validation_fraction)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let train = preprocess::prepare_split(train_frame, config.sequence_length, &mut rng)
        .context("Training split preprocessing failed")?;
    let validation = preprocess::prepare_split(validation_frame, config.sequence_length, &mut rng)
        .context("Validation split preprocessing failed")?;

    info!(
        "Prepared {} training and {} validation sequences over {} features",
        train.len(),
        validation.len(),
        train.feature_names.len()
    );
    Ok((train, validation))
}
