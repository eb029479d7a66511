use crate::config::{PipelineConfig, TrainingConfig};
use crate::models::ClassCounts;
use crate::network::DirectionNet;
use crate::pipeline;
use crate::preprocess::BalancedDataset;
use crate::train::{fit, TrainOutcome};
use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SplitSummary {
    sequences: usize,
    raw_counts: ClassCounts,
    balanced_counts: ClassCounts,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HyperparameterSummary {
    sequence_length: usize,
    horizon: usize,
    epochs: usize,
    batch_size: usize,
    learning_rate: f64,
    decay: f64,
    seed: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrainSummary {
    run_name: String,
    target_asset: String,
    feature_names: Vec<String>,
    hyperparameters: HyperparameterSummary,
    train: SplitSummary,
    validation: SplitSummary,
    best_epoch: usize,
    best_validation_accuracy: f64,
    final_validation_loss: f64,
    final_validation_accuracy: f64,
    model_path: String,
}

fn summarize(split: &BalancedDataset) -> SplitSummary {
    SplitSummary {
        sequences: split.len(),
        raw_counts: split.raw_counts,
        balanced_counts: split.counts(),
    }
}

/// End-to-end run: ingest, label, split, preprocess, train, checkpoint and
/// serialize the final model.
pub fn run(pipeline_config: &PipelineConfig, training_config: &TrainingConfig) -> Result<()> {
    pipeline_config.validate()?;
    training_config.validate()?;

    let (train_set, validation_set) = pipeline::build_splits(pipeline_config)?;

    let train_counts = train_set.counts();
    let validation_counts = validation_set.counts();
    println!(
        "train data: {} validation: {}",
        train_set.len(),
        validation_set.len()
    );
    println!(
        "train down: {}, up: {}",
        train_counts.down, train_counts.up
    );
    println!(
        "validation down: {}, up: {}",
        validation_counts.down, validation_counts.up
    );
    if validation_set.len() < training_config.batch_size {
        warn!(
            "Validation set ({} sequences) is smaller than one batch; accuracy will be coarse",
            validation_set.len()
        );
    }

    let run_name = format!(
        "{}-seq-{}-pred-{}",
        pipeline_config.sequence_length,
        pipeline_config.horizon,
        Utc::now().timestamp()
    );
    info!("Starting run {run_name}");

    let mut init_rng = StdRng::seed_from_u64(pipeline_config.seed);
    let mut net = DirectionNet::new(
        pipeline_config.sequence_length,
        pipeline_config.horizon,
        train_set.feature_names.clone(),
        &mut init_rng,
    );

    let outcome = fit(
        &mut net,
        &train_set,
        &validation_set,
        training_config,
        &run_name,
        pipeline_config.seed,
    )?;

    println!("Validation loss: {:.6}", outcome.final_validation_loss);
    println!(
        "Validation accuracy: {:.4}",
        outcome.final_validation_accuracy
    );
    println!("Saved model to {}", outcome.model_path.display());

    print_summary(
        pipeline_config,
        training_config,
        &train_set,
        &validation_set,
        &run_name,
        &outcome,
    );
    Ok(())
}

fn print_summary(
    pipeline_config: &PipelineConfig,
    training_config: &TrainingConfig,
    train_set: &BalancedDataset,
    validation_set: &BalancedDataset,
    run_name: &str,
    outcome: &TrainOutcome,
) {
    let summary = TrainSummary {
        run_name: run_name.to_string(),
        target_asset: pipeline_config.target_asset.clone(),
        feature_names: train_set.feature_names.clone(),
        hyperparameters: HyperparameterSummary {
            sequence_length: pipeline_config.sequence_length,
            horizon: pipeline_config.horizon,
            epochs: training_config.epochs,
            batch_size: training_config.batch_size,
            learning_rate: training_config.learning_rate,
            decay: training_config.decay,
            seed: pipeline_config.seed,
        },
        train: summarize(train_set),
        validation: summarize(validation_set),
        best_epoch: outcome.best_epoch,
        best_validation_accuracy: outcome.best_validation_accuracy,
        final_validation_loss: outcome.final_validation_loss,
        final_validation_accuracy: outcome.final_validation_accuracy,
        model_path: outcome.model_path.display().to_string(),
    };

    match serde_json::to_string(&summary) {
        Ok(payload) => println!("TRENDNET_TRAIN_SUMMARY={payload}"),
        Err(err) => warn!("Failed to serialize training summary: {err}"),
    }
}
