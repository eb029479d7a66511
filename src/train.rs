use crate::config::TrainingConfig;
use crate::metrics;
use crate::network::DirectionNet;
use crate::optimizer::Adam;
use crate::preprocess::BalancedDataset;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub validation_loss: f64,
    pub validation_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOutcome {
    pub history: Vec<EpochMetrics>,
    pub best_epoch: usize,
    pub best_validation_accuracy: f64,
    pub final_validation_loss: f64,
    pub final_validation_accuracy: f64,
    pub model_path: PathBuf,
    pub checkpoints: Vec<PathBuf>,
}

/// Trains `net` on the balanced datasets for the configured schedule,
/// checkpointing after every epoch and serializing the final model under
/// `run_name`.
pub fn fit(
    net: &mut DirectionNet,
    train: &BalancedDataset,
    validation: &BalancedDataset,
    config: &TrainingConfig,
    run_name: &str,
    seed: u64,
) -> Result<TrainOutcome> {
    config.validate()?;
    fs::create_dir_all(&config.models_dir)
        .with_context(|| format!("Failed to create {}", config.models_dir.display()))?;
    let log_dir = config.logs_dir.join(run_name);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;

    let mut batch_rng = StdRng::seed_from_u64(seed);
    let mut dropout_rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let mut optimizer = Adam::new(config.learning_rate, config.decay);

    let samples = train.len();
    let batches_per_epoch = samples.div_ceil(config.batch_size);
    info!(
        "Training on {} sequences ({} batches of {}) for {} epochs",
        samples, batches_per_epoch, config.batch_size, config.epochs
    );

    let progress = ProgressBar::new(config.epochs as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut history: Vec<EpochMetrics> = Vec::with_capacity(config.epochs);
    let mut checkpoints = Vec::with_capacity(config.epochs);
    let mut best_epoch = 0usize;
    let mut best_validation_accuracy = f64::NEG_INFINITY;
    let mut indices: Vec<usize> = (0..samples).collect();

    for epoch in 0..config.epochs {
        indices.shuffle(&mut batch_rng);

        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        for batch_indices in indices.chunks(config.batch_size) {
            let x_batch = train.features.select(Axis(0), batch_indices);
            let y_batch: Vec<u8> = batch_indices.iter().map(|i| train.labels[*i]).collect();

            optimizer.begin_step();
            let probabilities = net.forward_training(&x_batch, &mut dropout_rng);
            loss_sum += DirectionNet::loss(&probabilities, &y_batch) * y_batch.len() as f64;
            correct += metrics::correct_predictions(&probabilities, &y_batch);
            net.backward(&probabilities, &y_batch, &mut optimizer);
        }

        let train_loss = loss_sum / samples as f64;
        let train_accuracy = correct as f64 / samples as f64;
        let (validation_loss, validation_accuracy) =
            net.evaluate(&validation.features, &validation.labels);

        let entry = EpochMetrics {
            epoch: epoch + 1,
            train_loss,
            train_accuracy,
            validation_loss,
            validation_accuracy,
            learning_rate: optimizer.current_learning_rate(),
        };
        progress.println(format!(
            "epoch {}/{}: loss {:.4} acc {:.4} | val loss {:.4} val acc {:.4}",
            entry.epoch,
            config.epochs,
            train_loss,
            train_accuracy,
            validation_loss,
            validation_accuracy
        ));
        history.push(entry);
        write_history(&log_dir, &history)?;

        let checkpoint = config
            .models_dir
            .join(format!("rnn-{:02}-{:.3}.model", epoch + 1, validation_accuracy));
        net.save(&checkpoint)?;
        checkpoints.push(checkpoint);

        if validation_accuracy > best_validation_accuracy {
            best_validation_accuracy = validation_accuracy;
            best_epoch = epoch + 1;
            info!(
                "Validation accuracy improved to {:.4} at epoch {}",
                validation_accuracy, best_epoch
            );
        }

        progress.set_message(format!(
            "val acc {:.3} (best {:.3})",
            validation_accuracy, best_validation_accuracy
        ));
        progress.inc(1);
    }
    progress.finish_with_message(format!("best val acc {:.3}", best_validation_accuracy));

    let model_path = config.models_dir.join(format!("{run_name}.model"));
    net.save(&model_path)?;
    info!("Saved final model to {}", model_path.display());

    let last = history.last().expect("at least one epoch ran");
    Ok(TrainOutcome {
        best_epoch,
        best_validation_accuracy,
        final_validation_loss: last.validation_loss,
        final_validation_accuracy: last.validation_accuracy,
        history,
        model_path,
        checkpoints,
    })
}

fn write_history(log_dir: &std::path::Path, history: &[EpochMetrics]) -> Result<()> {
    let path = log_dir.join(HISTORY_FILE);
    let file = File::create(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), history)
        .context("Failed to serialize training history")?;
    Ok(())
}
