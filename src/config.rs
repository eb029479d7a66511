use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::PathBuf;

pub const DEFAULT_SEQUENCE_LENGTH: usize = 60;
pub const DEFAULT_HORIZON: usize = 3;
pub const DEFAULT_TARGET_ASSET: &str = "LTC-USD";
pub const DEFAULT_ASSETS: [&str; 4] = ["BTC-USD", "LTC-USD", "BCH-USD", "ETH-USD"];
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.05;
pub const DEFAULT_EPOCHS: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;
pub const DEFAULT_DECAY: f64 = 1e-6;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_DATA_DIR: &str = "training_datas";
pub const DEFAULT_MODELS_DIR: &str = "models";
pub const DEFAULT_LOGS_DIR: &str = "logs";

/// Everything the data-preparation stages need: where the CSVs live, which
/// assets to join, which one to label, and the windowing geometry.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub assets: Vec<String>,
    pub target_asset: String,
    pub sequence_length: usize,
    pub horizon: usize,
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            assets: DEFAULT_ASSETS.iter().map(|a| a.to_string()).collect(),
            target_asset: DEFAULT_TARGET_ASSET.to_string(),
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            horizon: DEFAULT_HORIZON,
            validation_fraction: DEFAULT_VALIDATION_FRACTION,
            seed: DEFAULT_SEED,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.assets.is_empty() {
            return Err(anyhow!("At least one asset is required"));
        }
        let unique: HashSet<&String> = self.assets.iter().collect();
        if unique.len() != self.assets.len() {
            return Err(anyhow!("Asset list contains duplicates"));
        }
        if !self.assets.contains(&self.target_asset) {
            return Err(anyhow!(
                "Target asset {} must be one of the joined assets",
                self.target_asset
            ));
        }
        if self.sequence_length == 0 {
            return Err(anyhow!("Sequence length must be positive"));
        }
        if self.horizon == 0 {
            return Err(anyhow!("Prediction horizon must be positive"));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(anyhow!(
                "Validation fraction must be in (0, 1) (value: {})",
                self.validation_fraction
            ));
        }
        Ok(())
    }
}

/// Optimizer schedule and artifact locations for a training run.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub decay: f64,
    pub models_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            decay: DEFAULT_DECAY,
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(anyhow!("Epoch count must be positive"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("Batch size must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(anyhow!(
                "Learning rate must be a positive number (value: {})",
                self.learning_rate
            ));
        }
        if !(self.decay.is_finite() && self.decay >= 0.0) {
            return Err(anyhow!(
                "Learning-rate decay must be non-negative (value: {})",
                self.decay
            ));
        }
        Ok(())
    }
}
