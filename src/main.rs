use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use trendnet::commands::{evaluate, export_dataset, train};
use trendnet::config::{self, PipelineConfig, TrainingConfig};

#[derive(Parser)]
#[command(name = "trendnet")]
#[command(about = "Recurrent network trainer for short-term crypto price direction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineArgs {
    /// Directory holding one <ASSET>.csv per asset
    #[arg(long = "data-dir", value_name = "PATH", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    /// Assets to join (close and volume columns each)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    assets: Option<Vec<String>>,
    /// Asset whose future close defines the label
    #[arg(long = "target-asset", default_value = config::DEFAULT_TARGET_ASSET)]
    target_asset: String,
    /// Steps of history per model input
    #[arg(long = "sequence-length", default_value_t = config::DEFAULT_SEQUENCE_LENGTH)]
    sequence_length: usize,
    /// Steps ahead the label looks
    #[arg(long, default_value_t = config::DEFAULT_HORIZON)]
    horizon: usize,
    /// Fraction of trailing timestamps reserved for validation
    #[arg(long = "validation-fraction", default_value_t = config::DEFAULT_VALIDATION_FRACTION)]
    validation_fraction: f64,
    /// Seed for every shuffle, dropout mask and weight initialization
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    seed: u64,
}

impl PipelineArgs {
    fn into_config(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            data_dir: self.data_dir,
            assets: self.assets.unwrap_or(defaults.assets),
            target_asset: self.target_asset,
            sequence_length: self.sequence_length,
            horizon: self.horizon,
            validation_fraction: self.validation_fraction,
            seed: self.seed,
        }
    }
}

#[derive(Args)]
struct ScheduleArgs {
    /// Number of passes over the training data
    #[arg(long, default_value_t = config::DEFAULT_EPOCHS)]
    epochs: usize,
    /// Sequences per optimizer step
    #[arg(long = "batch-size", default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Adam base learning rate
    #[arg(long = "learning-rate", default_value_t = config::DEFAULT_LEARNING_RATE)]
    learning_rate: f64,
    /// Per-step learning-rate decay
    #[arg(long, default_value_t = config::DEFAULT_DECAY)]
    decay: f64,
    /// Directory for checkpoints and the final model
    #[arg(long = "models-dir", value_name = "PATH", default_value = config::DEFAULT_MODELS_DIR)]
    models_dir: PathBuf,
    /// Directory for per-run training history
    #[arg(long = "logs-dir", value_name = "PATH", default_value = config::DEFAULT_LOGS_DIR)]
    logs_dir: PathBuf,
}

impl ScheduleArgs {
    fn into_config(self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            decay: self.decay,
            models_dir: self.models_dir,
            logs_dir: self.logs_dir,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and train a model
    Train {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    /// Rebuild the validation split and score a saved model
    Evaluate {
        /// Path to a saved model file
        #[arg(long, value_name = "PATH")]
        model: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Run the data stages only and write both splits as a snapshot
    ExportDataset {
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH", default_value = "dataset.bin")]
        output: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train { pipeline, schedule } => {
            train::run(&pipeline.into_config(), &schedule.into_config())
        }
        Commands::Evaluate { model, pipeline } => {
            evaluate::run(&pipeline.into_config(), &model)
        }
        Commands::ExportDataset { output, pipeline } => {
            export_dataset::run(&pipeline.into_config(), &output)
        }
    }
}
