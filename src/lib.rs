//! End-to-end trainer for short-term cryptocurrency price direction.
//!
//! The pipeline joins per-asset OHLCV series on their timestamps, labels a
//! target asset against a fixed look-ahead horizon, reserves the last slice
//! of history for validation, normalizes and windows each split, balances
//! the classes by undersampling, and trains a stacked LSTM classifier with
//! validation-accuracy checkpointing.

pub mod commands;
pub mod config;
pub mod dataset;
pub mod frame;
pub mod ingest;
pub mod layers;
pub mod metrics;
pub mod models;
pub mod network;
pub mod optimizer;
pub mod pipeline;
pub mod preprocess;
pub mod train;

pub use config::{PipelineConfig, TrainingConfig};
pub use frame::PriceFrame;
pub use models::{Candle, ClassCounts};
pub use network::DirectionNet;
pub use preprocess::BalancedDataset;
