pub mod evaluate;
pub mod export_dataset;
pub mod train;
