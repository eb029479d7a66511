use crate::config::PipelineConfig;
use crate::network::DirectionNet;
use crate::pipeline;
use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

/// Rebuilds the validation split with the geometry stored in the model and
/// reports loss, accuracy and class counts.
pub fn run(pipeline_config: &PipelineConfig, model_path: &Path) -> Result<()> {
    let net = DirectionNet::load(model_path)?;
    info!(
        "Loaded model from {} ({} features, sequence length {}, horizon {})",
        model_path.display(),
        net.feature_count(),
        net.sequence_length,
        net.horizon
    );

    // The stored geometry wins over CLI values so the windows match what the
    // network was trained on.
    let config = PipelineConfig {
        sequence_length: net.sequence_length,
        horizon: net.horizon,
        ..pipeline_config.clone()
    };
    let (_, validation_set) = pipeline::build_splits(&config)?;

    if validation_set.feature_names != net.feature_names {
        return Err(anyhow!(
            "Model was trained on features [{}] but the pipeline produced [{}]",
            net.feature_names.join(", "),
            validation_set.feature_names.join(", ")
        ));
    }

    let counts = validation_set.counts();
    let (loss, accuracy) = net.evaluate(&validation_set.features, &validation_set.labels);

    println!(
        "validation: {} (down: {}, up: {})",
        validation_set.len(),
        counts.down,
        counts.up
    );
    println!("Validation loss: {loss:.6}");
    println!("Validation accuracy: {accuracy:.4}");
    Ok(())
}
