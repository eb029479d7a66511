use std::fs;
use std::path::Path;
use trendnet::commands::export_dataset;
use trendnet::config::{PipelineConfig, TrainingConfig};
use trendnet::network::DirectionNet;
use trendnet::{pipeline, train};

const ASSETS: [&str; 4] = ["AAA-USD", "BBB-USD", "CCC-USD", "DDD-USD"];
const TARGET_ASSET: &str = "BBB-USD";
const ROWS: usize = 400;
const SEQUENCE_LENGTH: usize = 6;
const HORIZON: usize = 3;
const VALIDATION_FRACTION: f64 = 0.1;
const SEED: u64 = 1234;
const BASE_TIMESTAMP: i64 = 1_600_000_000;

/// Sawtooth close for the labeled asset: rises for six steps, then drops.
/// Mixes up and down labels deterministically.
fn target_close(step: usize) -> f64 {
    100.0 + (step % 7) as f64 * 2.0
}

fn write_fixtures(dir: &Path) {
    for (asset_index, asset) in ASSETS.iter().enumerate() {
        let mut body = String::new();
        for step in 0..ROWS {
            let close = if *asset == TARGET_ASSET {
                target_close(step)
            } else {
                50.0 + ((step * (asset_index + 2)) % 5) as f64
            };
            let volume = 1_000.0 + step as f64 + asset_index as f64 * 10.0;
            let timestamp = BASE_TIMESTAMP + step as i64 * 60;
            body.push_str(&format!(
                "{timestamp},{:.2},{:.2},{:.2},{close:.2},{volume:.2}\n",
                close - 1.0,
                close + 1.0,
                close
            ));
        }
        fs::write(dir.join(format!("{asset}.csv")), body).unwrap();
    }
}

fn fixture_config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: dir.to_path_buf(),
        assets: ASSETS.iter().map(|a| a.to_string()).collect(),
        target_asset: TARGET_ASSET.to_string(),
        sequence_length: SEQUENCE_LENGTH,
        horizon: HORIZON,
        validation_fraction: VALIDATION_FRACTION,
        seed: SEED,
    }
}

/// Direction labels over the full synthetic history, recomputed from the
/// strict greater-than rule.
fn expected_labels() -> Vec<u8> {
    (0..ROWS - HORIZON)
        .map(|step| u8::from(target_close(step + HORIZON) > target_close(step)))
        .collect()
}

fn count_ups(labels: &[u8]) -> usize {
    labels.iter().filter(|l| **l == 1).count()
}

#[test]
fn pipeline_produces_the_predicted_sizes_and_balance() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let (train_set, validation_set) = pipeline::build_splits(&fixture_config(dir.path())).unwrap();

    let labels = expected_labels();
    let labeled_rows = ROWS - HORIZON;
    let reserved = (VALIDATION_FRACTION * labeled_rows as f64) as usize;
    let train_rows = labeled_rows - reserved;
    let feature_count = ASSETS.len() * 2;

    // One head row is dropped per feature column during normalization.
    let cleaned_train_rows = train_rows - feature_count;
    let expected_train_windows = cleaned_train_rows - SEQUENCE_LENGTH + 1;
    let cleaned_validation_rows = reserved - feature_count;
    let expected_validation_windows = cleaned_validation_rows - SEQUENCE_LENGTH + 1;

    assert_eq!(train_set.feature_names.len(), feature_count);
    assert_eq!(train_set.raw_counts.total(), expected_train_windows);
    assert_eq!(
        validation_set.raw_counts.total(),
        expected_validation_windows
    );

    // Window labels are the labels of each window's last row.
    let train_window_labels = &labels[feature_count + SEQUENCE_LENGTH - 1..train_rows];
    let train_ups = count_ups(train_window_labels);
    assert_eq!(train_set.raw_counts.up, train_ups);
    assert_eq!(
        train_set.raw_counts.down,
        train_window_labels.len() - train_ups
    );

    let validation_window_labels =
        &labels[train_rows + feature_count + SEQUENCE_LENGTH - 1..labeled_rows];
    let validation_ups = count_ups(validation_window_labels);
    assert_eq!(validation_set.raw_counts.up, validation_ups);

    // Undersampling leaves an exact 50/50 balance at twice the minority size.
    let train_counts = train_set.counts();
    assert_eq!(train_counts.up, train_counts.down);
    assert_eq!(train_set.len(), 2 * train_set.raw_counts.smaller());

    let validation_counts = validation_set.counts();
    assert_eq!(validation_counts.up, validation_counts.down);
    assert_eq!(
        validation_set.len(),
        2 * validation_set.raw_counts.smaller()
    );

    // Every window carries the full sequence length.
    assert_eq!(
        train_set.features.dim(),
        (train_set.len(), SEQUENCE_LENGTH, feature_count)
    );
}

#[test]
fn the_same_seed_reproduces_the_same_dataset() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = fixture_config(dir.path());

    let (first_train, first_validation) = pipeline::build_splits(&config).unwrap();
    let (second_train, second_validation) = pipeline::build_splits(&config).unwrap();

    assert_eq!(first_train.labels, second_train.labels);
    assert_eq!(first_train.features, second_train.features);
    assert_eq!(first_validation.labels, second_validation.labels);
    assert_eq!(first_validation.features, second_validation.features);
}

#[test]
fn training_writes_checkpoints_and_a_loadable_model() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = fixture_config(dir.path());
    let (train_set, validation_set) = pipeline::build_splits(&config).unwrap();

    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(SEED);
    let mut net = DirectionNet::with_units(
        SEQUENCE_LENGTH,
        HORIZON,
        train_set.feature_names.clone(),
        8,
        4,
        &mut rng,
    );

    let training_config = TrainingConfig {
        epochs: 2,
        batch_size: 32,
        learning_rate: 0.005,
        decay: 0.0,
        models_dir: dir.path().join("models"),
        logs_dir: dir.path().join("logs"),
    };
    let outcome = train::fit(
        &mut net,
        &train_set,
        &validation_set,
        &training_config,
        "pipeline-test",
        SEED,
    )
    .unwrap();

    assert_eq!(outcome.history.len(), 2);
    assert_eq!(outcome.checkpoints.len(), 2);
    for checkpoint in &outcome.checkpoints {
        assert!(checkpoint.exists(), "{} missing", checkpoint.display());
    }
    assert!(outcome.model_path.exists());
    assert!(dir.path().join("logs/pipeline-test/history.json").exists());

    let restored = DirectionNet::load(&outcome.model_path).unwrap();
    assert_eq!(restored.sequence_length, SEQUENCE_LENGTH);
    assert_eq!(restored.horizon, HORIZON);
    let (loss, accuracy) = restored.evaluate(&validation_set.features, &validation_set.labels);
    assert!(loss.is_finite());
    assert!((0.0..=1.0).contains(&accuracy));
}

#[test]
fn exported_snapshots_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let config = fixture_config(dir.path());
    let output = dir.path().join("snapshots/dataset.bin");

    export_dataset::run(&config, &output).unwrap();
    assert!(output.exists());

    let (train_set, validation_set) = pipeline::build_splits(&config).unwrap();
    let (restored_train, restored_validation) = export_dataset::load_snapshot(&output).unwrap();

    assert_eq!(restored_train.labels, train_set.labels);
    assert_eq!(restored_train.features, train_set.features);
    assert_eq!(restored_validation.labels, validation_set.labels);
    assert_eq!(restored_train.feature_names, train_set.feature_names);
}
