use std::fs;
use std::path::{Path, PathBuf};

use dense_core::{ClassifierError, ModelBuilder, ModelStore, TchBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::Device;
use trainer::{
    classification_error, construct_or_load, load_only, resolve_model, DatasetLoader,
    LabelEncoding, MinibatchMetrics, Trainer, TrainerConfig,
};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("trainer_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Two classes split by the line x + y = 0, with a margin around it.
fn write_separable_csv(path: &Path, samples: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = String::new();
    let mut written = 0;
    while written < samples {
        let x: f32 = rng.gen_range(-2.0..2.0);
        let y: f32 = rng.gen_range(-2.0..2.0);
        if (x + y).abs() < 0.3 {
            continue;
        }
        let label = if x + y > 0.0 { 1 } else { 0 };
        out.push_str(&format!("{},{},{}\n", label, x, y));
        written += 1;
    }
    fs::write(path, out).unwrap();
}

fn mean(values: &[MinibatchMetrics]) -> f64 {
    values.iter().map(|m| m.loss).sum::<f64>() / values.len() as f64
}

#[test]
fn loss_falls_on_separable_data() {
    let dir = scratch_dir("improve");
    let csv = dir.join("train.csv");
    write_separable_csv(&csv, 200, 42);

    let config = TrainerConfig {
        learning_rate: 0.1,
        minibatch_size: 20,
        num_minibatches: 300,
        report_interval: 1,
        hidden_widths: vec![16],
        seed: Some(42),
        ..TrainerConfig::default()
    };
    let dataset = config
        .encode_labels(DatasetLoader::load(&csv).unwrap())
        .unwrap();
    assert_eq!((dataset.len(), dataset.feature_dim(), dataset.label_dim()), (200, 2, 2));

    let mut trainer =
        Trainer::with_observer(config, Vec::<MinibatchMetrics>::new()).unwrap();
    let model = trainer
        .train(
            &dataset,
            &dir.join("model.safetensors"),
            TchBackend::seeded(Device::Cpu, 42),
        )
        .unwrap();

    let history = trainer.into_observer();
    assert_eq!(history.len(), 300);
    let tenth = history.len() / 10;
    let early = mean(&history[..tenth]);
    let late = mean(&history[history.len() - tenth..]);
    assert!(late < early, "loss went from {} to {}", early, late);

    assert!(classification_error(&model, &dataset).unwrap() < 0.2);
}

#[test]
fn construct_then_reload_round_trips() {
    let dir = scratch_dir("round_trip");
    let csv = dir.join("train.csv");
    let model_path = dir.join("nested").join("model.safetensors");
    write_separable_csv(&csv, 60, 7);

    let config = TrainerConfig {
        learning_rate: 0.05,
        minibatch_size: 16,
        num_minibatches: 20,
        report_interval: 5,
        seed: Some(1),
        ..TrainerConfig::default()
    };
    assert!(!ModelStore::exists(&model_path));
    let trained = construct_or_load(&csv, &model_path, &config).unwrap();
    assert!(ModelStore::exists(&model_path));

    let reloaded = load_only(&model_path).unwrap();
    assert_eq!(reloaded.architecture(), trained.architecture());
    let probe = [0.25, -1.0, 1.5, 1.5, -2.0, 0.1];
    let a = trained.predict(&probe, 3).unwrap();
    let b = reloaded.predict(&probe, 3).unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() <= 1e-6, "{} vs {}", x, y);
    }

    // A second run resumes from the checkpoint instead of rebuilding.
    let dataset = config
        .encode_labels(DatasetLoader::load(&csv).unwrap())
        .unwrap();
    let resolved = resolve_model(&model_path, &dataset, &[50], TchBackend::cpu()).unwrap();
    assert!(resolved.is_loaded());
    let resumed = construct_or_load(&csv, &model_path, &config).unwrap();
    assert_ne!(resumed.parameters().unwrap(), trained.parameters().unwrap());
}

#[test]
fn divergence_aborts_without_touching_the_checkpoint() {
    let dir = scratch_dir("diverge");
    let csv = dir.join("huge.csv");
    let model_path = dir.join("model.safetensors");

    let row = |label: u8, sign: f32| {
        let values: Vec<String> = (0..10).map(|_| format!("{:e}", sign * 3.0e38)).collect();
        format!("{},{}\n", label, values.join(","))
    };
    fs::write(&csv, format!("{}{}", row(0, 1.0), row(1, -1.0))).unwrap();

    let prior = ModelBuilder::build(TchBackend::cpu(), 10, 2, &[50, 50]).unwrap();
    ModelStore::save(&prior, &model_path).unwrap();
    let before = fs::read(&model_path).unwrap();

    let config = TrainerConfig {
        learning_rate: 1e30,
        minibatch_size: 2,
        num_minibatches: 10,
        report_interval: 1,
        hidden_widths: vec![50, 50],
        ..TrainerConfig::default()
    };
    let err = construct_or_load(&csv, &model_path, &config).unwrap_err();
    assert!(
        matches!(err, ClassifierError::NumericalDivergence { .. }),
        "unexpected error: {}",
        err
    );
    assert_eq!(fs::read(&model_path).unwrap(), before);
}

#[test]
fn bad_csv_writes_nothing() {
    let dir = scratch_dir("bad_csv");
    let csv = dir.join("ragged.csv");
    let model_path = dir.join("model.safetensors");
    fs::write(&csv, "0,1.0,2.0\n1,3.0\n").unwrap();

    let err = construct_or_load(&csv, &model_path, &TrainerConfig::default()).unwrap_err();
    assert!(matches!(err, ClassifierError::DataFormat { line: 2, .. }));
    assert!(!model_path.exists());
}

#[test]
fn raw_labels_build_a_single_output_model() {
    let dir = scratch_dir("raw");
    let csv = dir.join("three.csv");
    let model_path = dir.join("model.safetensors");
    fs::write(&csv, "0,1.0,2.0\n1,3.0,4.0\n0,5.0,6.0\n").unwrap();

    let config = TrainerConfig {
        label_encoding: LabelEncoding::Raw,
        minibatch_size: 2,
        num_minibatches: 3,
        report_interval: 1,
        ..TrainerConfig::default()
    };
    let model = construct_or_load(&csv, &model_path, &config).unwrap();
    let shapes: Vec<_> = model
        .architecture()
        .iter()
        .map(|s| (s.output_dim, s.input_dim))
        .collect();
    assert_eq!(shapes, vec![(50, 2), (1, 50)]);
}

#[test]
fn load_only_on_missing_path_is_io() {
    let err = load_only("/no/such/checkpoint.safetensors").unwrap_err();
    match err {
        ClassifierError::Io { source, .. } => {
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
        }
        other => panic!("expected Io, got {}", other),
    }
}
