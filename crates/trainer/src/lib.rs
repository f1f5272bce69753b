pub mod dataset;
pub mod train;

pub use dataset::{Dataset, DatasetLoader};
pub use train::{
    resolve_model, LogObserver, MinibatchMetrics, ProgressObserver, ResolvedModel, Trainer,
};

use std::fs;
use std::path::Path;

use dense_core::{argmax, Backend, ClassifierError, Model, ModelStore, Result, TchBackend};
use serde::{Deserialize, Serialize};
use tch::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelEncoding {
    /// Class index in column 0 becomes a one-hot row.
    #[default]
    OneHot,
    /// Column 0 is used as a length-1 label vector.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub minibatch_size: usize,
    pub num_minibatches: usize,
    pub report_interval: usize,
    pub hidden_widths: Vec<usize>,
    pub label_encoding: LabelEncoding,
    /// Class count for one-hot encoding; inferred from the labels when unset.
    pub num_classes: Option<usize>,
    pub seed: Option<i64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            minibatch_size: 64,
            num_minibatches: 1000,
            report_interval: 100,
            hidden_widths: vec![50],
            label_encoding: LabelEncoding::OneHot,
            num_classes: None,
            seed: None,
        }
    }
}

impl TrainerConfig {
    /// Reads a YAML config, or returns the defaults when `path` does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| ClassifierError::io(path, e))?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| ClassifierError::InvalidConfig(format!("{:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ClassifierError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.minibatch_size == 0 {
            return Err(ClassifierError::InvalidConfig(
                "minibatch_size must be positive".to_string(),
            ));
        }
        if self.report_interval == 0 {
            return Err(ClassifierError::InvalidConfig(
                "report_interval must be at least 1".to_string(),
            ));
        }
        if self.num_classes == Some(0) {
            return Err(ClassifierError::InvalidConfig(
                "num_classes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies the configured label encoding to a freshly parsed dataset.
    pub fn encode_labels(&self, dataset: Dataset) -> Result<Dataset> {
        match self.label_encoding {
            LabelEncoding::Raw => Ok(dataset),
            LabelEncoding::OneHot => {
                let classes = match self.num_classes {
                    Some(n) => n,
                    None => dataset.inferred_classes()?,
                };
                dataset.one_hot(classes)
            }
        }
    }

    fn backend(&self, device: Device) -> TchBackend {
        match self.seed {
            Some(seed) => TchBackend::seeded(device, seed),
            None => TchBackend::new(device),
        }
    }
}

/// Trains on `csv_path`, starting from the checkpoint at `model_path` when
/// one exists, and writes the result back to `model_path`.
pub fn construct_or_load<P: AsRef<Path>, Q: AsRef<Path>>(
    csv_path: P,
    model_path: Q,
    config: &TrainerConfig,
) -> Result<Model<TchBackend>> {
    construct_or_load_on(csv_path, model_path, config, Device::Cpu)
}

pub fn construct_or_load_on<P: AsRef<Path>, Q: AsRef<Path>>(
    csv_path: P,
    model_path: Q,
    config: &TrainerConfig,
    device: Device,
) -> Result<Model<TchBackend>> {
    let mut trainer = Trainer::new(config.clone())?;
    let dataset = config.encode_labels(DatasetLoader::load(csv_path)?)?;
    trainer.train(&dataset, model_path.as_ref(), config.backend(device))
}

/// Loads a checkpoint without training.
pub fn load_only<P: AsRef<Path>>(model_path: P) -> Result<Model<TchBackend>> {
    load_only_on(model_path, Device::Cpu)
}

pub fn load_only_on<P: AsRef<Path>>(model_path: P, device: Device) -> Result<Model<TchBackend>> {
    ModelStore::load(model_path, TchBackend::new(device))
}

/// Fraction of samples whose predicted class differs from the label's argmax.
pub fn classification_error<B: Backend>(model: &Model<B>, dataset: &Dataset) -> Result<f64> {
    let predicted = model.classify(dataset.features(), dataset.len())?;
    let wrong = predicted
        .iter()
        .enumerate()
        .filter(|&(i, &class)| {
            let (_, label) = dataset.sample(i);
            class != expected_class(label)
        })
        .count();
    Ok(wrong as f64 / dataset.len() as f64)
}

fn expected_class(label: &[f32]) -> usize {
    if label.len() == 1 {
        return label[0].max(0.0) as usize;
    }
    argmax(label)
}
