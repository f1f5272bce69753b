use std::fmt;
use std::path::Path;

use dense_core::{Backend, ClassifierError, Model, ModelBuilder, ModelStore, Result};

use crate::dataset::Dataset;
use crate::TrainerConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinibatchMetrics {
    pub step: usize,
    pub loss: f64,
    pub error: f64,
}

/// Receives metrics every `report_interval` minibatches.
pub trait ProgressObserver {
    fn on_minibatch(&mut self, metrics: &MinibatchMetrics);
}

/// Writes progress through the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_minibatch(&mut self, m: &MinibatchMetrics) {
        log::info!(
            "Minibatch {} | Loss: {:.4} | Error: {:.4}",
            m.step,
            m.loss,
            m.error
        );
    }
}

impl ProgressObserver for Vec<MinibatchMetrics> {
    fn on_minibatch(&mut self, metrics: &MinibatchMetrics) {
        self.push(*metrics);
    }
}

/// Where the model used for training came from.
pub enum ResolvedModel<B: Backend> {
    Loaded(Model<B>),
    Built(Model<B>),
}

impl<B: Backend> ResolvedModel<B> {
    pub fn into_model(self) -> Model<B> {
        match self {
            Self::Loaded(m) | Self::Built(m) => m,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

impl<B: Backend> fmt::Debug for ResolvedModel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded(m) => f.debug_tuple("Loaded").field(m).finish(),
            Self::Built(m) => f.debug_tuple("Built").field(m).finish(),
        }
    }
}

/// Loads the checkpoint at `path` if there is one, otherwise builds a fresh
/// network sized to `dataset`. A loaded model must match the dataset's
/// dimensions.
pub fn resolve_model<B: Backend>(
    path: &Path,
    dataset: &Dataset,
    hidden_widths: &[usize],
    backend: B,
) -> Result<ResolvedModel<B>> {
    if !ModelStore::exists(path) {
        log::info!("No checkpoint at {:?}, building a new model", path);
        let model = ModelBuilder::build(
            backend,
            dataset.feature_dim(),
            dataset.label_dim(),
            hidden_widths,
        )?;
        return Ok(ResolvedModel::Built(model));
    }

    let model = ModelStore::load(path, backend)?;
    if model.input_dim() != dataset.feature_dim() || model.output_dim() != dataset.label_dim() {
        return Err(ClassifierError::corrupt(
            path,
            format!(
                "checkpoint maps {} -> {} but the dataset has {} features and {} labels",
                model.input_dim(),
                model.output_dim(),
                dataset.feature_dim(),
                dataset.label_dim()
            ),
        ));
    }
    Ok(ResolvedModel::Loaded(model))
}

pub struct Trainer<O = LogObserver> {
    config: TrainerConfig,
    observer: O,
}

impl Trainer<LogObserver> {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        Self::with_observer(config, LogObserver)
    }
}

impl<O: ProgressObserver> Trainer<O> {
    pub fn with_observer(config: TrainerConfig, observer: O) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, observer })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// Resolves a model for `dataset`, trains it and saves it to
    /// `existing_model_path`. Nothing is written if any step fails.
    pub fn train<B: Backend>(
        &mut self,
        dataset: &Dataset,
        existing_model_path: &Path,
        backend: B,
    ) -> Result<Model<B>> {
        let resolved = resolve_model(
            existing_model_path,
            dataset,
            &self.config.hidden_widths,
            backend,
        )?;
        let mut model = resolved.into_model();

        self.fit(&mut model, dataset)?;

        ModelStore::save(&model, existing_model_path)?;
        Ok(model)
    }

    /// Runs the minibatch loop on `model` in place.
    pub fn fit<B: Backend>(&mut self, model: &mut Model<B>, dataset: &Dataset) -> Result<()> {
        let cfg = &self.config;
        log::info!(
            "Training for {} minibatches of {} (lr {}) on {} samples",
            cfg.num_minibatches,
            cfg.minibatch_size,
            cfg.learning_rate,
            dataset.len()
        );
        if cfg.minibatch_size > dataset.len() {
            log::warn!(
                "Minibatch size {} exceeds dataset size {}; samples repeat within a batch",
                cfg.minibatch_size,
                dataset.len()
            );
        }

        model.bind_optimizer(cfg.learning_rate)?;

        for step in 0..cfg.num_minibatches {
            let batch = dataset.minibatch(step, cfg.minibatch_size);
            let stats = model.compute_gradients(&batch)?;
            if !stats.loss.is_finite() {
                return Err(ClassifierError::NumericalDivergence {
                    step,
                    loss: stats.loss,
                });
            }
            model.apply_update()?;

            if step % cfg.report_interval == 0 {
                self.observer.on_minibatch(&MinibatchMetrics {
                    step,
                    loss: stats.loss,
                    error: stats.error,
                });
            }
        }
        Ok(())
    }
}
