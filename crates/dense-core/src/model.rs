use std::fmt;

use crate::backend::{Backend, Minibatch, ParamInit, StepStats};
use crate::config::{validate_chain, LayerSpec, ModelConfig};
use crate::error::{ClassifierError, Result};

pub(crate) fn weight_name(index: usize) -> String {
    format!("layer{}_weight", index)
}

pub(crate) fn bias_name(index: usize) -> String {
    format!("layer{}_bias", index)
}

/// Dense layer: `activation(weight · x + bias)`.
pub struct Layer<B: Backend> {
    pub spec: LayerSpec,
    pub weight: B::Param,
    pub bias: B::Param,
}

/// Weight and bias values of one layer, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerParameters {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

/// A stack of dense layers together with the backend holding their parameters.
pub struct Model<B: Backend> {
    backend: B,
    layers: Vec<Layer<B>>,
}

impl<B: Backend> Model<B> {
    /// Rebuilds a model from stored parameter values. `parameters` must line
    /// up with `specs` one-to-one.
    pub fn from_parameters(
        mut backend: B,
        specs: &[LayerSpec],
        parameters: &[LayerParameters],
    ) -> Result<Self> {
        validate_chain(specs)?;
        if specs.len() != parameters.len() {
            return Err(ClassifierError::InvalidShape(format!(
                "{} layer specs but {} parameter sets",
                specs.len(),
                parameters.len()
            )));
        }

        let mut layers = Vec::with_capacity(specs.len());
        for (i, (spec, params)) in specs.iter().zip(parameters).enumerate() {
            let [rows, cols] = spec.weight_shape();
            if params.weight.len() != rows * cols || params.bias.len() != spec.output_dim {
                return Err(ClassifierError::InvalidShape(format!(
                    "layer {} expects {}x{} weights and {} biases, got {} and {}",
                    i,
                    rows,
                    cols,
                    spec.output_dim,
                    params.weight.len(),
                    params.bias.len()
                )));
            }
            let weight = backend.allocate_parameter(
                &weight_name(i),
                &spec.weight_shape(),
                ParamInit::Values(&params.weight),
            )?;
            let bias = backend.allocate_parameter(
                &bias_name(i),
                &[spec.output_dim],
                ParamInit::Values(&params.bias),
            )?;
            layers.push(Layer {
                spec: *spec,
                weight,
                bias,
            });
        }

        Ok(Self { backend, layers })
    }

    pub fn layers(&self) -> &[Layer<B>] {
        &self.layers
    }

    pub fn architecture(&self) -> Vec<LayerSpec> {
        self.layers.iter().map(|l| l.spec).collect()
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].spec.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].spec.output_dim
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Activated outputs, `rows * output_dim` values row-major.
    pub fn predict(&self, features: &[f32], rows: usize) -> Result<Vec<f32>> {
        if rows == 0 || features.len() != rows * self.input_dim() {
            return Err(ClassifierError::InvalidShape(format!(
                "expected {} rows of {} features, got {} values",
                rows,
                self.input_dim(),
                features.len()
            )));
        }
        self.backend.compute_forward(&self.layers, features, rows)
    }

    /// Index of the highest-scoring output per row.
    pub fn classify(&self, features: &[f32], rows: usize) -> Result<Vec<usize>> {
        let outputs = self.predict(features, rows)?;
        Ok(outputs
            .chunks_exact(self.output_dim())
            .map(argmax)
            .collect())
    }

    pub fn parameters(&self) -> Result<Vec<LayerParameters>> {
        self.layers
            .iter()
            .map(|layer| {
                Ok(LayerParameters {
                    weight: self.backend.parameter_values(&layer.weight)?,
                    bias: self.backend.parameter_values(&layer.bias)?,
                })
            })
            .collect()
    }

    pub fn bind_optimizer(&mut self, learning_rate: f64) -> Result<()> {
        self.backend.bind_optimizer(learning_rate)
    }

    /// Forward and backward pass for `batch`; parameters are not touched
    /// until [`Model::apply_update`].
    pub fn compute_gradients(&mut self, batch: &Minibatch) -> Result<StepStats> {
        if batch.rows == 0
            || batch.features.len() != batch.rows * self.input_dim()
            || batch.labels.len() != batch.rows * self.output_dim()
        {
            return Err(ClassifierError::InvalidShape(format!(
                "minibatch of {} rows does not fit a {} -> {} model",
                batch.rows,
                self.input_dim(),
                self.output_dim()
            )));
        }
        self.backend.compute_loss_and_gradients(&self.layers, batch)
    }

    pub fn apply_update(&mut self) -> Result<()> {
        self.backend.apply_optimizer_step()
    }
}

impl<B: Backend> fmt::Debug for Model<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("architecture", &self.architecture())
            .finish()
    }
}

/// Index of the first largest value in `row`.
pub fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}

pub struct ModelBuilder;

impl ModelBuilder {
    /// Fresh network: ReLU hidden layers, softmax output, Glorot-uniform
    /// weights and zero biases.
    pub fn build<B: Backend>(
        mut backend: B,
        feature_dim: usize,
        label_dim: usize,
        hidden_widths: &[usize],
    ) -> Result<Model<B>> {
        let config = ModelConfig {
            hidden_widths: hidden_widths.to_vec(),
        };
        let specs = config.layer_specs(feature_dim, label_dim)?;

        let mut layers = Vec::with_capacity(specs.len());
        for (i, spec) in specs.into_iter().enumerate() {
            let weight = backend.allocate_parameter(
                &weight_name(i),
                &spec.weight_shape(),
                ParamInit::GlorotUniform,
            )?;
            let bias =
                backend.allocate_parameter(&bias_name(i), &[spec.output_dim], ParamInit::Zeros)?;
            layers.push(Layer { spec, weight, bias });
        }
        log::debug!(
            "Built dense model {} -> {:?} -> {}",
            feature_dim,
            hidden_widths,
            label_dim
        );

        Ok(Model { backend, layers })
    }
}
