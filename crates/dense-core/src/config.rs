use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Identity,
    Relu,
    Softmax,
}

/// Shape and activation of one fully-connected layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub input_dim: usize,
    pub output_dim: usize,
    pub activation: Activation,
}

impl LayerSpec {
    pub fn new(input_dim: usize, output_dim: usize, activation: Activation) -> Self {
        Self {
            input_dim,
            output_dim,
            activation,
        }
    }

    /// Shape of the weight matrix: `[output_dim, input_dim]`.
    pub fn weight_shape(&self) -> [usize; 2] {
        [self.output_dim, self.input_dim]
    }
}

/// Checks that `specs` is non-empty, has no zero-sized layer, and that every
/// layer feeds the next one.
pub fn validate_chain(specs: &[LayerSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(ClassifierError::InvalidShape(
            "architecture has no layers".to_string(),
        ));
    }
    for (i, spec) in specs.iter().enumerate() {
        if spec.input_dim == 0 || spec.output_dim == 0 {
            return Err(ClassifierError::InvalidShape(format!(
                "layer {} has a zero dimension ({} -> {})",
                i, spec.input_dim, spec.output_dim
            )));
        }
    }
    for (i, pair) in specs.windows(2).enumerate() {
        if pair[0].output_dim != pair[1].input_dim {
            return Err(ClassifierError::InvalidShape(format!(
                "layer {} outputs {} but layer {} expects {}",
                i,
                pair[0].output_dim,
                i + 1,
                pair[1].input_dim
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of each hidden ReLU layer, input side first.
    pub hidden_widths: Vec<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_widths: vec![50],
        }
    }
}

impl ModelConfig {
    /// The layer stack for a network mapping `feature_dim` inputs to
    /// `label_dim` softmax outputs.
    pub fn layer_specs(&self, feature_dim: usize, label_dim: usize) -> Result<Vec<LayerSpec>> {
        if feature_dim == 0 || label_dim == 0 {
            return Err(ClassifierError::InvalidShape(format!(
                "feature_dim={} label_dim={} must both be positive",
                feature_dim, label_dim
            )));
        }
        if let Some(pos) = self.hidden_widths.iter().position(|&w| w == 0) {
            return Err(ClassifierError::InvalidShape(format!(
                "hidden layer {} has width 0",
                pos
            )));
        }

        let mut specs = Vec::with_capacity(self.hidden_widths.len() + 1);
        let mut fan_in = feature_dim;
        for &width in &self.hidden_widths {
            specs.push(LayerSpec::new(fan_in, width, Activation::Relu));
            fan_in = width;
        }
        specs.push(LayerSpec::new(fan_in, label_dim, Activation::Softmax));
        Ok(specs)
    }
}
