use crate::error::Result;
use crate::model::Layer;

/// Row-major feature and label buffers for one optimizer step.
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    pub features: Vec<f32>,
    pub labels: Vec<f32>,
    pub rows: usize,
}

impl Minibatch {
    pub fn feature_dim(&self) -> usize {
        self.features.len() / self.rows.max(1)
    }

    pub fn label_dim(&self) -> usize {
        self.labels.len() / self.rows.max(1)
    }
}

/// Loss and classification error averaged over a minibatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepStats {
    pub loss: f64,
    pub error: f64,
}

#[derive(Debug, Clone, Copy)]
pub enum ParamInit<'a> {
    /// U(-b, b) with b = sqrt(6 / (fan_in + fan_out)), shape `[fan_out, fan_in]`.
    GlorotUniform,
    Zeros,
    /// Exact values in row-major order.
    Values(&'a [f32]),
}

/// Numerical engine behind a [`crate::Model`].
///
/// The backend owns parameter storage; layers only hold `Param` handles
/// returned by [`Backend::allocate_parameter`].
pub trait Backend: Sized {
    type Param;

    fn allocate_parameter(
        &mut self,
        name: &str,
        shape: &[usize],
        init: ParamInit<'_>,
    ) -> Result<Self::Param>;

    /// Current values of `param`, row-major.
    fn parameter_values(&self, param: &Self::Param) -> Result<Vec<f32>>;

    /// Activated output of the last layer for `rows` input rows.
    fn compute_forward(&self, layers: &[Layer<Self>], features: &[f32], rows: usize)
        -> Result<Vec<f32>>;

    /// Softmax cross-entropy against `batch.labels`; leaves gradients on the
    /// parameters for the next [`Backend::apply_optimizer_step`].
    fn compute_loss_and_gradients(
        &mut self,
        layers: &[Layer<Self>],
        batch: &Minibatch,
    ) -> Result<StepStats>;

    /// Binds plain SGD over every allocated parameter.
    fn bind_optimizer(&mut self, learning_rate: f64) -> Result<()>;

    fn apply_optimizer_step(&mut self) -> Result<()>;
}
