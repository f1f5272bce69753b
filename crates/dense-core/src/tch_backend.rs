use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};

use crate::backend::{Backend, Minibatch, ParamInit, StepStats};
use crate::config::Activation;
use crate::error::{ClassifierError, Result};
use crate::model::Layer;

/// libtorch-backed parameters and SGD, one `VarStore` per model.
pub struct TchBackend {
    vs: nn::VarStore,
    optimizer: Option<nn::Optimizer>,
}

impl TchBackend {
    pub fn new(device: Device) -> Self {
        Self {
            vs: nn::VarStore::new(device),
            optimizer: None,
        }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }

    /// Seeds libtorch's global generator before creating the store, so that
    /// parameters allocated afterwards are reproducible.
    pub fn seeded(device: Device, seed: i64) -> Self {
        tch::manual_seed(seed);
        Self::new(device)
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }
}

impl Default for TchBackend {
    fn default() -> Self {
        Self::cpu()
    }
}

fn matrix(data: &[f32], rows: usize, cols: usize, device: Device) -> Tensor {
    Tensor::from_slice(data)
        .view([rows as i64, cols as i64])
        .to_device(device)
}

fn activate(x: Tensor, activation: Activation) -> Tensor {
    match activation {
        Activation::Identity => x,
        Activation::Relu => x.relu(),
        Activation::Softmax => x.softmax(-1, Kind::Float),
    }
}

/// Runs every layer, leaving the last one's output un-activated.
fn forward_logits(layers: &[Layer<TchBackend>], x: &Tensor) -> Tensor {
    let last = layers.len() - 1;
    let mut x = x.shallow_clone();
    for (i, layer) in layers.iter().enumerate() {
        let z = x.matmul(&layer.weight.tr()) + &layer.bias;
        x = if i == last {
            z
        } else {
            activate(z, layer.spec.activation)
        };
    }
    x
}

fn to_vec(t: &Tensor) -> Result<Vec<f32>> {
    let flat = t
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .flatten(0, -1);
    Ok(Vec::<f32>::try_from(&flat)?)
}

impl Backend for TchBackend {
    type Param = Tensor;

    fn allocate_parameter(
        &mut self,
        name: &str,
        shape: &[usize],
        init: ParamInit<'_>,
    ) -> Result<Tensor> {
        let dims: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
        let root = self.vs.root();

        let tensor = match init {
            ParamInit::GlorotUniform => {
                let (fan_out, fan_in) = match shape {
                    [fan_out, fan_in] => (*fan_out, *fan_in),
                    _ => {
                        return Err(ClassifierError::InvalidShape(format!(
                            "Glorot init needs a matrix, got shape {:?} for {}",
                            shape, name
                        )))
                    }
                };
                let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
                root.var(name, &dims, nn::Init::Uniform { lo: -bound, up: bound })
            }
            ParamInit::Zeros => root.var(name, &dims, nn::Init::Const(0.0)),
            ParamInit::Values(values) => {
                let expected: usize = shape.iter().product();
                if values.len() != expected {
                    return Err(ClassifierError::InvalidShape(format!(
                        "{} has shape {:?} but {} values were given",
                        name,
                        shape,
                        values.len()
                    )));
                }
                let t = Tensor::from_slice(values).view(dims.as_slice());
                root.var_copy(name, &t)
            }
        };
        Ok(tensor)
    }

    fn parameter_values(&self, param: &Tensor) -> Result<Vec<f32>> {
        let _guard = tch::no_grad_guard();
        to_vec(&param.detach())
    }

    fn compute_forward(
        &self,
        layers: &[Layer<Self>],
        features: &[f32],
        rows: usize,
    ) -> Result<Vec<f32>> {
        let _guard = tch::no_grad_guard();
        let x = matrix(features, rows, layers[0].spec.input_dim, self.device());
        let last = layers[layers.len() - 1].spec.activation;
        let out = activate(forward_logits(layers, &x), last);
        to_vec(&out)
    }

    fn compute_loss_and_gradients(
        &mut self,
        layers: &[Layer<Self>],
        batch: &Minibatch,
    ) -> Result<StepStats> {
        let device = self.vs.device();
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or(ClassifierError::OptimizerUnbound)?;

        let x = matrix(&batch.features, batch.rows, batch.feature_dim(), device);
        let y = matrix(&batch.labels, batch.rows, batch.label_dim(), device);

        // A softmax output layer is folded into log_softmax for stability.
        let logits = forward_logits(layers, &x);
        let scores = match layers[layers.len() - 1].spec.activation {
            Activation::Softmax => logits,
            other => activate(logits, other),
        };
        let log_probs = scores.log_softmax(-1, Kind::Float);
        let loss = -(&y * &log_probs)
            .sum_dim_intlist(Some(&[-1][..]), false, Kind::Float)
            .mean(Kind::Float);

        optimizer.zero_grad();
        loss.backward();

        let error = tch::no_grad(|| {
            scores
                .argmax(-1, false)
                .ne_tensor(&y.argmax(-1, false))
                .to_kind(Kind::Float)
                .mean(Kind::Float)
        });

        Ok(StepStats {
            loss: loss.double_value(&[]),
            error: error.double_value(&[]),
        })
    }

    fn bind_optimizer(&mut self, learning_rate: f64) -> Result<()> {
        self.optimizer = Some(nn::Sgd::default().build(&self.vs, learning_rate)?);
        Ok(())
    }

    fn apply_optimizer_step(&mut self) -> Result<()> {
        self.optimizer
            .as_mut()
            .ok_or(ClassifierError::OptimizerUnbound)?
            .step();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;

    fn separable_batch() -> Minibatch {
        // Class 0 on the left, class 1 on the right.
        Minibatch {
            features: vec![-2.0, 0.5, -1.5, -0.5, 1.5, 0.2, 2.0, -0.3],
            labels: vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
            rows: 4,
        }
    }

    #[test]
    fn exact_values_survive_allocation() {
        let mut backend = TchBackend::cpu();
        let values = [0.25f32, -1.5, 3.0, 7.125, 0.0, -0.0625];
        let param = backend
            .allocate_parameter("w", &[2, 3], ParamInit::Values(&values))
            .unwrap();
        assert_eq!(param.size(), vec![2, 3]);
        assert_eq!(backend.parameter_values(&param).unwrap(), values.to_vec());
    }

    #[test]
    fn wrong_value_count_is_rejected() {
        let mut backend = TchBackend::cpu();
        let err = backend
            .allocate_parameter("w", &[2, 2], ParamInit::Values(&[1.0]))
            .unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidShape(_)));
    }

    #[test]
    fn step_without_optimizer_fails() {
        let mut model = ModelBuilder::build(TchBackend::cpu(), 2, 2, &[4]).unwrap();
        let err = model.compute_gradients(&separable_batch()).unwrap_err();
        assert!(matches!(err, ClassifierError::OptimizerUnbound));
    }

    #[test]
    fn sgd_reduces_loss_on_a_fixed_batch() {
        let mut model =
            ModelBuilder::build(TchBackend::seeded(Device::Cpu, 7), 2, 2, &[8]).unwrap();
        model.bind_optimizer(0.1).unwrap();
        let batch = separable_batch();

        let first = model.compute_gradients(&batch).unwrap();
        model.apply_update().unwrap();
        let mut last = first;
        for _ in 0..100 {
            last = model.compute_gradients(&batch).unwrap();
            model.apply_update().unwrap();
        }
        assert!(first.loss.is_finite());
        assert!(last.loss < first.loss);
    }

    #[test]
    fn gradients_alone_do_not_move_parameters() {
        let mut model = ModelBuilder::build(TchBackend::cpu(), 2, 2, &[3]).unwrap();
        model.bind_optimizer(0.5).unwrap();
        let before = model.parameters().unwrap();
        model.compute_gradients(&separable_batch()).unwrap();
        assert_eq!(model.parameters().unwrap(), before);
        model.apply_update().unwrap();
        assert_ne!(model.parameters().unwrap(), before);
    }
}
