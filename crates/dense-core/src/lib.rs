pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod safetensors_util;
pub mod store;
pub mod tch_backend;

pub use backend::{Backend, Minibatch, ParamInit, StepStats};
pub use config::{Activation, LayerSpec, ModelConfig};
pub use error::{ClassifierError, Result};
pub use model::{argmax, Layer, LayerParameters, Model, ModelBuilder};
pub use store::ModelStore;
pub use tch_backend::TchBackend;
