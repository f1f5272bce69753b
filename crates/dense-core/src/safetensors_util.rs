use std::collections::HashMap;
use std::path::Path;

use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::backend::Backend;
use crate::config::{validate_chain, LayerSpec};
use crate::error::{ClassifierError, Result};
use crate::model::{bias_name, weight_name, LayerParameters, Model};

/// Header metadata key holding the JSON layer list.
pub const ARCHITECTURE_KEY: &str = "architecture";

fn to_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn from_le_bytes(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Encodes `model` as safetensors bytes. `path` only labels errors.
pub fn serialize_model<B: Backend>(model: &Model<B>, path: &Path) -> Result<Vec<u8>> {
    let architecture = model.architecture();
    let arch_json = serde_json::to_string(&architecture)
        .map_err(|e| ClassifierError::corrupt(path, format!("architecture: {}", e)))?;
    let metadata = HashMap::from([(ARCHITECTURE_KEY.to_string(), arch_json)]);

    let mut buffers = Vec::with_capacity(architecture.len() * 2);
    for (i, (spec, params)) in architecture.iter().zip(model.parameters()?).enumerate() {
        buffers.push((weight_name(i), spec.weight_shape().to_vec(), to_le_bytes(&params.weight)));
        buffers.push((bias_name(i), vec![spec.output_dim], to_le_bytes(&params.bias)));
    }

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, bytes) in &buffers {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytes)
            .map_err(|e| ClassifierError::corrupt(path, format!("{}: {}", name, e)))?;
        views.push((name.clone(), view));
    }

    safetensors::serialize(views, &Some(metadata))
        .map_err(|e| ClassifierError::corrupt(path, e.to_string()))
}

fn read_architecture(buffer: &[u8], path: &Path) -> Result<Vec<LayerSpec>> {
    let (_, header) = SafeTensors::read_metadata(buffer)
        .map_err(|e| ClassifierError::corrupt(path, format!("unreadable header: {}", e)))?;
    let arch_json = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get(ARCHITECTURE_KEY))
        .ok_or_else(|| ClassifierError::corrupt(path, "no architecture metadata"))?;
    let specs: Vec<LayerSpec> = serde_json::from_str(arch_json)
        .map_err(|e| ClassifierError::corrupt(path, format!("architecture: {}", e)))?;
    validate_chain(&specs).map_err(|e| ClassifierError::corrupt(path, e.to_string()))?;
    Ok(specs)
}

fn read_tensor(
    tensors: &SafeTensors<'_>,
    name: &str,
    shape: &[usize],
    path: &Path,
) -> Result<Vec<f32>> {
    let view = tensors
        .tensor(name)
        .map_err(|_| ClassifierError::corrupt(path, format!("missing tensor {}", name)))?;
    if view.dtype() != Dtype::F32 {
        return Err(ClassifierError::corrupt(
            path,
            format!("{} has dtype {:?}, expected F32", name, view.dtype()),
        ));
    }
    if view.shape() != shape {
        return Err(ClassifierError::corrupt(
            path,
            format!("{} has shape {:?}, expected {:?}", name, view.shape(), shape),
        ));
    }
    Ok(from_le_bytes(view.data()))
}

/// Decodes a checkpoint into a model whose parameters live in `backend`.
pub fn deserialize_model<B: Backend>(buffer: &[u8], backend: B, path: &Path) -> Result<Model<B>> {
    let specs = read_architecture(buffer, path)?;
    let tensors = SafeTensors::deserialize(buffer)
        .map_err(|e| ClassifierError::corrupt(path, e.to_string()))?;

    let mut parameters = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let weight = read_tensor(&tensors, &weight_name(i), &spec.weight_shape(), path)?;
        let bias = read_tensor(&tensors, &bias_name(i), &[spec.output_dim], path)?;
        log::debug!("Read layer {} ({} -> {})", i, spec.input_dim, spec.output_dim);
        parameters.push(LayerParameters { weight, bias });
    }

    Model::from_parameters(backend, &specs, &parameters)
}
