//! ONNX Runtime session plumbing shared by the model wrappers.

use std::path::Path;

use half::f16;
use ndarray::{Array3, Array4, ArrayD, ArrayView2, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::debug;

use crate::config::Device;
use crate::error::{AudioLdmError, Result};

/// Options applied to every session of a checkpoint.
#[derive(Default)]
pub struct SessionOptions {
    pub providers: Vec<ExecutionProviderDispatch>,
    pub intra_threads: Option<usize>,
}

impl SessionOptions {
    pub fn new(device: Device, threads: Option<u32>) -> Self {
        Self {
            providers: execution_providers(device),
            intra_threads: threads.map(|t| t as usize),
        }
    }
}

/// Execution providers to try, in order, for a device choice.
///
/// `Auto` registers CUDA ahead of CPU; ONNX Runtime skips providers that
/// are unavailable at run time.
pub fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Auto => vec![
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ],
        Device::Cuda => vec![CUDAExecutionProvider::default().build()],
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
    }
}

/// Loads an ONNX model and checks it exposes `expected_inputs`.
pub fn load_session(path: &Path, options: &SessionOptions, expected_inputs: &[&str]) -> Result<Session> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut builder = Session::builder()
        .map_err(|e| AudioLdmError::model_load_failed(format!("Failed to create session: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| {
            AudioLdmError::model_load_failed(format!("Failed to set optimization level: {}", e))
        })?;

    if let Some(threads) = options.intra_threads {
        builder = builder.with_intra_threads(threads).map_err(|e| {
            AudioLdmError::model_load_failed(format!("Failed to set thread count: {}", e))
        })?;
    }

    if !options.providers.is_empty() {
        builder = builder
            .with_execution_providers(&options.providers)
            .map_err(|e| {
                AudioLdmError::model_load_failed(format!("Failed to set execution providers: {}", e))
            })?;
    }

    let session = builder.commit_from_file(path).map_err(|e| {
        AudioLdmError::model_load_failed(format!("Failed to load {}: {}", name, e))
    })?;

    let missing: Vec<&str> = expected_inputs
        .iter()
        .copied()
        .filter(|input| !session.inputs.iter().any(|i| i.name == *input))
        .collect();
    if !missing.is_empty() {
        return Err(AudioLdmError::model_load_failed(format!(
            "{} is missing inputs: {}",
            name,
            missing.join(", ")
        )));
    }

    debug!(model = %name, "Loaded ONNX session");
    Ok(session)
}

/// Copies a `(b, c, t, f)` array into a tensor.
pub fn tensor4(x: &Array4<f32>) -> Result<Tensor<f32>> {
    let (b, c, t, f) = x.dim();
    tensor([b, c, t, f], x.iter().copied().collect())
}

/// Copies a `(b, n, d)` array into a tensor.
pub fn tensor3(x: &Array3<f32>) -> Result<Tensor<f32>> {
    let (b, n, d) = x.dim();
    tensor([b, n, d], x.iter().copied().collect())
}

/// Copies a `(b, n)` array into a tensor.
pub fn tensor2(x: ArrayView2<'_, f32>) -> Result<Tensor<f32>> {
    let (b, n) = x.dim();
    tensor([b, n], x.iter().copied().collect())
}

fn tensor<const N: usize>(shape: [usize; N], data: Vec<f32>) -> Result<Tensor<f32>> {
    Tensor::from_array((shape, data))
        .map_err(|e| AudioLdmError::model_inference_failed(format!("Failed to create tensor: {}", e)))
}

/// Extracts an output as f32, converting fp16 exports.
pub fn extract_f32(value: &DynValue, what: &str) -> Result<ArrayD<f32>> {
    let (dims, data): (Vec<usize>, Vec<f32>) = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        (shape.iter().map(|&d| d as usize).collect(), data.to_vec())
    } else if let Ok((shape, data)) = value.try_extract_tensor::<f16>() {
        (
            shape.iter().map(|&d| d as usize).collect(),
            data.iter().map(|&v| f32::from(v)).collect(),
        )
    } else {
        return Err(AudioLdmError::model_inference_failed(format!(
            "Failed to extract {}: expected f32 or f16 tensor",
            what
        )));
    };

    ArrayD::from_shape_vec(IxDyn(&dims), data).map_err(|e| {
        AudioLdmError::model_inference_failed(format!("Failed to shape {}: {}", what, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_lists_by_device() {
        assert_eq!(execution_providers(Device::Auto).len(), 2);
        assert_eq!(execution_providers(Device::Cpu).len(), 1);
        assert_eq!(execution_providers(Device::Cuda).len(), 1);
    }

    #[test]
    fn options_carry_threads() {
        let options = SessionOptions::new(Device::Cpu, Some(4));
        assert_eq!(options.intra_threads, Some(4));
        assert_eq!(options.providers.len(), 1);
    }

    #[test]
    fn missing_model_file_fails_to_load() {
        let options = SessionOptions::new(Device::Cpu, None);
        let err = load_session(Path::new("/nonexistent/unet.onnx"), &options, &["x"]).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ModelLoadFailed);
        assert!(err.message.contains("unet.onnx"));
    }
}
