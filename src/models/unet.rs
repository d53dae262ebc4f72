//! Latent diffusion UNet running on ONNX Runtime.

use std::path::Path;

use ndarray::{Array3, Array4, Ix4};
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{AudioLdmError, Result};

use super::session::{extract_f32, load_session, tensor3, tensor4, SessionOptions};
use super::NoisePredictor;

/// UNet export with inputs `x`, `timesteps` (i64) and `context`, output `eps`.
pub struct OnnxUnet {
    session: Session,
}

impl OnnxUnet {
    pub const FILE: &'static str = "unet.onnx";

    pub fn load(model_dir: &Path, options: &SessionOptions) -> Result<Self> {
        let session = load_session(
            &model_dir.join(Self::FILE),
            options,
            &["x", "timesteps", "context"],
        )?;
        Ok(Self { session })
    }
}

impl NoisePredictor for OnnxUnet {
    fn predict_noise(
        &mut self,
        x: &Array4<f32>,
        timesteps: &[usize],
        context: &Array3<f32>,
    ) -> Result<Array4<f32>> {
        let batch = x.shape()[0];
        if timesteps.len() != batch {
            return Err(AudioLdmError::batch_size_mismatch("timesteps", &[timesteps.len()], batch));
        }

        let x_tensor = tensor4(x)?;
        let context_tensor = tensor3(context)?;
        let t: Vec<i64> = timesteps.iter().map(|&t| t as i64).collect();
        let t_tensor = Tensor::from_array(([batch], t)).map_err(|e| {
            AudioLdmError::model_inference_failed(format!("Failed to create timesteps tensor: {}", e))
        })?;

        let mut outputs = self
            .session
            .run(ort::inputs![
                "x" => x_tensor,
                "timesteps" => t_tensor,
                "context" => context_tensor
            ])
            .map_err(|e| AudioLdmError::model_inference_failed(format!("UNet failed: {}", e)))?;

        let eps = outputs.remove("eps").ok_or_else(|| {
            AudioLdmError::model_inference_failed("Missing eps output".to_string())
        })?;

        extract_f32(&eps, "eps")?.into_dimensionality::<Ix4>().map_err(|e| {
            AudioLdmError::model_inference_failed(format!("UNet output is not 4-D: {}", e))
        })
    }
}
