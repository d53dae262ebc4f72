//! HiFi-GAN vocoder.

use std::path::Path;

use ndarray::{Array2, Array3, Axis, Ix2};
use ort::session::Session;

use crate::error::{AudioLdmError, Result};

use super::session::{extract_f32, load_session, tensor3, SessionOptions};
use super::Vocoder;

/// `vocoder.onnx` with input `mel` `(b, n_mels, frames)` and output `waveform`.
pub struct OnnxVocoder {
    session: Session,
}

impl OnnxVocoder {
    pub const FILE: &'static str = "vocoder.onnx";

    pub fn load(model_dir: &Path, options: &SessionOptions) -> Result<Self> {
        let session = load_session(&model_dir.join(Self::FILE), options, &["mel"])?;
        Ok(Self { session })
    }
}

impl Vocoder for OnnxVocoder {
    fn synthesize(&mut self, mel: &Array3<f32>) -> Result<Array2<f32>> {
        let input = tensor3(mel)?;
        let mut outputs = self
            .session
            .run(ort::inputs!["mel" => input])
            .map_err(|e| AudioLdmError::model_inference_failed(format!("Vocoder failed: {}", e)))?;

        let waveform = outputs.remove("waveform").ok_or_else(|| {
            AudioLdmError::model_inference_failed("Missing waveform output".to_string())
        })?;
        let waveform = extract_f32(&waveform, "waveform")?;

        // HiFi-GAN emits (b, 1, samples).
        let waveform = if waveform.ndim() == 3 {
            waveform.index_axis_move(Axis(1), 0)
        } else {
            waveform
        };
        waveform.into_dimensionality::<Ix2>().map_err(|e| {
            AudioLdmError::model_inference_failed(format!("Unexpected waveform shape: {}", e))
        })
    }
}
