//! Mel-spectrogram VAE (first stage).

use std::path::Path;

use ndarray::{s, Array4, Ix4, Zip};
use ort::session::Session;
use rand_chacha::ChaCha8Rng;

use crate::error::{AudioLdmError, Result};
use crate::sampler::randn_like;

use super::session::{extract_f32, load_session, tensor4, SessionOptions};
use super::FirstStage;

/// Gaussian posterior over latents with diagonal covariance.
#[derive(Debug, Clone)]
pub struct DiagonalGaussian {
    mean: Array4<f32>,
    logvar: Array4<f32>,
}

impl DiagonalGaussian {
    /// Splits encoder moments `(b, 2c, t, f)` into mean and log-variance.
    ///
    /// The log-variance is clamped to `[-30, 20]`.
    pub fn from_moments(moments: &Array4<f32>) -> Result<Self> {
        let channels = moments.shape()[1];
        if channels == 0 || channels % 2 != 0 {
            return Err(AudioLdmError::model_inference_failed(format!(
                "Encoder moments need an even channel count, got shape {:?}",
                moments.shape()
            )));
        }
        let half = channels / 2;
        let mean = moments.slice(s![.., ..half, .., ..]).to_owned();
        let logvar = moments
            .slice(s![.., half.., .., ..])
            .mapv(|v| v.clamp(-30.0, 20.0));
        Ok(Self { mean, logvar })
    }

    pub fn mean(&self) -> &Array4<f32> {
        &self.mean
    }

    pub fn logvar(&self) -> &Array4<f32> {
        &self.logvar
    }

    /// Mode of the distribution.
    pub fn mode(&self) -> Array4<f32> {
        self.mean.clone()
    }

    /// Draws `mean + exp(logvar / 2) * noise`.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> Array4<f32> {
        let noise = randn_like(&self.mean, rng);
        let mut out = self.mean.clone();
        Zip::from(&mut out)
            .and(&self.logvar)
            .and(&noise)
            .for_each(|o, &lv, &n| *o += (0.5 * lv).exp() * n);
        out
    }
}

/// VAE split into `vae_encoder.onnx` (`mel` -> `moments`) and
/// `vae_decoder.onnx` (`latent` -> `mel`).
pub struct OnnxVae {
    encoder: Session,
    decoder: Session,
}

impl OnnxVae {
    pub const ENCODER_FILE: &'static str = "vae_encoder.onnx";
    pub const DECODER_FILE: &'static str = "vae_decoder.onnx";

    pub fn load(model_dir: &Path, options: &SessionOptions) -> Result<Self> {
        let encoder = load_session(&model_dir.join(Self::ENCODER_FILE), options, &["mel"])?;
        let decoder = load_session(&model_dir.join(Self::DECODER_FILE), options, &["latent"])?;
        Ok(Self { encoder, decoder })
    }
}

impl FirstStage for OnnxVae {
    fn encode(&mut self, mel: &Array4<f32>) -> Result<DiagonalGaussian> {
        let input = tensor4(mel)?;
        let mut outputs = self
            .encoder
            .run(ort::inputs!["mel" => input])
            .map_err(|e| AudioLdmError::model_inference_failed(format!("VAE encoder failed: {}", e)))?;

        let moments = outputs.remove("moments").ok_or_else(|| {
            AudioLdmError::model_inference_failed("Missing moments output".to_string())
        })?;
        let moments = extract_f32(&moments, "moments")?
            .into_dimensionality::<Ix4>()
            .map_err(|e| AudioLdmError::model_inference_failed(format!("Moments are not 4-D: {}", e)))?;

        DiagonalGaussian::from_moments(&moments)
    }

    fn decode(&mut self, latent: &Array4<f32>) -> Result<Array4<f32>> {
        let input = tensor4(latent)?;
        let mut outputs = self
            .decoder
            .run(ort::inputs!["latent" => input])
            .map_err(|e| AudioLdmError::model_inference_failed(format!("VAE decoder failed: {}", e)))?;

        let mel = outputs.remove("mel").ok_or_else(|| {
            AudioLdmError::model_inference_failed("Missing mel output".to_string())
        })?;
        extract_f32(&mel, "mel")?
            .into_dimensionality::<Ix4>()
            .map_err(|e| AudioLdmError::model_inference_failed(format!("Decoded mel is not 4-D: {}", e)))
    }
}
