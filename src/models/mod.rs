//! Model collaborators of the latent diffusion pipeline.
//!
//! The pretrained networks sit behind four traits:
//! - [`NoisePredictor`]: UNet noise estimate for a latent, timestep and context
//! - [`ConditionEncoder`]: CLAP text/audio embeddings and similarity
//! - [`FirstStage`]: VAE between log-mel spectrograms and latents
//! - [`Vocoder`]: HiFi-GAN from log-mel spectrograms to waveforms
//!
//! [`LatentDiffusion`] composes them. The `Onnx*` types implement the traits
//! on ONNX Runtime sessions loaded from a checkpoint directory.

pub mod clap;
pub mod latent_diffusion;
pub mod loader;
pub mod session;
pub mod unet;
pub mod vae;
pub mod vocoder;

use ndarray::{concatenate, Array2, Array3, Array4, ArrayView2, Axis};

use crate::error::{AudioLdmError, Result};

pub use clap::ClapEncoder;
pub use latent_diffusion::{select_best_candidates, LatentDiffusion, SampleOptions};
pub use loader::{check_models, load_models, REQUIRED_MODEL_FILES};
pub use unet::OnnxUnet;
pub use vae::{DiagonalGaussian, OnnxVae};
pub use vocoder::OnnxVocoder;

/// Predicts the noise in a latent.
pub trait NoisePredictor {
    /// `x` is `(b, c, t, f)`, `timesteps` has `b` training timesteps and
    /// `context` is `(b, 1, d)`. Returns the noise estimate shaped like `x`.
    fn predict_noise(
        &mut self,
        x: &Array4<f32>,
        timesteps: &[usize],
        context: &Array3<f32>,
    ) -> Result<Array4<f32>>;
}

/// Joint audio/text embedding model used for conditioning.
///
/// Embeddings are `(b, 1, d)`.
pub trait ConditionEncoder {
    fn encode_text(&mut self, texts: &[String]) -> Result<Array3<f32>>;

    /// Embeds `(b, samples)` waveforms at 16 kHz.
    fn encode_audio(&mut self, waveforms: ArrayView2<'_, f32>) -> Result<Array3<f32>>;

    /// Embedding of the empty prompt, repeated `batch` times.
    fn unconditional(&mut self, batch: usize) -> Result<Array3<f32>> {
        let empty = self.encode_text(&[String::new()])?;
        repeat_batch(&empty, batch)
    }

    /// Cosine similarity between each waveform and the text at the same index.
    fn similarity(&mut self, waveforms: ArrayView2<'_, f32>, texts: &[String]) -> Result<Vec<f32>> {
        if waveforms.nrows() != texts.len() {
            return Err(AudioLdmError::batch_size_mismatch(
                "similarity waveforms",
                waveforms.shape(),
                texts.len(),
            ));
        }
        let audio = self.encode_audio(waveforms)?;
        let text = self.encode_text(texts)?;
        Ok(audio
            .outer_iter()
            .zip(text.outer_iter())
            .map(|(a, t)| cosine(a.iter().copied(), t.iter().copied()))
            .collect())
    }
}

/// VAE between `(b, 1, frames, mel_bins)` spectrograms and latents.
pub trait FirstStage {
    fn encode(&mut self, mel: &Array4<f32>) -> Result<DiagonalGaussian>;
    fn decode(&mut self, latent: &Array4<f32>) -> Result<Array4<f32>>;
}

/// Mel-to-waveform vocoder.
pub trait Vocoder {
    /// `mel` is `(b, mel_bins, frames)`; returns `(b, samples)`.
    fn synthesize(&mut self, mel: &Array3<f32>) -> Result<Array2<f32>>;
}

/// Tiles an embedding batch `times` times along the batch axis.
pub fn repeat_batch(x: &Array3<f32>, times: usize) -> Result<Array3<f32>> {
    if times == 0 {
        return Ok(Array3::zeros((0, x.shape()[1], x.shape()[2])));
    }
    let views = vec![x.view(); times];
    concatenate(Axis(0), &views)
        .map_err(|e| AudioLdmError::model_inference_failed(format!("Failed to repeat batch: {}", e)))
}

fn cosine(a: impl Iterator<Item = f32>, b: impl Iterator<Item = f32>) -> f32 {
    let (dot, na, nb) = a
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    dot / (na.sqrt() * nb.sqrt()).max(1e-8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    /// Embeds text by length and audio by mean amplitude.
    struct Toy;

    impl ConditionEncoder for Toy {
        fn encode_text(&mut self, texts: &[String]) -> Result<Array3<f32>> {
            Ok(Array3::from_shape_fn((texts.len(), 1, 2), |(b, _, d)| {
                if d == 0 { 1.0 } else { texts[b].len() as f32 }
            }))
        }

        fn encode_audio(&mut self, waveforms: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
            Ok(Array3::from_shape_fn((waveforms.nrows(), 1, 2), |(b, _, d)| {
                if d == 0 { 1.0 } else { waveforms.row(b).mean().unwrap_or(0.0) }
            }))
        }
    }

    #[test]
    fn unconditional_repeats_empty_prompt() {
        let uc = Toy.unconditional(3).unwrap();
        assert_eq!(uc.shape(), &[3, 1, 2]);
        assert!(uc.outer_iter().all(|e| e[[0, 1]] == 0.0));
    }

    #[test]
    fn similarity_matches_indices() {
        let waveforms = Array::from_shape_vec((2, 2), vec![0.0, 0.0, 4.0, 4.0]).unwrap();
        let texts = vec![String::new(), "abcd".to_string()];
        let sim = Toy.similarity(waveforms.view(), &texts).unwrap();
        assert!((sim[0] - 1.0).abs() < 1e-6);
        assert!((sim[1] - 1.0).abs() < 1e-6);

        let swapped = vec!["abcd".to_string(), String::new()];
        let sim = Toy.similarity(waveforms.view(), &swapped).unwrap();
        assert!(sim[0] < 0.5 && sim[1] < 0.5);
    }

    #[test]
    fn similarity_length_mismatch() {
        let waveforms = Array2::<f32>::zeros((2, 4));
        let err = Toy.similarity(waveforms.view(), &["a".to_string()]).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::BatchSizeMismatch);
    }

    #[test]
    fn repeat_batch_tiles() {
        let x = Array3::from_shape_fn((2, 1, 1), |(b, _, _)| b as f32);
        let tiled = repeat_batch(&x, 3).unwrap();
        let firsts: Vec<f32> = tiled.iter().copied().collect();
        assert_eq!(firsts, vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    }
}
