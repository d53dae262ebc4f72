//! CLAP conditioning encoder.
//!
//! Text goes through the RoBERTa tokenizer and `clap_text.onnx`; audio is
//! resampled from 16 kHz to 48 kHz, fitted to a 10 second window and run
//! through `clap_audio.onnx`. Both branches return unit-norm embeddings in
//! a shared space, shaped `(b, 1, d)`.

use std::path::Path;

use ndarray::{Array2, Array3, ArrayView2, Axis, Ix2};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::debug;

use crate::audio::{resample_mono, SAMPLE_RATE};
use crate::error::{AudioLdmError, Result};

use super::session::{extract_f32, load_session, tensor2, SessionOptions};
use super::ConditionEncoder;

/// Sample rate of the CLAP audio branch.
pub const CLAP_SAMPLE_RATE: u32 = 48000;

/// Samples in the CLAP audio window (10 s at 48 kHz).
pub const CLAP_AUDIO_SAMPLES: usize = 480_000;

/// Token length of the CLAP text branch.
pub const CLAP_TEXT_TOKENS: usize = 512;

pub struct ClapEncoder {
    tokenizer: Tokenizer,
    text_encoder: Session,
    audio_encoder: Session,
}

impl ClapEncoder {
    pub const TOKENIZER_FILE: &'static str = "tokenizer.json";
    pub const TEXT_FILE: &'static str = "clap_text.onnx";
    pub const AUDIO_FILE: &'static str = "clap_audio.onnx";

    /// Loads the tokenizer and both CLAP branches from `model_dir`.
    pub fn load(model_dir: &Path, options: &SessionOptions) -> Result<Self> {
        let mut tokenizer = Tokenizer::from_file(model_dir.join(Self::TOKENIZER_FILE))
            .map_err(|e| AudioLdmError::model_load_failed(format!("Failed to load tokenizer: {}", e)))?;

        tokenizer
            .with_padding(Some(PaddingParams {
                strategy: PaddingStrategy::Fixed(CLAP_TEXT_TOKENS),
                ..Default::default()
            }))
            .with_truncation(Some(TruncationParams {
                max_length: CLAP_TEXT_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| {
                AudioLdmError::model_load_failed(format!("Failed to configure tokenizer: {}", e))
            })?;

        let text_encoder = load_session(
            &model_dir.join(Self::TEXT_FILE),
            options,
            &["input_ids", "attention_mask"],
        )?;
        let audio_encoder = load_session(&model_dir.join(Self::AUDIO_FILE), options, &["waveform"])?;

        Ok(Self {
            tokenizer,
            text_encoder,
            audio_encoder,
        })
    }
}

impl ConditionEncoder for ClapEncoder {
    fn encode_text(&mut self, texts: &[String]) -> Result<Array3<f32>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AudioLdmError::model_inference_failed(format!("Tokenization failed: {}", e)))?;

        let batch = encodings.len();
        let mut ids = Vec::with_capacity(batch * CLAP_TEXT_TOKENS);
        let mut mask = Vec::with_capacity(batch * CLAP_TEXT_TOKENS);
        for encoding in &encodings {
            ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }
        let tokens = ids.len() / batch.max(1);

        let input_ids = Tensor::from_array(([batch, tokens], ids)).map_err(|e| {
            AudioLdmError::model_inference_failed(format!("Failed to create input_ids tensor: {}", e))
        })?;
        let attention_mask = Tensor::from_array(([batch, tokens], mask)).map_err(|e| {
            AudioLdmError::model_inference_failed(format!(
                "Failed to create attention_mask tensor: {}",
                e
            ))
        })?;

        let mut outputs = self
            .text_encoder
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])
            .map_err(|e| AudioLdmError::model_inference_failed(format!("CLAP text encoder failed: {}", e)))?;

        let embeds = outputs.remove("text_embeds").ok_or_else(|| {
            AudioLdmError::model_inference_failed("Missing text_embeds output".to_string())
        })?;
        let embeds = to_embeddings(extract_f32(&embeds, "text_embeds")?)?;

        debug!(batch, dim = embeds.ncols(), "Encoded text prompts");
        Ok(unit_rows(embeds).insert_axis(Axis(1)))
    }

    fn encode_audio(&mut self, waveforms: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        let batch = waveforms.nrows();
        let mut fitted = Array2::<f32>::zeros((batch, CLAP_AUDIO_SAMPLES));
        for (row, mut out) in waveforms.outer_iter().zip(fitted.outer_iter_mut()) {
            let samples: Vec<f32> = row.iter().copied().collect();
            let resampled = resample_mono(&samples, SAMPLE_RATE, CLAP_SAMPLE_RATE)?;
            for (dst, src) in out.iter_mut().zip(repeat_pad(&resampled, CLAP_AUDIO_SAMPLES)) {
                *dst = src;
            }
        }

        let waveform = tensor2(fitted.view())?;
        let mut outputs = self
            .audio_encoder
            .run(ort::inputs!["waveform" => waveform])
            .map_err(|e| {
                AudioLdmError::model_inference_failed(format!("CLAP audio encoder failed: {}", e))
            })?;

        let embeds = outputs.remove("audio_embeds").ok_or_else(|| {
            AudioLdmError::model_inference_failed("Missing audio_embeds output".to_string())
        })?;
        let embeds = to_embeddings(extract_f32(&embeds, "audio_embeds")?)?;

        debug!(batch, dim = embeds.ncols(), "Encoded reference audio");
        Ok(unit_rows(embeds).insert_axis(Axis(1)))
    }
}

fn to_embeddings(x: ndarray::ArrayD<f32>) -> Result<Array2<f32>> {
    // Some exports keep a singleton token axis.
    let x = if x.ndim() == 3 && x.shape()[1] == 1 {
        x.index_axis_move(Axis(1), 0)
    } else {
        x
    };
    x.into_dimensionality::<Ix2>().map_err(|e| {
        AudioLdmError::model_inference_failed(format!("Unexpected CLAP embedding shape: {}", e))
    })
}

/// L2-normalizes each row.
fn unit_rows(mut x: Array2<f32>) -> Array2<f32> {
    for mut row in x.outer_iter_mut() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
        row.mapv_inplace(|v| v / norm);
    }
    x
}

/// Tiles a short clip until it fills `len` samples, zero-padding the rest.
/// Longer clips keep their first `len` samples.
fn repeat_pad(samples: &[f32], len: usize) -> Vec<f32> {
    if samples.is_empty() {
        return vec![0.0; len];
    }
    if samples.len() >= len {
        return samples[..len].to_vec();
    }
    let repeats = len / samples.len();
    let mut out = Vec::with_capacity(len);
    for _ in 0..repeats {
        out.extend_from_slice(samples);
    }
    out.resize(len, 0.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_pad_tiles_then_zero_fills() {
        let out = repeat_pad(&[1.0, 2.0, 3.0], 8);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn repeat_pad_truncates_long_input() {
        assert_eq!(repeat_pad(&[1.0, 2.0, 3.0, 4.0], 2), vec![1.0, 2.0]);
        assert_eq!(repeat_pad(&[], 3), vec![0.0; 3]);
    }

    #[test]
    fn unit_rows_normalizes() {
        let x = Array2::from_shape_vec((2, 2), vec![3.0, 4.0, 0.0, 0.0]).unwrap();
        let y = unit_rows(x);
        assert!((y[[0, 0]] - 0.6).abs() < 1e-6);
        assert!((y[[0, 1]] - 0.8).abs() < 1e-6);
        assert_eq!(y[[1, 0]], 0.0);
    }

    #[test]
    fn squeezes_token_axis() {
        let x = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 1, 8]));
        assert_eq!(to_embeddings(x).unwrap().shape(), &[2, 8]);

        let bad = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 3, 8]));
        assert!(to_embeddings(bad).is_err());
    }
}
