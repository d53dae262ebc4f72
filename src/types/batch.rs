//! Batch construction for generation requests.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use tracing::warn;

use crate::error::{AudioLdmError, Result};

/// Frames in the placeholder log-mel and STFT slots.
pub const PLACEHOLDER_FRAMES: usize = 1024;

/// Mel bins in the placeholder log-mel slot.
pub const PLACEHOLDER_MEL_BINS: usize = 64;

/// Frequency bins in the placeholder STFT slot.
pub const PLACEHOLDER_STFT_BINS: usize = 512;

/// Samples in the placeholder waveform slot (10 s at 16 kHz).
pub const PLACEHOLDER_SAMPLES: usize = 160_000;

/// Model input batch.
///
/// Every list has `batch_size()` entries and every tensor has a leading
/// dimension of `batch_size()`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Log-mel spectrogram `(b, frames, mel_bins)`.
    pub fbank: Array3<f32>,
    /// Log-magnitude STFT `(b, frames, stft_bins)`; always a placeholder here.
    pub stft: Array3<f32>,
    pub fnames: Vec<String>,
    /// Waveform `(b, samples)`.
    pub waveform: Array2<f32>,
    pub text: Vec<String>,
}

impl Batch {
    /// Builds a batch for a text prompt with optional reference inputs.
    ///
    /// Absent inputs become zero placeholders. Present inputs must have a
    /// leading dimension of 1 or `batchsize` and are broadcast along it.
    pub fn for_text_to_audio(
        text: &str,
        waveform: Option<ArrayView2<'_, f32>>,
        fbank: Option<ArrayView3<'_, f32>>,
        batchsize: usize,
    ) -> Result<Self> {
        if batchsize < 1 {
            warn!(batchsize, "Batchsize must be at least 1; continuing with the given value");
        }

        let fbank = match fbank {
            None => Array3::zeros((batchsize, PLACEHOLDER_FRAMES, PLACEHOLDER_MEL_BINS)),
            Some(mel) => {
                let (_, frames, bins) = mel.dim();
                mel.broadcast((batchsize, frames, bins))
                    .ok_or_else(|| AudioLdmError::batch_size_mismatch("fbank", mel.shape(), batchsize))?
                    .to_owned()
            }
        };

        let waveform = match waveform {
            None => Array2::zeros((batchsize, PLACEHOLDER_SAMPLES)),
            Some(wav) => {
                let samples = wav.ncols();
                wav.broadcast((batchsize, samples))
                    .ok_or_else(|| AudioLdmError::batch_size_mismatch("waveform", wav.shape(), batchsize))?
                    .to_owned()
            }
        };

        Ok(Self {
            fbank,
            stft: Array3::zeros((batchsize, PLACEHOLDER_FRAMES, PLACEHOLDER_STFT_BINS)),
            fnames: vec![String::new(); batchsize],
            waveform,
            text: vec![text.to_string(); batchsize],
        })
    }

    pub fn batch_size(&self) -> usize {
        self.text.len()
    }
}
