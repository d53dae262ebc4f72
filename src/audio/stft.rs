//! Tacotron-style STFT and log-mel filterbank features.
//!
//! Matches the AudioLDM front end:
//! - Reflect padding of `filter_length / 2` on both sides
//! - Periodic Hann window of `win_length`, zero-padded to `filter_length`
//! - Magnitude spectrum `sqrt(re^2 + im^2)` with `filter_length / 2 + 1` bins
//! - Slaney mel filterbank over `[mel_fmin, mel_fmax]`
//! - Log compression `ln(max(x, 1e-5))`

use std::path::Path;
use std::sync::Arc;

use ndarray::{s, Array2};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::Result;
use crate::types::ModelConfig;

use super::wav::read_wav_file;

/// Lower clamp before log compression.
const LOG_FLOOR: f64 = 1e-5;

/// STFT and mel projection with precomputed window, plan and filterbank.
pub struct TacotronStft {
    filter_length: usize,
    hop_length: usize,
    sampling_rate: u32,
    window: Vec<f64>,
    mel_basis: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for TacotronStft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TacotronStft")
            .field("filter_length", &self.filter_length)
            .field("hop_length", &self.hop_length)
            .field("n_mel_channels", &self.mel_basis.len())
            .finish_non_exhaustive()
    }
}

/// Log-compressed spectral features, frames first.
#[derive(Debug, Clone)]
pub struct MelOutput {
    /// `(frames, n_mel_channels)`
    pub log_mel: Array2<f32>,
    /// `(frames, filter_length / 2 + 1)`
    pub log_magnitudes: Array2<f32>,
}

/// Features of a reference recording, fitted to a frame count.
#[derive(Debug, Clone)]
pub struct Fbank {
    /// `(target_length, n_mel_channels)`
    pub fbank: Array2<f32>,
    /// `(target_length, bins)` with an odd bin count trimmed by one.
    pub log_magnitudes_stft: Array2<f32>,
    /// The `(target_length * hop_length)` waveform the features came from.
    pub waveform: Vec<f32>,
}

impl TacotronStft {
    /// Creates the STFT.
    ///
    /// `win_length` must not exceed `filter_length`; [`ModelConfig::validate`]
    /// enforces this for configuration-driven construction.
    pub fn new(
        filter_length: usize,
        hop_length: usize,
        win_length: usize,
        n_mel_channels: usize,
        sampling_rate: u32,
        mel_fmin: f64,
        mel_fmax: f64,
    ) -> Self {
        let window = padded_hann_window(win_length, filter_length);
        let mel_basis = mel_filterbank(filter_length, n_mel_channels, sampling_rate, mel_fmin, mel_fmax);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(filter_length);

        Self {
            filter_length,
            hop_length,
            sampling_rate,
            window,
            mel_basis,
            fft,
        }
    }

    /// Builds the STFT from the `preprocessing` section.
    pub fn from_config(config: &ModelConfig) -> Self {
        let pre = &config.preprocessing;
        Self::new(
            pre.stft.filter_length,
            pre.stft.hop_length,
            pre.stft.win_length,
            pre.mel.n_mel_channels,
            pre.audio.sampling_rate,
            pre.mel.mel_fmin,
            pre.mel.mel_fmax,
        )
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn n_mel_channels(&self) -> usize {
        self.mel_basis.len()
    }

    /// Number of one-sided frequency bins.
    pub fn n_bins(&self) -> usize {
        self.filter_length / 2 + 1
    }

    /// Magnitude spectra per frame of a waveform clamped to `[-1, 1]`.
    pub fn magnitudes(&self, samples: &[f32]) -> Vec<Vec<f64>> {
        let clamped: Vec<f64> = samples.iter().map(|&s| s.clamp(-1.0, 1.0) as f64).collect();
        let pad = self.filter_length / 2;
        let padded = reflect_pad(&clamped, pad, pad);

        let n_fft = self.filter_length;
        let num_bins = self.n_bins();
        if padded.len() < n_fft {
            return Vec::new();
        }
        let num_frames = (padded.len() - n_fft) / self.hop_length + 1;

        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_length;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            frames.push(
                buffer[..num_bins]
                    .iter()
                    .map(|c| (c.re * c.re + c.im * c.im).sqrt())
                    .collect(),
            );
        }
        frames
    }

    /// Log-mel spectrogram and log-magnitude STFT of a waveform.
    pub fn mel_spectrogram(&self, samples: &[f32]) -> MelOutput {
        let magnitudes = self.magnitudes(samples);
        let frames = magnitudes.len();

        let log_mel = Array2::from_shape_fn((frames, self.n_mel_channels()), |(t, m)| {
            let energy: f64 = self.mel_basis[m]
                .iter()
                .zip(&magnitudes[t])
                .filter(|(w, _)| **w > 0.0)
                .map(|(&w, &mag)| w * mag)
                .sum();
            energy.max(LOG_FLOOR).ln() as f32
        });
        let log_magnitudes = Array2::from_shape_fn((frames, self.n_bins()), |(t, k)| {
            magnitudes[t][k].max(LOG_FLOOR).ln() as f32
        });

        MelOutput {
            log_mel,
            log_magnitudes,
        }
    }
}

/// Reads a reference recording and computes its features at `target_length` frames.
pub fn wav_to_fbank(path: &Path, target_length: usize, stft: &TacotronStft) -> Result<Fbank> {
    let segment_length = target_length * stft.hop_length();
    let waveform = read_wav_file(path, segment_length, stft.sampling_rate())?;
    let waveform = waveform.into_raw_vec_and_offset().0;

    let features = stft.mel_spectrogram(&waveform);

    Ok(Fbank {
        fbank: pad_spec(&features.log_mel, target_length),
        log_magnitudes_stft: pad_spec(&features.log_magnitudes, target_length),
        waveform,
    })
}

/// Zero-pads or trims frames to `target_length`; an odd bin count loses its last bin.
pub fn pad_spec(spec: &Array2<f32>, target_length: usize) -> Array2<f32> {
    let (frames, bins) = spec.dim();
    let bins = if bins % 2 != 0 { bins - 1 } else { bins };

    let mut out = Array2::<f32>::zeros((target_length, bins));
    let n = frames.min(target_length);
    out.slice_mut(s![..n, ..])
        .assign(&spec.slice(s![..n, ..bins]));
    out
}

/// Periodic Hann window of `win_length`, centered in `n_fft` samples.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f64> {
    let mut window = vec![0.0; n_fft];
    let offset = n_fft.saturating_sub(win_length) / 2;
    for i in 0..win_length.min(n_fft) {
        let phase = 2.0 * std::f64::consts::PI * i as f64 / win_length as f64;
        window[offset + i] = 0.5 * (1.0 - phase.cos());
    }
    window
}

/// Reflect-pads a signal on both sides, excluding the edge sample.
fn reflect_pad(signal: &[f64], pad_left: usize, pad_right: usize) -> Vec<f64> {
    let len = signal.len();
    if len == 0 {
        return vec![0.0; pad_left + pad_right];
    }
    let mut padded = Vec::with_capacity(pad_left + len + pad_right);

    for i in (1..=pad_left).rev() {
        padded.push(signal[i.min(len - 1)]);
    }
    padded.extend_from_slice(signal);
    for i in 0..pad_right {
        padded.push(signal[len.saturating_sub(2 + i)]);
    }
    padded
}

/// Slaney-normalized mel filterbank with `n_fft / 2 + 1` weights per filter.
fn mel_filterbank(n_fft: usize, n_mels: usize, sample_rate: u32, f_min: f64, f_max: f64) -> Vec<Vec<f64>> {
    let num_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;

    let mel_min = hz_to_mel_slaney(f_min);
    let mel_max = hz_to_mel_slaney(f_max);
    let hz_points: Vec<f64> = (0..=(n_mels + 1))
        .map(|i| mel_to_hz_slaney(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let bin_freqs: Vec<f64> = (0..num_bins).map(|i| sr * i as f64 / n_fft as f64).collect();

    (0..n_mels)
        .map(|i| {
            let (left, center, right) = (hz_points[i], hz_points[i + 1], hz_points[i + 2]);
            let norm = 2.0 / (right - left);
            bin_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    norm * lower.min(upper).max(0.0)
                })
                .collect()
        })
        .collect()
}

fn hz_to_mel_slaney(hz: f64) -> f64 {
    if hz < 1000.0 {
        3.0 * hz / 200.0
    } else {
        15.0 + 27.0 * (hz / 1000.0).ln() / 6.4_f64.ln()
    }
}

fn mel_to_hz_slaney(mel: f64) -> f64 {
    if mel < 15.0 {
        200.0 * mel / 3.0
    } else {
        1000.0 * ((mel - 15.0) * 6.4_f64.ln() / 27.0).exp()
    }
}
