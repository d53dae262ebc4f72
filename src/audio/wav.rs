//! WAV file input and output.
//!
//! Reference recordings are decoded with hound, mixed down to mono,
//! resampled to the model rate and normalized. Generated audio is written
//! as mono 32-bit float WAV.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use ndarray::Array2;
use tracing::debug;

use crate::error::{AudioLdmError, ErrorCode, Result};

use super::resample::resample_mono;

/// Output sample rate of the vocoder.
pub const SAMPLE_RATE: u32 = 16000;

/// Shortest accepted reference recording, in samples.
pub const MIN_WAV_SAMPLES: usize = 100;

/// Reads a WAV file into interleaved f32 samples in `[-1, 1]`.
///
/// Returns `(samples, sample_rate, channels)`.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32, u16)> {
    let reader = WavReader::open(path).map_err(|e| {
        AudioLdmError::with_source(
            ErrorCode::AudioReadFailed,
            format!("Failed to open WAV file {}", path.display()),
            e,
        )
    })?;
    let spec = reader.spec();

    let samples: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect(),
        SampleFormat::Int => {
            let max_val = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect()
        }
    };

    let samples = samples.map_err(|e| {
        AudioLdmError::with_source(
            ErrorCode::AudioReadFailed,
            format!("Failed to decode WAV samples from {}", path.display()),
            e,
        )
    })?;

    Ok((samples, spec.sample_rate, spec.channels))
}

/// Averages interleaved channels into one.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Removes the mean and scales the peak to 0.5.
pub fn normalize_wav(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    samples.iter_mut().for_each(|s| *s -= mean);
    let peak = peak(samples);
    samples.iter_mut().for_each(|s| *s = *s / (peak + 1e-8) * 0.5);
}

/// Trims or zero-pads to exactly `segment_length` samples.
pub fn pad_wav(samples: &[f32], segment_length: usize) -> Result<Vec<f32>> {
    if samples.len() <= MIN_WAV_SAMPLES {
        return Err(AudioLdmError::audio_read_failed(format!(
            "Waveform is too short, {} samples",
            samples.len()
        )));
    }
    let mut padded = vec![0.0f32; segment_length];
    let n = samples.len().min(segment_length);
    padded[..n].copy_from_slice(&samples[..n]);
    Ok(padded)
}

/// Loads a reference recording as a `(1, segment_length)` waveform at `sampling_rate`.
///
/// The signal is mixed to mono, resampled, normalized, fitted to the segment
/// length and finally scaled so its peak is 0.5.
pub fn read_wav_file(path: &Path, segment_length: usize, sampling_rate: u32) -> Result<Array2<f32>> {
    let (samples, source_rate, channels) = read_wav(path)?;
    let mono = downmix(&samples, channels);
    let mut waveform = resample_mono(&mono, source_rate, sampling_rate)?;

    debug!(
        path = %path.display(),
        source_rate,
        channels,
        samples = waveform.len(),
        segment_length,
        "Loaded reference audio"
    );

    normalize_wav(&mut waveform);
    let mut waveform = pad_wav(&waveform, segment_length)?;

    let peak = peak(&waveform);
    if peak > 0.0 {
        waveform.iter_mut().for_each(|s| *s = *s / peak * 0.5);
    }

    Array2::from_shape_vec((1, segment_length), waveform)
        .map_err(|e| AudioLdmError::audio_read_failed(format!("Failed to shape waveform: {}", e)))
}

/// Writes mono samples to a 32-bit float WAV file.
///
/// # Example
///
/// ```ignore
/// use audioldm::audio::write_wav;
///
/// let samples = vec![0.0, 0.5, -0.5, 0.0];
/// write_wav(&samples, Path::new("/tmp/test.wav"), 16000)?;
/// ```
pub fn write_wav(samples: &[f32], path: &Path, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec).map_err(|e| {
        AudioLdmError::audio_write_failed(format!("Failed to create {}: {}", path.display(), e))
    })?;

    for &sample in samples {
        writer.write_sample(sample).map_err(|e| {
            AudioLdmError::audio_write_failed(format!("Failed to write sample: {}", e))
        })?;
    }

    writer.finalize().map_err(|e| {
        AudioLdmError::audio_write_failed(format!("Failed to finalize {}: {}", path.display(), e))
    })?;

    Ok(())
}

/// Calculates the duration of audio in seconds from sample count.
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> f32 {
    sample_count as f32 / sample_rate as f32
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_sine(path: &Path, sample_rate: u32, channels: u16, seconds: f32) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        let frames = (sample_rate as f32 * seconds) as usize;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let v = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3 + 0.05;
            for _ in 0..channels {
                writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn write_wav_creates_mono_float_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        write_wav(&[0.0, 0.5, -0.5, 0.0], &path, SAMPLE_RATE).unwrap();

        let reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.sample_format, SampleFormat::Float);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn write_wav_to_missing_dir_fails() {
        let err = write_wav(&[0.0], Path::new("/nonexistent/dir/out.wav"), SAMPLE_RATE).unwrap_err();
        assert_eq!(err.code, ErrorCode::AudioWriteFailed);
    }

    #[test]
    fn downmix_averages_channels() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn normalize_removes_mean_and_scales() {
        let mut samples = vec![1.0, 2.0, 3.0];
        normalize_wav(&mut samples);
        assert!((samples.iter().sum::<f32>()).abs() < 1e-6);
        assert!((peak(&samples) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn pad_wav_pads_and_trims() {
        let samples: Vec<f32> = (0..200).map(|i| i as f32).collect();
        let padded = pad_wav(&samples, 300).unwrap();
        assert_eq!(padded.len(), 300);
        assert_eq!(padded[199], 199.0);
        assert_eq!(padded[250], 0.0);

        let trimmed = pad_wav(&samples, 150).unwrap();
        assert_eq!(trimmed.len(), 150);
        assert_eq!(trimmed[149], 149.0);
    }

    #[test]
    fn pad_wav_rejects_short_input() {
        let err = pad_wav(&[0.1; 100], 1000).unwrap_err();
        assert_eq!(err.code, ErrorCode::AudioReadFailed);
    }

    #[test]
    fn read_wav_file_shapes_and_normalizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ref.wav");
        write_sine(&path, 16000, 2, 0.5);

        let waveform = read_wav_file(&path, 16000, 16000).unwrap();
        assert_eq!(waveform.shape(), &[1, 16000]);
        let max = waveform.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((max - 0.5).abs() < 1e-5);
        // second half is padding
        assert!(waveform.iter().skip(8000).all(|&v| v == 0.0));
    }

    #[test]
    fn read_wav_file_resamples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ref44.wav");
        write_sine(&path, 44100, 1, 1.0);

        let waveform = read_wav_file(&path, 32000, 16000).unwrap();
        assert_eq!(waveform.shape(), &[1, 32000]);
        // one second of audio at 16 kHz, then zeros
        assert!(waveform.iter().take(15000).any(|&v| v.abs() > 0.1));
        assert!(waveform.iter().skip(16100).all(|&v| v == 0.0));
    }

    #[test]
    fn read_missing_file_fails() {
        let err = read_wav_file(Path::new("/nonexistent.wav"), 100, 16000).unwrap_err();
        assert_eq!(err.code, ErrorCode::AudioReadFailed);
    }

    #[test]
    fn samples_to_duration_calculation() {
        assert_eq!(samples_to_duration(16000, 16000), 1.0);
        assert_eq!(samples_to_duration(8000, 16000), 0.5);
    }
}
