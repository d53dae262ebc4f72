//! Mono sample-rate conversion with rubato.

use rubato::{FftFixedIn, Resampler};

use crate::error::{AudioLdmError, ErrorCode, Result};

const CHUNK: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resamples mono PCM from `sr_in` to `sr_out`.
///
/// The output holds `round(len * sr_out / sr_in)` samples with the
/// resampler delay removed.
pub fn resample_mono(input: &[f32], sr_in: u32, sr_out: u32) -> Result<Vec<f32>> {
    if sr_in == sr_out || input.is_empty() {
        return Ok(input.to_vec());
    }
    if sr_in == 0 || sr_out == 0 {
        return Err(AudioLdmError::audio_read_failed(format!(
            "Cannot resample from {} Hz to {} Hz",
            sr_in, sr_out
        )));
    }

    let mut resampler = FftFixedIn::<f32>::new(sr_in as usize, sr_out as usize, CHUNK, SUB_CHUNKS, 1)
        .map_err(|e| {
            AudioLdmError::with_source(ErrorCode::AudioReadFailed, "Failed to build resampler", e)
        })?;

    let delay = resampler.output_delay();
    let expected = (input.len() as f64 * sr_out as f64 / sr_in as f64).round() as usize;
    let mut out = Vec::with_capacity(expected + delay + CHUNK);

    // Feed zero-padded chunks until the delayed output covers the input.
    let mut pos = 0;
    while out.len() < expected + delay {
        let mut chunk = vec![0.0f32; CHUNK];
        if pos < input.len() {
            let end = (pos + CHUNK).min(input.len());
            chunk[..end - pos].copy_from_slice(&input[pos..end]);
        }
        pos += CHUNK;

        let frames = resampler.process(&[chunk], None).map_err(|e| {
            AudioLdmError::with_source(ErrorCode::AudioReadFailed, "Resampling failed", e)
        })?;
        if frames[0].is_empty() && pos > input.len() + 4 * CHUNK {
            break;
        }
        out.extend_from_slice(&frames[0]);
    }

    let start = delay.min(out.len());
    let end = (delay + expected).min(out.len());
    Ok(out[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_identity() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample_mono(&input, 16000, 16000).unwrap(), input);
    }

    #[test]
    fn output_length_follows_ratio() {
        let input = vec![0.0f32; 44100];
        assert_eq!(resample_mono(&input, 44100, 16000).unwrap().len(), 16000);

        let input = vec![0.0f32; 16000];
        assert_eq!(resample_mono(&input, 16000, 48000).unwrap().len(), 48000);
    }

    #[test]
    fn preserves_low_frequency_tone() {
        let sr_in = 48000;
        let input: Vec<f32> = (0..sr_in)
            .map(|i| (2.0 * std::f32::consts::PI * 200.0 * i as f32 / sr_in as f32).sin())
            .collect();
        let out = resample_mono(&input, sr_in, 16000).unwrap();

        let middle = &out[2000..14000];
        let rms = (middle.iter().map(|v| v * v).sum::<f32>() / middle.len() as f32).sqrt();
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {}", rms);

        // 0.75 s of a 200 Hz tone rises through zero 150 times.
        let crossings = middle.windows(2).filter(|w| w[0] <= 0.0 && w[1] > 0.0).count();
        assert!((148..=152).contains(&crossings), "crossings {}", crossings);
    }
}
