//! Generation pipeline for AudioLDM.
//!
//! Entry points for the three generation modes. Each call seeds its own
//! `ChaCha8Rng` and passes the conditioning mode explicitly, so the model
//! carries no per-request state between calls.

use std::path::PathBuf;

use ndarray::{Array3, Axis};
use tracing::{info, warn};

use crate::audio::{read_wav_file, wav_to_fbank, TacotronStft};
use crate::error::{AudioLdmError, Result};
use crate::models::latent_diffusion::clip_latent;
use crate::models::{LatentDiffusion, SampleOptions};
use crate::sampler::{rng_from_seed, Guidance};
use crate::types::{Batch, ConditioningRequest, MaskRatios};

/// Latent frames per second of audio.
pub const LATENT_FRAMES_PER_SECOND: f64 = 25.6;

/// Spectrogram frames per second of audio.
pub const MEL_FRAMES_PER_SECOND: f64 = 102.4;

/// DDIM stochasticity used by every generation mode.
const DDIM_ETA: f64 = 1.0;

/// Parameters for [`text_to_audio`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextToAudioParams {
    pub text: String,
    /// Reference recording; when set, generation is conditioned on its CLAP
    /// audio embedding instead of the text.
    pub audio_path: Option<PathBuf>,
    pub seed: u64,
    pub ddim_steps: usize,
    /// Seconds of audio to generate.
    pub duration: f64,
    pub batchsize: usize,
    pub guidance_scale: f32,
    pub n_candidates: usize,
}

impl Default for TextToAudioParams {
    fn default() -> Self {
        Self {
            text: String::new(),
            audio_path: None,
            seed: 42,
            ddim_steps: 200,
            duration: 10.0,
            batchsize: 1,
            guidance_scale: 2.5,
            n_candidates: 3,
        }
    }
}

/// Parameters for [`style_transfer`].
#[derive(Debug, Clone, PartialEq)]
pub struct StyleTransferParams {
    pub text: String,
    pub audio_path: PathBuf,
    /// Fraction of the DDIM schedule re-run on the noised reference, in `[0, 1]`.
    pub transfer_strength: f64,
    pub seed: u64,
    pub duration: f64,
    pub batchsize: usize,
    pub guidance_scale: f32,
    pub ddim_steps: usize,
}

impl Default for StyleTransferParams {
    fn default() -> Self {
        Self {
            text: String::new(),
            audio_path: PathBuf::new(),
            transfer_strength: 0.5,
            seed: 42,
            duration: 10.0,
            batchsize: 1,
            guidance_scale: 2.5,
            ddim_steps: 200,
        }
    }
}

/// Parameters for [`super_resolution_and_inpainting`].
#[derive(Debug, Clone, PartialEq)]
pub struct InpaintingParams {
    pub text: String,
    pub audio_path: PathBuf,
    pub seed: u64,
    pub ddim_steps: usize,
    pub duration: f64,
    pub batchsize: usize,
    pub guidance_scale: f32,
    pub n_candidates: usize,
    /// Time and frequency ranges to regenerate.
    pub mask: MaskRatios,
}

impl Default for InpaintingParams {
    fn default() -> Self {
        Self {
            text: String::new(),
            audio_path: PathBuf::new(),
            seed: 42,
            ddim_steps: 200,
            duration: 10.0,
            batchsize: 1,
            guidance_scale: 2.5,
            n_candidates: 3,
            mask: MaskRatios::default(),
        }
    }
}

/// Latent time size for `duration` seconds (256 for 10 s).
pub fn duration_to_latent_t_size(duration: f64) -> usize {
    (duration * LATENT_FRAMES_PER_SECOND).floor() as usize
}

/// Spectrogram frames covering `duration` seconds (1024 for 10 s).
pub fn duration_to_frames(duration: f64) -> usize {
    (duration * MEL_FRAMES_PER_SECOND).floor() as usize
}

/// Generates audio from a text prompt, or from the content of a reference
/// recording when `audio_path` is set.
///
/// Returns one 16 kHz waveform per batch element.
///
/// # Example
///
/// ```ignore
/// use audioldm::generation::{text_to_audio, TextToAudioParams};
///
/// let waveforms = text_to_audio(
///     &mut model,
///     &TextToAudioParams {
///         text: "a hammer hitting a wooden surface".to_string(),
///         ..Default::default()
///     },
/// )?;
/// ```
pub fn text_to_audio(model: &mut LatentDiffusion, params: &TextToAudioParams) -> Result<Vec<Vec<f32>>> {
    text_to_audio_with_progress(model, params, |_, _| {})
}

/// [`text_to_audio`] with a callback receiving `(step, total_steps)`.
pub fn text_to_audio_with_progress<F>(
    model: &mut LatentDiffusion,
    params: &TextToAudioParams,
    on_progress: F,
) -> Result<Vec<Vec<f32>>>
where
    F: Fn(usize, usize),
{
    validate_duration(params.duration)?;
    let mut rng = rng_from_seed(params.seed);

    let waveform = match &params.audio_path {
        Some(path) => {
            let config = model.config();
            let samples = duration_to_frames(params.duration) * config.preprocessing.stft.hop_length;
            Some(read_wav_file(path, samples, config.preprocessing.audio.sampling_rate)?)
        }
        None => None,
    };

    let batch = Batch::for_text_to_audio(
        &params.text,
        waveform.as_ref().map(|w| w.view()),
        None,
        params.batchsize,
    )?;
    let request = ConditioningRequest::for_reference(waveform.is_some());

    match &params.audio_path {
        Some(path) => info!(reference = %path.display(), "Generating audio similar to reference"),
        None => info!(text = %params.text, "Generating audio from text"),
    }

    let options = SampleOptions {
        ddim_steps: params.ddim_steps,
        eta: DDIM_ETA,
        guidance_scale: params.guidance_scale,
        n_candidates: params.n_candidates,
        latent_t_size: duration_to_latent_t_size(params.duration),
    };
    model.generate_sample(&batch, request, &options, &mut rng, &on_progress)
}

/// Re-renders a reference recording toward a text prompt.
///
/// The reference is encoded to a latent, noised to
/// `floor(transfer_strength * ddim_steps)` DDIM steps and denoised under the
/// text conditioning. Strength 0 returns the reference reconstruction;
/// strength 1 runs the whole schedule.
pub fn style_transfer(model: &mut LatentDiffusion, params: &StyleTransferParams) -> Result<Vec<Vec<f32>>> {
    style_transfer_with_progress(model, params, |_, _| {})
}

/// [`style_transfer`] with a callback receiving `(step, total_steps)`.
pub fn style_transfer_with_progress<F>(
    model: &mut LatentDiffusion,
    params: &StyleTransferParams,
    on_progress: F,
) -> Result<Vec<Vec<f32>>>
where
    F: Fn(usize, usize),
{
    validate_duration(params.duration)?;
    if !(0.0..=1.0).contains(&params.transfer_strength) {
        return Err(AudioLdmError::invalid_parameter(format!(
            "transfer_strength must be in [0, 1], got {}",
            params.transfer_strength
        )));
    }
    let b = params.batchsize;
    if b < 1 {
        warn!(batchsize = b, "Batchsize must be at least 1; nothing to generate");
        return Ok(Vec::new());
    }

    let mut rng = rng_from_seed(params.seed);

    let stft = TacotronStft::from_config(model.config());
    let fbank = wav_to_fbank(&params.audio_path, duration_to_frames(params.duration), &stft)?.fbank;
    let (frames, bins) = fbank.dim();
    let mel: Array3<f32> = fbank
        .insert_axis(Axis(0))
        .broadcast((b, frames, bins))
        .ok_or_else(|| AudioLdmError::batch_size_mismatch("fbank", &[1, frames, bins], b))?
        .to_owned();

    let init_latent = clip_latent(model.encode_fbank(&mel, &mut rng)?);

    let mut sampler = model.sampler();
    sampler.make_schedule(params.ddim_steps, DDIM_ETA)?;
    let t_enc = (params.transfer_strength * params.ddim_steps as f64).floor() as usize;

    info!(
        reference = %params.audio_path.display(),
        text = %params.text,
        t_enc,
        ddim_steps = params.ddim_steps,
        "Running style transfer"
    );

    let uc = if params.guidance_scale != 1.0 {
        Some(model.unconditional_conditioning(b)?)
    } else {
        None
    };
    let c = model.encode_text(&vec![params.text.clone(); b])?;
    let guidance = Guidance::new(c, uc, params.guidance_scale);

    let z_enc = sampler.stochastic_encode(&init_latent, t_enc, &mut rng)?;
    let samples = sampler.decode(
        model.noise_predictor(),
        &z_enc,
        &guidance,
        t_enc,
        &mut rng,
        &on_progress,
    )?;

    let mel = model.decode_first_stage(&samples)?;
    let waveform = model.mel_spectrogram_to_waveform(&mel)?;
    Ok(waveform.outer_iter().map(|row| row.to_vec()).collect())
}

/// Regenerates the masked time/frequency regions of a reference recording.
///
/// With the default frequency range `(1.0, 1.0)` only the time range is
/// inpainted; a range such as `(0.75, 1.0)` regenerates the top mel bins
/// (super-resolution).
pub fn super_resolution_and_inpainting(
    model: &mut LatentDiffusion,
    params: &InpaintingParams,
) -> Result<Vec<Vec<f32>>> {
    super_resolution_and_inpainting_with_progress(model, params, |_, _| {})
}

/// [`super_resolution_and_inpainting`] with a callback receiving `(step, total_steps)`.
pub fn super_resolution_and_inpainting_with_progress<F>(
    model: &mut LatentDiffusion,
    params: &InpaintingParams,
    on_progress: F,
) -> Result<Vec<Vec<f32>>>
where
    F: Fn(usize, usize),
{
    validate_duration(params.duration)?;
    params.mask.validate()?;
    let mut rng = rng_from_seed(params.seed);

    let stft = TacotronStft::from_config(model.config());
    let fbank = wav_to_fbank(&params.audio_path, duration_to_frames(params.duration), &stft)?.fbank;
    let fbank = fbank.insert_axis(Axis(0));

    let batch = Batch::for_text_to_audio(&params.text, None, Some(fbank.view()), params.batchsize)?;

    info!(
        reference = %params.audio_path.display(),
        text = %params.text,
        time_mask = ?params.mask.time,
        freq_mask = ?params.mask.freq,
        "Running super-resolution and inpainting"
    );

    let options = SampleOptions {
        ddim_steps: params.ddim_steps,
        eta: DDIM_ETA,
        guidance_scale: params.guidance_scale,
        n_candidates: params.n_candidates,
        latent_t_size: duration_to_latent_t_size(params.duration),
    };
    model.generate_sample_masked(
        &batch,
        ConditioningRequest::text(),
        &options,
        &params.mask,
        &mut rng,
        &on_progress,
    )
}

fn validate_duration(duration: f64) -> Result<()> {
    if !(duration.is_finite() && duration > 0.0) {
        return Err(AudioLdmError::invalid_parameter(format!(
            "duration must be a positive number of seconds, got {}",
            duration
        )));
    }
    if duration_to_latent_t_size(duration) == 0 {
        return Err(AudioLdmError::invalid_parameter(format!(
            "duration {}s is shorter than one latent frame",
            duration
        )));
    }
    Ok(())
}
