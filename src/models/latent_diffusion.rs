//! Latent diffusion model bundle.
//!
//! [`LatentDiffusion`] owns the configuration, the DDPM noise schedule and
//! the four model collaborators. It turns a [`Batch`] into conditioning,
//! runs the DDIM sampler in latent space, decodes latents back to
//! spectrograms and waveforms, and ranks candidate generations by CLAP
//! similarity.

use ndarray::{concatenate, Array2, Array3, Array4, Axis};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{AudioLdmError, Result};
use crate::sampler::{DdimSampler, Guidance, LatentMask, NoiseSchedule};
use crate::types::{Batch, ConditionKey, ConditioningRequest, EmbedMode, MaskRatios, ModelConfig, ModelParams};

use super::loader::load_models;
use super::vae::DiagonalGaussian;
use super::{repeat_batch, ConditionEncoder, FirstStage, NoisePredictor, Vocoder};

/// Latents whose magnitude exceeds this are clipped before decoding.
const LATENT_CLIP_THRESHOLD: f32 = 100.0;

/// Clip bound applied to diverged latents.
const LATENT_CLIP: f32 = 10.0;

/// Sampling parameters for [`LatentDiffusion::generate_sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOptions {
    pub ddim_steps: usize,
    pub eta: f64,
    pub guidance_scale: f32,
    /// Candidates generated per batch element; the best by CLAP score is kept.
    pub n_candidates: usize,
    /// Latent frames; see `duration_to_latent_t_size`.
    pub latent_t_size: usize,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            ddim_steps: 200,
            eta: 1.0,
            guidance_scale: 2.5,
            n_candidates: 3,
            latent_t_size: 256,
        }
    }
}

impl SampleOptions {
    pub fn validate(&self) -> Result<()> {
        if self.n_candidates < 1 {
            return Err(AudioLdmError::invalid_parameter(
                "n_candidates must be at least 1",
            ));
        }
        if !self.guidance_scale.is_finite() {
            return Err(AudioLdmError::invalid_parameter(format!(
                "guidance_scale must be finite, got {}",
                self.guidance_scale
            )));
        }
        if self.latent_t_size == 0 {
            return Err(AudioLdmError::invalid_parameter(
                "latent_t_size must be positive; increase the duration",
            ));
        }
        Ok(())
    }
}

/// AudioLDM latent diffusion model.
pub struct LatentDiffusion {
    config: ModelConfig,
    ddpm: NoiseSchedule,
    unet: Box<dyn NoisePredictor + Send>,
    cond_stage: Box<dyn ConditionEncoder + Send>,
    first_stage: Box<dyn FirstStage + Send>,
    vocoder: Box<dyn Vocoder + Send>,
}

impl LatentDiffusion {
    /// Assembles a model from its collaborators.
    ///
    /// The configuration must validate, use `fbank` as the first-stage key
    /// and name a known conditioning key.
    pub fn new(
        config: ModelConfig,
        unet: Box<dyn NoisePredictor + Send>,
        cond_stage: Box<dyn ConditionEncoder + Send>,
        first_stage: Box<dyn FirstStage + Send>,
        vocoder: Box<dyn Vocoder + Send>,
    ) -> Result<Self> {
        config.validate()?;
        let params = &config.model.params;
        if params.first_stage_key != "fbank" {
            return Err(AudioLdmError::config_invalid(format!(
                "first_stage_key must be 'fbank', got '{}'",
                params.first_stage_key
            )));
        }
        if ConditionKey::parse(&params.cond_stage_key).is_none() {
            return Err(AudioLdmError::config_invalid(format!(
                "unknown cond_stage_key '{}'",
                params.cond_stage_key
            )));
        }

        let ddpm = NoiseSchedule::from_params(params);
        Ok(Self {
            config,
            ddpm,
            unet,
            cond_stage,
            first_stage,
            vocoder,
        })
    }

    /// Loads the ONNX checkpoint described by `runtime`.
    pub fn load(runtime: &RuntimeConfig) -> Result<Self> {
        load_models(runtime)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn params(&self) -> &ModelParams {
        &self.config.model.params
    }

    pub fn scale_factor(&self) -> f32 {
        self.config.model.params.scale_factor
    }

    /// A fresh DDIM sampler over this model's noise schedule.
    pub fn sampler(&self) -> DdimSampler {
        DdimSampler::new(self.ddpm.clone())
    }

    pub fn noise_predictor(&mut self) -> &mut dyn NoisePredictor {
        self.unet.as_mut()
    }

    /// Encodes the batch slot named by the request key through the branch
    /// named by its embed mode.
    pub fn get_learned_conditioning(
        &mut self,
        batch: &Batch,
        request: ConditioningRequest,
    ) -> Result<Array3<f32>> {
        let c = match (request.key(), request.embed_mode()) {
            (ConditionKey::Text, EmbedMode::Text) => self.cond_stage.encode_text(&batch.text)?,
            (ConditionKey::Waveform, EmbedMode::Audio) => {
                self.cond_stage.encode_audio(batch.waveform.view())?
            }
            (key, mode) => {
                return Err(AudioLdmError::invalid_parameter(format!(
                    "conditioning key '{}' cannot be embedded in {} mode",
                    key,
                    mode.as_str()
                )))
            }
        };

        if c.shape()[0] != batch.batch_size() {
            return Err(AudioLdmError::model_inference_failed(format!(
                "conditioning has batch {} for a batch of {}",
                c.shape()[0],
                batch.batch_size()
            )));
        }
        Ok(c)
    }

    /// Embeds prompts through the text branch.
    pub fn encode_text(&mut self, texts: &[String]) -> Result<Array3<f32>> {
        self.cond_stage.encode_text(texts)
    }

    /// Empty-prompt embedding repeated `batch` times.
    pub fn unconditional_conditioning(&mut self, batch: usize) -> Result<Array3<f32>> {
        self.cond_stage.unconditional(batch)
    }

    /// VAE posterior for `(b, 1, frames, mel_bins)` spectrograms.
    pub fn encode_first_stage(&mut self, mel: &Array4<f32>) -> Result<DiagonalGaussian> {
        self.first_stage.encode(mel)
    }

    /// Samples the posterior and scales it into diffusion space.
    pub fn get_first_stage_encoding(
        &self,
        posterior: &DiagonalGaussian,
        rng: &mut ChaCha8Rng,
    ) -> Array4<f32> {
        posterior.sample(rng) * self.scale_factor()
    }

    /// Encodes `(b, frames, mel_bins)` log-mel spectrograms into scaled latents.
    pub fn encode_fbank(&mut self, fbank: &Array3<f32>, rng: &mut ChaCha8Rng) -> Result<Array4<f32>> {
        let mel = fbank.view().insert_axis(Axis(1)).to_owned();
        let posterior = self.encode_first_stage(&mel)?;
        Ok(self.get_first_stage_encoding(&posterior, rng))
    }

    /// Unscales latents and decodes them to `(b, 1, frames, mel_bins)` spectrograms.
    pub fn decode_first_stage(&mut self, z: &Array4<f32>) -> Result<Array4<f32>> {
        let unscaled = z / self.scale_factor();
        self.first_stage.decode(&unscaled)
    }

    /// Runs the vocoder on `(b, 1, frames, mel_bins)` spectrograms.
    pub fn mel_spectrogram_to_waveform(&mut self, mel: &Array4<f32>) -> Result<Array2<f32>> {
        if mel.shape()[1] != 1 {
            return Err(AudioLdmError::model_inference_failed(format!(
                "expected a single-channel spectrogram, got shape {:?}",
                mel.shape()
            )));
        }
        let mel = mel
            .index_axis(Axis(1), 0)
            .permuted_axes([0, 2, 1])
            .as_standard_layout()
            .into_owned();
        let waveform = self.vocoder.synthesize(&mel)?;
        if waveform.nrows() != mel.shape()[0] {
            return Err(AudioLdmError::model_inference_failed(format!(
                "vocoder returned {} waveforms for {} spectrograms",
                waveform.nrows(),
                mel.shape()[0]
            )));
        }
        Ok(waveform)
    }

    /// Generates waveforms for every batch element from Gaussian noise.
    ///
    /// Produces `n_candidates` per element and keeps the one whose audio is
    /// closest to its text under CLAP.
    pub fn generate_sample(
        &mut self,
        batch: &Batch,
        request: ConditioningRequest,
        options: &SampleOptions,
        rng: &mut ChaCha8Rng,
        progress: &dyn Fn(usize, usize),
    ) -> Result<Vec<Vec<f32>>> {
        options.validate()?;
        let b = batch.batch_size();
        if b == 0 {
            return Ok(Vec::new());
        }

        let c = self.get_learned_conditioning(batch, request)?;
        let (guidance, texts) = self.candidate_guidance(c, &batch.text, options)?;

        let mut sampler = self.sampler();
        sampler.make_schedule(options.ddim_steps, options.eta)?;

        let params = self.params();
        let shape = (
            b * options.n_candidates,
            params.channels,
            options.latent_t_size,
            params.latent_f_size,
        );
        info!(
            batch = b,
            candidates = options.n_candidates,
            ddim_steps = options.ddim_steps,
            guidance_scale = options.guidance_scale,
            conditioning = %request.key(),
            "Generating samples"
        );

        let samples = sampler.sample(self.unet.as_mut(), shape, &guidance, None, rng, progress)?;
        self.finish_candidates(samples, &texts, b)
    }

    /// Regenerates the masked regions of the batch spectrogram.
    ///
    /// The batch `fbank` is encoded into a clean latent; positions outside
    /// the mask ranges are re-imposed from it at every step. The latent time
    /// size follows the encoded spectrogram, so `options.latent_t_size` is
    /// not used.
    pub fn generate_sample_masked(
        &mut self,
        batch: &Batch,
        request: ConditioningRequest,
        options: &SampleOptions,
        mask: &MaskRatios,
        rng: &mut ChaCha8Rng,
        progress: &dyn Fn(usize, usize),
    ) -> Result<Vec<Vec<f32>>> {
        options.validate()?;
        mask.validate()?;
        let b = batch.batch_size();
        if b == 0 {
            return Ok(Vec::new());
        }

        let z = self.encode_fbank(&batch.fbank, rng)?;
        let c = self.get_learned_conditioning(batch, request)?;
        let (guidance, texts) = self.candidate_guidance(c, &batch.text, options)?;

        let n = options.n_candidates;
        let x0 = concatenate(Axis(0), &vec![z.view(); n]).map_err(|e| {
            AudioLdmError::model_inference_failed(format!("Failed to repeat latent: {}", e))
        })?;
        let (total, _, h, w) = x0.dim();
        let keep = mask.to_keep_mask(total, h, w);
        debug!(
            time = ?mask.time_range(h),
            freq = ?mask.freq_range(w),
            "Built latent mask"
        );

        let mut sampler = self.sampler();
        sampler.make_schedule(options.ddim_steps, options.eta)?;

        info!(
            batch = b,
            candidates = n,
            ddim_steps = options.ddim_steps,
            guidance_scale = options.guidance_scale,
            "Generating masked samples"
        );

        let latent_mask = LatentMask {
            x0: &x0,
            keep: &keep,
        };
        let samples = sampler.sample(
            self.unet.as_mut(),
            x0.dim(),
            &guidance,
            Some(latent_mask),
            rng,
            progress,
        )?;
        self.finish_candidates(samples, &texts, b)
    }

    /// Repeats conditioning and texts per candidate and attaches the
    /// unconditional embedding when guidance is on.
    fn candidate_guidance(
        &mut self,
        c: Array3<f32>,
        texts: &[String],
        options: &SampleOptions,
    ) -> Result<(Guidance, Vec<String>)> {
        let n = options.n_candidates;
        let c = repeat_batch(&c, n)?;
        let texts: Vec<String> = (0..n).flat_map(|_| texts.iter().cloned()).collect();

        let uc = if options.guidance_scale != 1.0 {
            Some(self.cond_stage.unconditional(texts.len())?)
        } else {
            None
        };
        Ok((Guidance::new(c, uc, options.guidance_scale), texts))
    }

    /// Decodes sampled latents and keeps the best candidate per batch element.
    fn finish_candidates(
        &mut self,
        samples: Array4<f32>,
        texts: &[String],
        batch: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let samples = clip_latent(samples);
        let mel = self.decode_first_stage(&samples)?;
        let waveform = self.mel_spectrogram_to_waveform(&mel)?;

        let waveform = if waveform.nrows() > 1 {
            let similarity = self.cond_stage.similarity(waveform.view(), texts)?;
            let best = select_best_candidates(&similarity, batch);
            debug!(?best, "Selected candidates by CLAP similarity");
            waveform.select(Axis(0), &best)
        } else {
            waveform
        };

        Ok(waveform.outer_iter().map(|row| row.to_vec()).collect())
    }
}

/// Clips a latent to `[-10, 10]` when any element exceeds 100 in magnitude.
pub fn clip_latent(x: Array4<f32>) -> Array4<f32> {
    let max = x.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max > LATENT_CLIP_THRESHOLD {
        warn!(max, "Latent diverged; clipping to [-10, 10]");
        x.mapv(|v| v.clamp(-LATENT_CLIP, LATENT_CLIP))
    } else {
        x
    }
}

/// For each batch element `i`, the index among `i + k * batch` with the
/// highest similarity. Ties keep the earliest candidate.
pub fn select_best_candidates(similarity: &[f32], batch: usize) -> Vec<usize> {
    (0..batch)
        .map(|i| {
            (i..similarity.len())
                .step_by(batch)
                .fold(i, |best, j| if similarity[j] > similarity[best] { j } else { best })
        })
        .collect()
}
