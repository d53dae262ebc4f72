//! DDIM sampler.
//!
//! The sampler holds the DDPM training schedule and, once
//! [`DdimSampler::make_schedule`] has run, the DDIM sub-schedule. Every
//! sampling operation fails with `INVALID_PARAMETER` until then.

use ndarray::{Array4, Zip};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::error::{AudioLdmError, Result};
use crate::models::NoisePredictor;

use super::guidance::Guidance;
use super::noise::{randn, randn_like};
use super::schedule::{DdimSchedule, NoiseSchedule};

/// Clean latent and keep-mask for masked sampling.
///
/// `keep` is 1 where `x0` is preserved and 0 where content is regenerated.
/// Its channel axis may be 1 and is broadcast over the latent channels.
#[derive(Debug, Clone, Copy)]
pub struct LatentMask<'a> {
    pub x0: &'a Array4<f32>,
    pub keep: &'a Array4<f32>,
}

/// DDIM sampler over a DDPM noise schedule.
#[derive(Debug, Clone)]
pub struct DdimSampler {
    ddpm: NoiseSchedule,
    schedule: Option<DdimSchedule>,
}

impl DdimSampler {
    pub fn new(ddpm: NoiseSchedule) -> Self {
        Self {
            ddpm,
            schedule: None,
        }
    }

    /// Builds the DDIM sub-schedule for `steps` steps and stochasticity `eta`.
    pub fn make_schedule(&mut self, steps: usize, eta: f64) -> Result<()> {
        let schedule = DdimSchedule::new(&self.ddpm, steps, eta)?;
        debug!(
            steps,
            eta,
            schedule_len = schedule.len(),
            "Built DDIM schedule"
        );
        self.schedule = Some(schedule);
        Ok(())
    }

    /// Returns the DDIM schedule, or an error if none has been built.
    pub fn schedule(&self) -> Result<&DdimSchedule> {
        self.schedule.as_ref().ok_or_else(|| {
            AudioLdmError::invalid_parameter("DDIM schedule not initialized; call make_schedule first")
        })
    }

    pub fn ddpm(&self) -> &NoiseSchedule {
        &self.ddpm
    }

    /// Noises a clean latent to DDIM step `t`.
    ///
    /// `t` past the end of the schedule is clamped to the last step.
    pub fn stochastic_encode(
        &self,
        x0: &Array4<f32>,
        t: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Array4<f32>> {
        let schedule = self.schedule()?;
        let index = t.min(schedule.len() - 1);
        let sqrt_alpha = schedule.alphas()[index].sqrt() as f32;
        let sqrt_one_minus_alpha = schedule.sqrt_one_minus_alphas()[index] as f32;

        let mut noised = randn_like(x0, rng);
        Zip::from(&mut noised).and(x0).for_each(|n, &x| {
            *n = sqrt_alpha * x + sqrt_one_minus_alpha * *n;
        });
        Ok(noised)
    }

    /// Denoises `x_latent` from DDIM step `t_start` down to step 0.
    ///
    /// `t_start == 0` returns the latent unchanged.
    pub fn decode(
        &self,
        model: &mut dyn NoisePredictor,
        x_latent: &Array4<f32>,
        guidance: &Guidance,
        t_start: usize,
        rng: &mut ChaCha8Rng,
        progress: &dyn Fn(usize, usize),
    ) -> Result<Array4<f32>> {
        let schedule = self.schedule()?;
        if t_start > schedule.len() {
            return Err(AudioLdmError::invalid_parameter(format!(
                "decode start step {} beyond schedule of {} steps",
                t_start,
                schedule.len()
            )));
        }

        info!(total_steps = t_start, "Running DDIM decoding");

        let mut x_dec = x_latent.clone();
        for (i, &step) in schedule.timesteps()[..t_start].iter().rev().enumerate() {
            let index = t_start - i - 1;
            x_dec = self.p_sample_ddim(model, &x_dec, guidance, step, index, rng)?;
            debug!(step = i + 1, total = t_start, timestep = step, "Decoding step");
            progress(i + 1, t_start);
        }

        Ok(x_dec)
    }

    /// Samples a latent of `shape` from Gaussian noise through every DDIM step.
    ///
    /// With a mask, the preserved region is re-imposed from the noised clean
    /// latent before each step.
    pub fn sample(
        &self,
        model: &mut dyn NoisePredictor,
        shape: (usize, usize, usize, usize),
        guidance: &Guidance,
        mask: Option<LatentMask<'_>>,
        rng: &mut ChaCha8Rng,
        progress: &dyn Fn(usize, usize),
    ) -> Result<Array4<f32>> {
        let schedule = self.schedule()?;
        let mut img: Array4<f32> = randn(shape, rng);

        if let Some(mask) = mask {
            if mask.x0.raw_dim() != img.raw_dim() {
                return Err(AudioLdmError::invalid_parameter(format!(
                    "masked sampling latent has shape {:?}, expected {:?}",
                    mask.x0.shape(),
                    img.shape()
                )));
            }
            if mask.keep.broadcast(img.raw_dim()).is_none() {
                return Err(AudioLdmError::invalid_parameter(format!(
                    "mask of shape {:?} does not broadcast to latent {:?}",
                    mask.keep.shape(),
                    img.shape()
                )));
            }
        }

        let total = schedule.len();
        info!(
            total_steps = total,
            shape = ?img.shape(),
            masked = mask.is_some(),
            guided = guidance.is_active(),
            "Running DDIM sampling"
        );

        for (i, &step) in schedule.timesteps().iter().rev().enumerate() {
            let index = total - i - 1;

            if let Some(mask) = mask {
                let orig = self.q_sample(mask.x0, step, rng);
                if let Some(keep) = mask.keep.broadcast(img.raw_dim()) {
                    Zip::from(&mut img)
                        .and(&orig)
                        .and(&keep)
                        .for_each(|x, &o, &k| *x = o * k + (1.0 - k) * *x);
                }
            }

            img = self.p_sample_ddim(model, &img, guidance, step, index, rng)?;
            debug!(step = i + 1, total, timestep = step, "Sampling step");
            progress(i + 1, total);
        }

        Ok(img)
    }

    /// Forward-noises `x0` to training timestep `t` with the DDPM coefficients.
    fn q_sample(&self, x0: &Array4<f32>, t: usize, rng: &mut ChaCha8Rng) -> Array4<f32> {
        let alpha_cumprod = self.ddpm.alphas_cumprod()[t];
        let sqrt_ac = alpha_cumprod.sqrt() as f32;
        let sqrt_one_minus_ac = (1.0 - alpha_cumprod).sqrt() as f32;

        let mut noised = randn_like(x0, rng);
        Zip::from(&mut noised).and(x0).for_each(|n, &x| {
            *n = sqrt_ac * x + sqrt_one_minus_ac * *n;
        });
        noised
    }

    /// One DDIM update from DDIM step `index` (training timestep `timestep`).
    fn p_sample_ddim(
        &self,
        model: &mut dyn NoisePredictor,
        x: &Array4<f32>,
        guidance: &Guidance,
        timestep: usize,
        index: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Array4<f32>> {
        let schedule = self.schedule()?;
        let e_t = guidance.predict(model, x, timestep)?;

        let a_t = schedule.alphas()[index];
        let a_prev = schedule.alphas_prev()[index];
        let sigma_t = schedule.sigmas()[index];

        let sqrt_a_t = a_t.sqrt() as f32;
        let sqrt_a_prev = a_prev.sqrt() as f32;
        let sqrt_one_minus_at = schedule.sqrt_one_minus_alphas()[index] as f32;
        let dir_coef = (1.0 - a_prev - sigma_t * sigma_t).max(0.0).sqrt() as f32;
        let sigma_t = sigma_t as f32;

        let mut x_prev = if sigma_t > 0.0 {
            randn_like(x, rng)
        } else {
            Array4::zeros(x.raw_dim())
        };

        Zip::from(&mut x_prev)
            .and(x)
            .and(&e_t)
            .for_each(|out, &x, &e| {
                let pred_x0 = (x - sqrt_one_minus_at * e) / sqrt_a_t;
                *out = sqrt_a_prev * pred_x0 + dir_coef * e + sigma_t * *out;
            });

        Ok(x_prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::sampler::noise::rng_from_seed;
    use crate::types::{MaskRatios, ModelParams};
    use ndarray::{s, Array3};
    use std::cell::Cell;

    /// Predicts zero noise, so each step scales the latent toward `pred_x0 = x / sqrt(a_t)`.
    struct ZeroNoise {
        calls: usize,
    }

    impl NoisePredictor for ZeroNoise {
        fn predict_noise(
            &mut self,
            x: &Array4<f32>,
            _timesteps: &[usize],
            _context: &Array3<f32>,
        ) -> Result<Array4<f32>> {
            self.calls += 1;
            Ok(Array4::zeros(x.raw_dim()))
        }
    }

    fn sampler(steps: usize, eta: f64) -> DdimSampler {
        let mut sampler = DdimSampler::new(NoiseSchedule::from_params(&ModelParams::default()));
        sampler.make_schedule(steps, eta).unwrap();
        sampler
    }

    fn guidance(batch: usize) -> Guidance {
        Guidance::conditional(Array3::zeros((batch, 1, 8)))
    }

    fn max_abs_diff(a: &Array4<f32>, b: &Array4<f32>) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn uninitialized_schedule_rejected() {
        let sampler = DdimSampler::new(NoiseSchedule::from_params(&ModelParams::default()));
        let mut rng = rng_from_seed(0);
        let err = sampler
            .stochastic_encode(&Array4::zeros((1, 2, 4, 4)), 0, &mut rng)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);

        let mut model = ZeroNoise { calls: 0 };
        let err = sampler
            .sample(&mut model, (1, 2, 4, 4), &guidance(1), None, &mut rng, &|_, _| {})
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        assert_eq!(model.calls, 0);
    }

    #[test]
    fn stochastic_encode_at_zero_is_near_identity() {
        let sampler = sampler(10, 1.0);
        let x0 = Array4::from_elem((1, 2, 4, 4), 0.5f32);
        let z = sampler.stochastic_encode(&x0, 0, &mut rng_from_seed(1)).unwrap();
        // alpha at timestep 1 is ~0.997, so noise weight is ~0.055
        assert!(max_abs_diff(&z, &x0) < 0.3);
    }

    #[test]
    fn stochastic_encode_clamps_step() {
        let sampler = sampler(10, 1.0);
        let x0 = Array4::from_elem((1, 2, 4, 4), 0.5f32);
        let a = sampler.stochastic_encode(&x0, 10, &mut rng_from_seed(3)).unwrap();
        let b = sampler.stochastic_encode(&x0, 9, &mut rng_from_seed(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_zero_steps_returns_input() {
        let sampler = sampler(10, 1.0);
        let z = Array4::from_elem((1, 2, 4, 4), 0.25f32);
        let mut model = ZeroNoise { calls: 0 };
        let out = sampler
            .decode(&mut model, &z, &guidance(1), 0, &mut rng_from_seed(0), &|_, _| {})
            .unwrap();
        assert_eq!(out, z);
        assert_eq!(model.calls, 0);
    }

    #[test]
    fn decode_runs_t_start_steps_and_reports_progress() {
        let sampler = sampler(10, 1.0);
        let z = Array4::from_elem((1, 2, 4, 4), 0.25f32);
        let mut model = ZeroNoise { calls: 0 };
        let last = Cell::new((0, 0));
        sampler
            .decode(&mut model, &z, &guidance(1), 4, &mut rng_from_seed(0), &|c, t| last.set((c, t)))
            .unwrap();
        assert_eq!(model.calls, 4);
        assert_eq!(last.get(), (4, 4));
    }

    #[test]
    fn decode_past_schedule_rejected() {
        let sampler = sampler(10, 1.0);
        let mut model = ZeroNoise { calls: 0 };
        let err = sampler
            .decode(
                &mut model,
                &Array4::zeros((1, 2, 4, 4)),
                &guidance(1),
                11,
                &mut rng_from_seed(0),
                &|_, _| {},
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }

    #[test]
    fn deterministic_step_with_zero_eta() {
        let sampler = sampler(10, 0.0);
        let x = Array4::from_elem((1, 1, 2, 2), 1.0f32);
        let mut model = ZeroNoise { calls: 0 };
        let out = sampler
            .decode(&mut model, &x, &guidance(1), 1, &mut rng_from_seed(0), &|_, _| {})
            .unwrap();

        let schedule = sampler.schedule().unwrap();
        let expected = (schedule.alphas_prev()[0].sqrt() / schedule.alphas()[0].sqrt()) as f32;
        assert!(out.iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn sample_is_seed_deterministic() {
        let sampler = sampler(5, 1.0);
        let mut model = ZeroNoise { calls: 0 };
        let a = sampler
            .sample(&mut model, (2, 2, 4, 4), &guidance(2), None, &mut rng_from_seed(9), &|_, _| {})
            .unwrap();
        let b = sampler
            .sample(&mut model, (2, 2, 4, 4), &guidance(2), None, &mut rng_from_seed(9), &|_, _| {})
            .unwrap();
        let c = sampler
            .sample(&mut model, (2, 2, 4, 4), &guidance(2), None, &mut rng_from_seed(10), &|_, _| {})
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(model.calls, 15);
    }

    #[test]
    fn masked_sampling_preserves_kept_region() {
        let sampler = sampler(10, 1.0);
        let (b, c, t, f) = (1, 2, 20, 8);
        let x0 = Array4::from_elem((b, c, t, f), 0.8f32);
        let keep = MaskRatios::new((0.25, 0.5), (1.0, 1.0)).to_keep_mask(b, t, f);

        let mut model = ZeroNoise { calls: 0 };
        let out = sampler
            .sample(
                &mut model,
                (b, c, t, f),
                &guidance(b),
                Some(LatentMask { x0: &x0, keep: &keep }),
                &mut rng_from_seed(4),
                &|_, _| {},
            )
            .unwrap();

        // Kept rows end at the lightly noised x0 of the last step.
        let kept = out.slice(s![.., .., ..5, ..]);
        let kept_err = kept.iter().map(|v| (v - 0.8).abs()).fold(0.0, f32::max);
        assert!(kept_err < 0.3, "kept region drifted by {}", kept_err);

        // Regenerated rows come from pure noise and end far from x0 somewhere.
        let regenerated = out.slice(s![.., .., 5..10, ..]);
        let regen_err = regenerated.iter().map(|v| (v - 0.8).abs()).fold(0.0, f32::max);
        assert!(regen_err > 1.0, "masked region stayed at x0 ({})", regen_err);
    }

    #[test]
    fn masked_sampling_rejects_wrong_latent_shape() {
        let sampler = sampler(10, 1.0);
        let x0 = Array4::zeros((1, 2, 10, 8));
        let keep = Array4::ones((1, 1, 10, 8));
        let mut model = ZeroNoise { calls: 0 };
        let err = sampler
            .sample(
                &mut model,
                (1, 2, 12, 8),
                &guidance(1),
                Some(LatentMask { x0: &x0, keep: &keep }),
                &mut rng_from_seed(0),
                &|_, _| {},
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }
}
