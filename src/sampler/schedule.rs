//! Noise schedules.
//!
//! [`NoiseSchedule`] is the DDPM table the model was trained with: a linear
//! schedule in sqrt-beta space over `timesteps` steps. [`DdimSchedule`] is the
//! uniform sub-sequence of it that DDIM walks at inference time.

use crate::error::{AudioLdmError, Result};
use crate::types::ModelParams;

/// DDPM training schedule.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    betas: Vec<f64>,
    alphas_cumprod: Vec<f64>,
}

impl NoiseSchedule {
    /// Builds `betas = linspace(sqrt(start), sqrt(end), timesteps)^2` and
    /// their cumulative alpha products.
    pub fn linear(linear_start: f64, linear_end: f64, timesteps: usize) -> Self {
        let start = linear_start.sqrt();
        let end = linear_end.sqrt();
        let denom = timesteps.saturating_sub(1).max(1) as f64;

        let betas: Vec<f64> = (0..timesteps)
            .map(|i| {
                let beta_sqrt = start + (end - start) * (i as f64 / denom);
                beta_sqrt * beta_sqrt
            })
            .collect();

        let mut acc = 1.0;
        let alphas_cumprod = betas
            .iter()
            .map(|beta| {
                acc *= 1.0 - beta;
                acc
            })
            .collect();

        Self {
            betas,
            alphas_cumprod,
        }
    }

    /// Builds the schedule described by the model parameters.
    pub fn from_params(params: &ModelParams) -> Self {
        Self::linear(params.linear_start, params.linear_end, params.timesteps)
    }

    /// Number of training timesteps.
    pub fn num_timesteps(&self) -> usize {
        self.betas.len()
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn alphas_cumprod(&self) -> &[f64] {
        &self.alphas_cumprod
    }
}

/// DDIM sampling coefficients, indexed by DDIM step.
#[derive(Debug, Clone)]
pub struct DdimSchedule {
    timesteps: Vec<usize>,
    alphas: Vec<f64>,
    alphas_prev: Vec<f64>,
    sigmas: Vec<f64>,
    sqrt_one_minus_alphas: Vec<f64>,
    eta: f64,
}

impl DdimSchedule {
    /// Builds the uniform DDIM sub-schedule.
    ///
    /// The stride is `T / steps` and the timesteps are `0, stride, 2 * stride,
    /// ...` shifted by one, so the schedule may hold a few more entries than
    /// `steps` when `T` is not a multiple of it. Step counts whose shifted
    /// timesteps would fall outside the training table are rejected.
    pub fn new(ddpm: &NoiseSchedule, steps: usize, eta: f64) -> Result<Self> {
        let total = ddpm.num_timesteps();

        if steps == 0 {
            return Err(AudioLdmError::invalid_parameter(
                "ddim_steps must be >= 1",
            ));
        }
        if !(eta.is_finite() && eta >= 0.0) {
            return Err(AudioLdmError::invalid_parameter(format!(
                "eta must be a non-negative number, got {}",
                eta
            )));
        }

        let stride = total / steps;
        if stride == 0 {
            return Err(AudioLdmError::invalid_parameter(format!(
                "ddim_steps {} exceeds the {} diffusion timesteps",
                steps, total
            )));
        }

        let timesteps: Vec<usize> = (0..total).step_by(stride).map(|t| t + 1).collect();
        if timesteps.last().is_some_and(|&t| t >= total) {
            return Err(AudioLdmError::invalid_parameter(format!(
                "ddim_steps {} does not divide {} diffusion timesteps into a valid schedule",
                steps, total
            )));
        }

        let ac = ddpm.alphas_cumprod();
        let alphas: Vec<f64> = timesteps.iter().map(|&t| ac[t]).collect();
        let alphas_prev: Vec<f64> = std::iter::once(ac[0])
            .chain(alphas[..alphas.len() - 1].iter().copied())
            .collect();

        let sigmas = alphas
            .iter()
            .zip(&alphas_prev)
            .map(|(&a, &a_prev)| {
                eta * ((1.0 - a_prev) / (1.0 - a) * (1.0 - a / a_prev)).max(0.0).sqrt()
            })
            .collect();
        let sqrt_one_minus_alphas = alphas.iter().map(|&a| (1.0 - a).sqrt()).collect();

        Ok(Self {
            timesteps,
            alphas,
            alphas_prev,
            sigmas,
            sqrt_one_minus_alphas,
            eta,
        })
    }

    /// Number of DDIM steps in the schedule.
    pub fn len(&self) -> usize {
        self.timesteps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }

    /// Training timesteps visited, ascending.
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn alphas_prev(&self) -> &[f64] {
        &self.alphas_prev
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    pub fn sqrt_one_minus_alphas(&self) -> &[f64] {
        &self.sqrt_one_minus_alphas
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn ddpm() -> NoiseSchedule {
        NoiseSchedule::from_params(&ModelParams::default())
    }

    #[test]
    fn ddpm_betas_endpoints() {
        let schedule = ddpm();
        assert_eq!(schedule.num_timesteps(), 1000);
        assert!((schedule.betas()[0] - 0.0015).abs() < 1e-12);
        assert!((schedule.betas()[999] - 0.0195).abs() < 1e-12);
    }

    #[test]
    fn alphas_cumprod_decreasing() {
        let schedule = ddpm();
        let ac = schedule.alphas_cumprod();
        assert!((ac[0] - (1.0 - 0.0015)).abs() < 1e-12);
        assert!(ac.windows(2).all(|w| w[1] < w[0]));
        assert!(ac[999] > 0.0);
    }

    #[test]
    fn ddim_timesteps_uniform() {
        let schedule = DdimSchedule::new(&ddpm(), 200, 1.0).unwrap();
        assert_eq!(schedule.len(), 200);
        assert_eq!(schedule.timesteps()[0], 1);
        assert_eq!(schedule.timesteps()[1], 6);
        assert_eq!(*schedule.timesteps().last().unwrap(), 996);
    }

    #[test]
    fn uneven_stride_yields_extra_steps() {
        let schedule = DdimSchedule::new(&ddpm(), 7, 0.0).unwrap();
        // stride 142 covers 0..=994
        assert_eq!(schedule.len(), 8);
        assert_eq!(*schedule.timesteps().last().unwrap(), 995);
    }

    #[test]
    fn alphas_prev_shifted() {
        let ddpm = ddpm();
        let schedule = DdimSchedule::new(&ddpm, 10, 1.0).unwrap();
        assert_eq!(schedule.alphas_prev()[0], ddpm.alphas_cumprod()[0]);
        for i in 1..schedule.len() {
            assert_eq!(schedule.alphas_prev()[i], schedule.alphas()[i - 1]);
        }
    }

    #[test]
    fn zero_eta_zero_sigmas() {
        let schedule = DdimSchedule::new(&ddpm(), 50, 0.0).unwrap();
        assert!(schedule.sigmas().iter().all(|&s| s == 0.0));

        let stochastic = DdimSchedule::new(&ddpm(), 50, 1.0).unwrap();
        assert!(stochastic.sigmas().iter().all(|&s| s > 0.0));
    }

    #[test]
    fn direction_coefficient_non_negative() {
        let schedule = DdimSchedule::new(&ddpm(), 200, 1.0).unwrap();
        for i in 0..schedule.len() {
            let sigma = schedule.sigmas()[i];
            assert!(1.0 - schedule.alphas_prev()[i] - sigma * sigma >= -1e-12);
        }
    }

    #[test]
    fn too_many_steps_rejected() {
        let ddpm = ddpm();
        for steps in [0, 333, 1000, 2000] {
            let err = DdimSchedule::new(&ddpm, steps, 1.0).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidParameter, "steps {}", steps);
        }
        assert!(DdimSchedule::new(&ddpm, 500, 1.0).is_ok());
    }

    #[test]
    fn negative_eta_rejected() {
        assert!(DdimSchedule::new(&ddpm(), 10, -0.5).is_err());
    }
}
