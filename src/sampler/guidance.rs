//! Classifier-free guidance.

use ndarray::{concatenate, Array3, Array4, ArrayView4, Axis};

use crate::error::{AudioLdmError, Result};
use crate::models::NoisePredictor;

/// Conditioning context for one sampling run, with optional guidance.
///
/// Guidance is active only when an unconditional context is present and the
/// scale differs from 1. An active guidance evaluates the predictor once on
/// the doubled batch `[unconditional; conditional]`.
#[derive(Debug, Clone)]
pub struct Guidance {
    cond: Array3<f32>,
    unconditional: Option<Array3<f32>>,
    scale: f32,
}

impl Guidance {
    pub fn new(cond: Array3<f32>, unconditional: Option<Array3<f32>>, scale: f32) -> Self {
        Self {
            cond,
            unconditional,
            scale,
        }
    }

    /// Conditional-only context.
    pub fn conditional(cond: Array3<f32>) -> Self {
        Self::new(cond, None, 1.0)
    }

    pub fn is_active(&self) -> bool {
        self.unconditional.is_some() && self.scale != 1.0
    }

    pub fn cond(&self) -> &Array3<f32> {
        &self.cond
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Returns the (guided) noise estimate for `x` at one training timestep.
    pub fn predict(
        &self,
        model: &mut dyn NoisePredictor,
        x: &Array4<f32>,
        timestep: usize,
    ) -> Result<Array4<f32>> {
        let batch = x.shape()[0];
        if self.cond.shape()[0] != batch {
            return Err(AudioLdmError::batch_size_mismatch(
                "conditioning",
                self.cond.shape(),
                batch,
            ));
        }

        match &self.unconditional {
            Some(uncond) if self.scale != 1.0 => {
                if uncond.shape()[0] != batch {
                    return Err(AudioLdmError::batch_size_mismatch(
                        "unconditional conditioning",
                        uncond.shape(),
                        batch,
                    ));
                }

                let x_in = concatenate(Axis(0), &[x.view(), x.view()]).map_err(|e| {
                    AudioLdmError::model_inference_failed(format!("Failed to double latent batch: {}", e))
                })?;
                let c_in = concatenate(Axis(0), &[uncond.view(), self.cond.view()]).map_err(|e| {
                    AudioLdmError::model_inference_failed(format!(
                        "Conditional and unconditional contexts differ in shape: {}",
                        e
                    ))
                })?;
                let t_in = vec![timestep; 2 * batch];

                let out = model.predict_noise(&x_in, &t_in, &c_in)?;
                check_output_shape(&out, x_in.shape())?;

                let (e_uncond, e_cond) = out.view().split_at(Axis(0), batch);
                Ok(apply_cfg(e_uncond, e_cond, self.scale))
            }
            _ => {
                let t_in = vec![timestep; batch];
                let out = model.predict_noise(x, &t_in, &self.cond)?;
                check_output_shape(&out, x.shape())?;
                Ok(out)
            }
        }
    }
}

/// `uncond + scale * (cond - uncond)`
pub fn apply_cfg(uncond: ArrayView4<f32>, cond: ArrayView4<f32>, scale: f32) -> Array4<f32> {
    let mut guided = uncond.to_owned();
    guided.zip_mut_with(&cond, |u, &c| *u += scale * (c - *u));
    guided
}

fn check_output_shape(out: &Array4<f32>, expected: &[usize]) -> Result<()> {
    if out.shape() != expected {
        return Err(AudioLdmError::model_inference_failed(format!(
            "Noise prediction has shape {:?}, expected {:?}",
            out.shape(),
            expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    /// Returns the context's first value broadcast over the latent, recording batch sizes.
    struct ContextEcho {
        batches: Vec<usize>,
    }

    impl NoisePredictor for ContextEcho {
        fn predict_noise(
            &mut self,
            x: &Array4<f32>,
            timesteps: &[usize],
            context: &Array3<f32>,
        ) -> Result<Array4<f32>> {
            assert_eq!(timesteps.len(), x.shape()[0]);
            self.batches.push(x.shape()[0]);
            let mut out = Array4::zeros(x.raw_dim());
            for (b, mut item) in out.outer_iter_mut().enumerate() {
                item.fill(context[[b, 0, 0]]);
            }
            Ok(out)
        }
    }

    #[test]
    fn cfg_formula() {
        let uncond = Array::from_elem((1, 1, 2, 2), 1.0f32);
        let cond = Array::from_elem((1, 1, 2, 2), 3.0f32);
        let guided = apply_cfg(uncond.view(), cond.view(), 2.5);
        // 1 + 2.5 * (3 - 1)
        assert!(guided.iter().all(|&v| (v - 6.0).abs() < 1e-6));
    }

    #[test]
    fn scale_one_is_conditional_only() {
        let cond = Array3::from_elem((2, 1, 4), 3.0f32);
        let uncond = Array3::from_elem((2, 1, 4), 1.0f32);
        let guidance = Guidance::new(cond, Some(uncond), 1.0);
        assert!(!guidance.is_active());

        let mut model = ContextEcho { batches: vec![] };
        let x = Array4::zeros((2, 1, 2, 2));
        let e = guidance.predict(&mut model, &x, 10).unwrap();
        assert_eq!(model.batches, vec![2]);
        assert!(e.iter().all(|&v| v == 3.0));
    }

    #[test]
    fn active_guidance_doubles_batch_once() {
        let cond = Array3::from_elem((2, 1, 4), 3.0f32);
        let uncond = Array3::from_elem((2, 1, 4), 1.0f32);
        let guidance = Guidance::new(cond, Some(uncond), 2.0);
        assert!(guidance.is_active());

        let mut model = ContextEcho { batches: vec![] };
        let x = Array4::zeros((2, 1, 2, 2));
        let e = guidance.predict(&mut model, &x, 10).unwrap();
        assert_eq!(model.batches, vec![4]);
        assert_eq!(e.shape(), &[2, 1, 2, 2]);
        // 1 + 2 * (3 - 1)
        assert!(e.iter().all(|&v| (v - 5.0).abs() < 1e-6));
    }

    #[test]
    fn conditioning_batch_mismatch() {
        let guidance = Guidance::conditional(Array3::zeros((3, 1, 4)));
        let mut model = ContextEcho { batches: vec![] };
        let err = guidance
            .predict(&mut model, &Array4::zeros((2, 1, 2, 2)), 1)
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::BatchSizeMismatch);
    }
}
