//! Time/frequency mask ratios for inpainting and super-resolution.

use std::ops::Range;

use ndarray::{s, Array4};
use serde::{Deserialize, Serialize};

use crate::error::{AudioLdmError, Result};

/// Fractional `(start, end)` ranges over the latent time and frequency axes.
///
/// Positions inside either range are regenerated; everything else is kept.
/// A range whose start is not below its end selects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskRatios {
    pub time: (f64, f64),
    pub freq: (f64, f64),
}

impl MaskRatios {
    pub fn new(time: (f64, f64), freq: (f64, f64)) -> Self {
        Self { time, freq }
    }

    /// Checks every ratio lies in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for (name, (start, end)) in [("time", self.time), ("freq", self.freq)] {
            for ratio in [start, end] {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(AudioLdmError::invalid_parameter(format!(
                        "{} mask ratio {} outside [0, 1]",
                        name, ratio
                    )));
                }
            }
        }
        Ok(())
    }

    /// Regenerated index range over a time axis of `len` frames.
    pub fn time_range(&self, len: usize) -> Range<usize> {
        ratio_range(self.time, len)
    }

    /// Regenerated index range over a frequency axis of `len` bins.
    pub fn freq_range(&self, len: usize) -> Range<usize> {
        ratio_range(self.freq, len)
    }

    /// Builds the `(batch, 1, time, freq)` keep-mask: 0 inside either range, 1 elsewhere.
    pub fn to_keep_mask(&self, batch: usize, time: usize, freq: usize) -> Array4<f32> {
        let mut keep = Array4::<f32>::ones((batch, 1, time, freq));
        keep.slice_mut(s![.., .., self.time_range(time), ..]).fill(0.0);
        keep.slice_mut(s![.., .., .., self.freq_range(freq)]).fill(0.0);
        keep
    }
}

impl Default for MaskRatios {
    fn default() -> Self {
        Self {
            time: (0.10, 0.15),
            freq: (1.0, 1.0),
        }
    }
}

fn ratio_range((start, end): (f64, f64), len: usize) -> Range<usize> {
    let index = |ratio: f64| ((len as f64 * ratio).floor().max(0.0) as usize).min(len);
    let (start, end) = (index(start), index(end));
    start..end.max(start)
}
