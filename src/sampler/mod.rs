//! DDIM sampling over the latent diffusion model.

pub mod ddim;
pub mod guidance;
pub mod noise;
pub mod schedule;

pub use ddim::{DdimSampler, LatentMask};
pub use guidance::{apply_cfg, Guidance};
pub use noise::{randn, randn_like, rng_from_seed};
pub use schedule::{DdimSchedule, NoiseSchedule};
