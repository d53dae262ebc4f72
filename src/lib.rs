//! audioldm: text-to-audio latent diffusion inference on ONNX Runtime.
//!
//! Generates audio from text prompts with AudioLDM: CLAP conditioning, a
//! DDIM sampler with classifier-free guidance over a VAE latent space and a
//! HiFi-GAN vocoder. Reference recordings drive audio-to-audio generation,
//! style transfer and spectrogram inpainting.
//!
//! # Modules
//!
//! - [`generation`]: entry points (`text_to_audio`, `style_transfer`,
//!   `super_resolution_and_inpainting`)
//! - [`models`]: model traits, ONNX implementations and [`LatentDiffusion`]
//! - [`sampler`]: noise schedules, DDIM sampling and guidance
//! - [`audio`]: WAV I/O, resampling and log-mel features
//! - [`types`]: batches, conditioning requests, masks, model configuration
//! - [`config`]: runtime configuration (RuntimeConfig, Device)
//! - [`error`]: error types and codes (AudioLdmError, ErrorCode)
//!
//! # Example
//!
//! ```rust,ignore
//! use audioldm::{
//!     config::RuntimeConfig,
//!     generation::{text_to_audio, TextToAudioParams},
//!     models::LatentDiffusion,
//! };
//!
//! let mut model = LatentDiffusion::load(&RuntimeConfig::from_env())?;
//! let waveforms = text_to_audio(
//!     &mut model,
//!     &TextToAudioParams {
//!         text: "a hammer is hitting a wooden surface".to_string(),
//!         ..Default::default()
//!     },
//! )?;
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod models;
pub mod sampler;
pub mod types;

pub use config::{Device, RuntimeConfig};
pub use error::{AudioLdmError, ErrorCode, Result};
pub use models::LatentDiffusion;
pub use types::{Batch, ConditioningRequest, MaskRatios, ModelConfig};
