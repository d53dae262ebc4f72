//! Audio generation module.
//!
//! Provides the text-to-audio, style transfer and inpainting entry points.

pub mod pipeline;

pub use pipeline::{
    duration_to_frames, duration_to_latent_t_size, style_transfer, style_transfer_with_progress,
    super_resolution_and_inpainting, super_resolution_and_inpainting_with_progress,
    text_to_audio, text_to_audio_with_progress, InpaintingParams, StyleTransferParams,
    TextToAudioParams,
};
