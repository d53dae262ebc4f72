//! Core types for audioldm.
//!
//! - [`Batch`]: model input batch with placeholders
//! - [`ConditioningRequest`]: per-call conditioning mode
//! - [`MaskRatios`]: inpainting time/frequency ranges
//! - [`ModelConfig`]: typed model and preprocessing configuration

mod batch;
mod conditioning;
mod config;
mod mask;

pub use batch::{
    Batch, PLACEHOLDER_FRAMES, PLACEHOLDER_MEL_BINS, PLACEHOLDER_SAMPLES, PLACEHOLDER_STFT_BINS,
};
pub use conditioning::{ConditionKey, ConditioningRequest, EmbedMode};
pub use config::{
    AudioConfig, MelConfig, ModelConfig, ModelParams, ModelSection, PreprocessingConfig,
    StftConfig,
};
pub use mask::MaskRatios;
