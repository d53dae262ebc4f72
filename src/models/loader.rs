//! Checkpoint loader for AudioLDM ONNX exports.
//!
//! Handles locating the checkpoint directory, checking its files and
//! loading every model component with the configured execution providers.

use std::path::Path;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::error::{AudioLdmError, Result};
use crate::types::ModelConfig;

use super::clap::ClapEncoder;
use super::latent_diffusion::LatentDiffusion;
use super::session::SessionOptions;
use super::unet::OnnxUnet;
use super::vae::OnnxVae;
use super::vocoder::OnnxVocoder;

/// Required checkpoint files.
pub const REQUIRED_MODEL_FILES: &[&str] = &[
    OnnxUnet::FILE,
    OnnxVae::ENCODER_FILE,
    OnnxVae::DECODER_FILE,
    OnnxVocoder::FILE,
    ClapEncoder::TEXT_FILE,
    ClapEncoder::AUDIO_FILE,
    ClapEncoder::TOKENIZER_FILE,
];

/// Checks if all required model files exist in the directory.
///
/// Returns Ok(()) if all files exist, or an error listing missing files.
pub fn check_models(model_dir: &Path) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_MODEL_FILES
        .iter()
        .copied()
        .filter(|file| !model_dir.join(file).exists())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AudioLdmError::model_not_found(format!(
            "{} (missing: {})",
            model_dir.display(),
            missing.join(", ")
        )))
    }
}

/// Loads the model configuration for a checkpoint.
///
/// An explicit `config_path` wins; otherwise `config.yaml`, `config.yml` or
/// `config.json` beside the models is used, falling back to the defaults.
pub fn load_config(runtime: &RuntimeConfig, model_dir: &Path) -> Result<ModelConfig> {
    match &runtime.config_path {
        Some(path) => ModelConfig::load(path),
        None => ModelConfig::load_or_default(model_dir),
    }
}

/// Loads every model component from the checkpoint directory.
///
/// The directory should contain:
/// - `unet.onnx` - latent diffusion UNet
/// - `vae_encoder.onnx`, `vae_decoder.onnx` - mel-spectrogram VAE
/// - `vocoder.onnx` - HiFi-GAN vocoder
/// - `clap_text.onnx`, `clap_audio.onnx` - CLAP branches
/// - `tokenizer.json` - CLAP (RoBERTa) tokenizer
pub fn load_models(runtime: &RuntimeConfig) -> Result<LatentDiffusion> {
    if let Some(problem) = runtime.validate() {
        return Err(AudioLdmError::config_invalid(problem));
    }

    let model_dir = runtime.effective_model_dir();
    check_models(&model_dir)?;

    let config = load_config(runtime, &model_dir)?;
    let options = SessionOptions::new(runtime.device, runtime.threads);

    info!(
        model_dir = %model_dir.display(),
        device = %runtime.device,
        threads = ?runtime.threads,
        "Loading AudioLDM checkpoint"
    );

    info!("Loading CLAP encoder");
    let clap = ClapEncoder::load(&model_dir, &options)?;

    info!("Loading UNet");
    let unet = OnnxUnet::load(&model_dir, &options)?;

    info!("Loading VAE");
    let vae = OnnxVae::load(&model_dir, &options)?;

    info!("Loading vocoder");
    let vocoder = OnnxVocoder::load(&model_dir, &options)?;

    let model = LatentDiffusion::new(
        config,
        Box::new(unet),
        Box::new(clap),
        Box::new(vae),
        Box::new(vocoder),
    )?;
    info!("All models loaded successfully");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::tempdir;

    #[test]
    fn check_models_lists_missing_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("unet.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), b"{}").unwrap();

        let err = check_models(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotFound);
        assert!(err.message.contains("vae_encoder.onnx"));
        assert!(err.message.contains("clap_audio.onnx"));
        assert!(!err.message.contains("unet.onnx,"));
    }

    #[test]
    fn check_models_accepts_complete_dir() {
        let dir = tempdir().unwrap();
        for file in REQUIRED_MODEL_FILES {
            std::fs::write(dir.path().join(file), b"").unwrap();
        }
        assert!(check_models(dir.path()).is_ok());
    }

    #[test]
    fn load_models_missing_dir() {
        let dir = tempdir().unwrap();
        let runtime = RuntimeConfig {
            model_dir: Some(dir.path().join("absent")),
            ..RuntimeConfig::new()
        };
        let err = load_models(&runtime).err().unwrap();
        assert_eq!(err.code, ErrorCode::ModelNotFound);
    }

    #[test]
    fn explicit_config_path_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "model:\n  params:\n    scale_factor: 0.5\n").unwrap();

        let runtime = RuntimeConfig {
            config_path: Some(path),
            ..RuntimeConfig::new()
        };
        let config = load_config(&runtime, dir.path()).unwrap();
        assert_eq!(config.model.params.scale_factor, 0.5);

        let defaults = load_config(&RuntimeConfig::new(), dir.path()).unwrap();
        assert_eq!(defaults.model.params.scale_factor, 1.0);
    }
}
