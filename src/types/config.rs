//! ModelConfig type for the AudioLDM architecture and preprocessing.
//!
//! The configuration document has two recognized sections, `model.params`
//! and `preprocessing` (`audio`, `stft`, `mel`). It can be written as YAML
//! or JSON; any omitted field takes the built-in AudioLDM default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AudioLdmError, Result};

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Latent diffusion model section.
    pub model: ModelSection,
    /// Audio feature extraction section.
    pub preprocessing: PreprocessingConfig,
}

/// The `model` section; only `params` is read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub params: ModelParams,
}

/// Latent diffusion hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// First beta of the linear DDPM schedule.
    pub linear_start: f64,
    /// Last beta of the linear DDPM schedule.
    pub linear_end: f64,
    /// Number of DDPM training timesteps.
    pub timesteps: usize,
    /// Latent channel count.
    pub channels: usize,
    /// Latent time size for a 10 second clip (overridden per request from duration).
    pub latent_t_size: usize,
    /// Latent frequency size.
    pub latent_f_size: usize,
    /// Multiplier applied to first-stage encodings before diffusion.
    pub scale_factor: f32,
    /// Batch slot holding the first-stage input.
    pub first_stage_key: String,
    /// Batch slot holding the conditioning input by default.
    pub cond_stage_key: String,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            linear_start: 0.0015,
            linear_end: 0.0195,
            timesteps: 1000,
            channels: 8,
            latent_t_size: 256,
            latent_f_size: 16,
            scale_factor: 1.0,
            first_stage_key: "fbank".to_string(),
            cond_stage_key: "text".to_string(),
        }
    }
}

/// The `preprocessing` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub audio: AudioConfig,
    pub stft: StftConfig,
    pub mel: MelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Model sample rate in Hz.
    pub sampling_rate: u32,
    pub max_wav_value: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 16000,
            max_wav_value: 32768.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    pub filter_length: usize,
    pub hop_length: usize,
    pub win_length: usize,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            filter_length: 1024,
            hop_length: 160,
            win_length: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelConfig {
    pub n_mel_channels: usize,
    pub mel_fmin: f64,
    pub mel_fmax: f64,
    /// Frames in a 10 second spectrogram.
    pub target_length: usize,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            n_mel_channels: 64,
            mel_fmin: 0.0,
            mel_fmax: 8000.0,
            target_length: 1024,
        }
    }
}

impl ModelConfig {
    /// Loads a configuration document, choosing the format from the extension.
    ///
    /// `.json` is parsed as JSON; everything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AudioLdmError::config_invalid(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AudioLdmError::config_invalid(format!("failed to read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| AudioLdmError::config_invalid(format!("failed to parse YAML: {}", e)))
    }

    /// Parses a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| AudioLdmError::config_invalid(format!("failed to parse JSON: {}", e)))
    }

    /// Loads `config.yaml` or `config.json` from the checkpoint directory,
    /// or returns the built-in default when neither exists.
    pub fn load_or_default(model_dir: &Path) -> Result<Self> {
        for name in ["config.yaml", "config.yml", "config.json"] {
            let path = model_dir.join(name);
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Checks every field the pipeline depends on.
    pub fn validate(&self) -> Result<()> {
        let params = &self.model.params;

        if params.timesteps < 2 {
            return Err(AudioLdmError::config_invalid(format!(
                "model.params.timesteps must be >= 2, got {}",
                params.timesteps
            )));
        }
        if !(params.linear_start > 0.0 && params.linear_start < params.linear_end && params.linear_end < 1.0) {
            return Err(AudioLdmError::config_invalid(format!(
                "expected 0 < linear_start < linear_end < 1, got {} and {}",
                params.linear_start, params.linear_end
            )));
        }
        if params.channels == 0 || params.latent_t_size == 0 || params.latent_f_size == 0 {
            return Err(AudioLdmError::config_invalid(
                "model.params channels, latent_t_size and latent_f_size must be > 0",
            ));
        }
        if !(params.scale_factor.is_finite() && params.scale_factor > 0.0) {
            return Err(AudioLdmError::config_invalid(format!(
                "model.params.scale_factor must be positive, got {}",
                params.scale_factor
            )));
        }

        let pre = &self.preprocessing;
        if pre.audio.sampling_rate == 0 {
            return Err(AudioLdmError::config_invalid(
                "preprocessing.audio.sampling_rate must be > 0",
            ));
        }
        if pre.stft.hop_length == 0 || pre.stft.filter_length == 0 {
            return Err(AudioLdmError::config_invalid(
                "preprocessing.stft hop_length and filter_length must be > 0",
            ));
        }
        if pre.stft.win_length == 0 || pre.stft.win_length > pre.stft.filter_length {
            return Err(AudioLdmError::config_invalid(format!(
                "preprocessing.stft.win_length must be in 1..={}, got {}",
                pre.stft.filter_length, pre.stft.win_length
            )));
        }
        if pre.mel.n_mel_channels == 0 {
            return Err(AudioLdmError::config_invalid(
                "preprocessing.mel.n_mel_channels must be > 0",
            ));
        }
        let nyquist = pre.audio.sampling_rate as f64 / 2.0;
        if !(pre.mel.mel_fmin >= 0.0 && pre.mel.mel_fmin < pre.mel.mel_fmax && pre.mel.mel_fmax <= nyquist) {
            return Err(AudioLdmError::config_invalid(format!(
                "expected 0 <= mel_fmin < mel_fmax <= {}, got {} and {}",
                nyquist, pre.mel.mel_fmin, pre.mel.mel_fmax
            )));
        }

        Ok(())
    }

    /// Spectrogram frames per second of audio (102.4 with the defaults).
    pub fn frames_per_second(&self) -> f64 {
        self.preprocessing.audio.sampling_rate as f64 / self.preprocessing.stft.hop_length as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_audioldm() {
        let config = ModelConfig::default();
        assert_eq!(config.model.params.timesteps, 1000);
        assert_eq!(config.model.params.channels, 8);
        assert_eq!(config.model.params.latent_f_size, 16);
        assert_eq!(config.preprocessing.stft.hop_length, 160);
        assert_eq!(config.preprocessing.mel.n_mel_channels, 64);
        assert!((config.frames_per_second() - 102.4).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
model:
  params:
    channels: 4
    unet_config:
      target: ignored
preprocessing:
  mel:
    n_mel_channels: 128
"#;
        let config = ModelConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.model.params.channels, 4);
        assert_eq!(config.model.params.timesteps, 1000);
        assert_eq!(config.preprocessing.mel.n_mel_channels, 128);
        assert_eq!(config.preprocessing.stft.filter_length, 1024);
    }

    #[test]
    fn json_document_parses() {
        let json = r#"{"model": {"params": {"linear_end": 0.012}}}"#;
        let config = ModelConfig::from_json_str(json).unwrap();
        assert!((config.model.params.linear_end - 0.012).abs() < 1e-12);
    }

    #[test]
    fn invalid_schedule_rejected() {
        let mut config = ModelConfig::default();
        config.model.params.linear_start = 0.05;
        config.model.params.linear_end = 0.01;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn mel_fmax_above_nyquist_rejected() {
        let mut config = ModelConfig::default();
        config.preprocessing.mel.mel_fmax = 12000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let err = ModelConfig::from_yaml_str("model: [unclosed").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = ModelConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn load_or_default_reads_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ModelConfig::load_or_default(dir.path()).unwrap(), ModelConfig::default());

        std::fs::write(
            dir.path().join("config.yaml"),
            "model:\n  params:\n    scale_factor: 0.5\n",
        )
        .unwrap();
        let config = ModelConfig::load_or_default(dir.path()).unwrap();
        assert!((config.model.params.scale_factor - 0.5).abs() < 1e-6);
    }
}
