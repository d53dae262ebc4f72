//! Runtime configuration module.
//!
//! Contains the process-level configuration: execution device selection,
//! checkpoint location and thread count. The model architecture and
//! preprocessing settings live in [`crate::types::ModelConfig`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default checkpoint name, matching the original AudioLDM release.
pub const DEFAULT_MODEL_NAME: &str = "audioldm-s-full";

/// Environment variable overriding the checkpoint cache directory.
pub const CACHE_DIR_ENV: &str = "AUDIOLDM_CACHE_DIR";

/// Execution device for ONNX inference.
///
/// Selected once per model load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Use the accelerator if available, else fall back to the CPU.
    #[default]
    Auto,

    /// Force CPU execution.
    Cpu,

    /// Use CUDA for NVIDIA GPU acceleration.
    Cuda,
}

impl Device {
    /// Returns the string representation of the device.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }

    /// Parses a device from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Device::Auto),
            "cpu" => Some(Device::Cpu),
            "cuda" | "cuda:0" | "gpu" => Some(Device::Cuda),
            _ => None,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime configuration for model loading.
///
/// Typically built from command-line arguments layered over
/// [`RuntimeConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding the exported checkpoint.
    /// If None, uses `<cache dir>/<model_name>`.
    pub model_dir: Option<PathBuf>,

    /// Root cache directory for checkpoints.
    /// If None, uses the platform cache directory joined with `audioldm`.
    pub cache_dir: Option<PathBuf>,

    /// Checkpoint name below the cache directory.
    pub model_name: String,

    /// Optional YAML/JSON configuration document.
    /// If None, `config.yaml`/`config.json` beside the models or the built-in default is used.
    pub config_path: Option<PathBuf>,

    /// Execution device for inference.
    pub device: Device,

    /// Number of threads for intra-op parallelism in ONNX Runtime.
    pub threads: Option<u32>,
}

impl RuntimeConfig {
    /// Creates a RuntimeConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a RuntimeConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `AUDIOLDM_CACHE_DIR` - Root checkpoint cache directory
    /// - `AUDIOLDM_MODEL_NAME` - Checkpoint name below the cache directory
    /// - `AUDIOLDM_CONFIG` - Configuration document path
    /// - `AUDIOLDM_DEVICE` - Device selection (auto, cpu, cuda)
    /// - `AUDIOLDM_THREADS` - Number of threads for CPU execution
    ///
    /// Falls back to defaults for unset or unparsable variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(CACHE_DIR_ENV) {
            config.cache_dir = Some(PathBuf::from(path));
        }

        if let Ok(name) = std::env::var("AUDIOLDM_MODEL_NAME") {
            if !name.trim().is_empty() {
                config.model_name = name;
            }
        }

        if let Ok(path) = std::env::var("AUDIOLDM_CONFIG") {
            config.config_path = Some(PathBuf::from(path));
        }

        if let Ok(device_str) = std::env::var("AUDIOLDM_DEVICE") {
            if let Some(device) = Device::parse(&device_str) {
                config.device = device;
            }
        }

        if let Ok(threads_str) = std::env::var("AUDIOLDM_THREADS") {
            if let Ok(threads) = threads_str.parse::<u32>() {
                if threads > 0 {
                    config.threads = Some(threads);
                }
            }
        }

        config
    }

    /// Returns the effective cache directory.
    pub fn effective_cache_dir(&self) -> PathBuf {
        if let Some(ref path) = self.cache_dir {
            path.clone()
        } else {
            default_cache_dir()
        }
    }

    /// Returns the effective checkpoint directory.
    pub fn effective_model_dir(&self) -> PathBuf {
        if let Some(ref path) = self.model_dir {
            path.clone()
        } else {
            self.effective_cache_dir().join(&self.model_name)
        }
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if let Some(threads) = self.threads {
            if threads == 0 {
                return Some("threads must be > 0".to_string());
            }
            if threads > 256 {
                return Some(format!("threads too high: {} (max 256)", threads));
            }
        }

        if self.model_dir.is_none() && self.model_name.trim().is_empty() {
            return Some("model_name must not be empty".to_string());
        }

        None
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            cache_dir: None,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            config_path: None,
            device: Device::Auto,
            threads: None,
        }
    }
}

/// Returns the platform-specific default checkpoint cache directory.
///
/// - Linux: ~/.cache/audioldm
/// - macOS: ~/Library/Caches/audioldm
/// - Windows: C:\Users\<user>\AppData\Local\audioldm
fn default_cache_dir() -> PathBuf {
    if let Some(base_dirs) = directories::BaseDirs::new() {
        base_dirs.cache_dir().join("audioldm")
    } else {
        PathBuf::from("./.cache/audioldm")
    }
}
