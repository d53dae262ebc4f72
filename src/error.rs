//! Error types for audioldm.
//!
//! Every failure surfaced by the library carries an [`ErrorCode`] so callers
//! (and the CLI) can react to specific conditions.

use std::fmt;

/// Error codes identifying the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Checkpoint files not found at the expected path.
    /// Trigger: missing ONNX files or tokenizer in the checkpoint directory.
    ModelNotFound,

    /// Failed to load an ONNX model into memory.
    /// Trigger: corrupt file, wrong export, unexpected input names.
    ModelLoadFailed,

    /// Configuration document could not be read, parsed or validated.
    ConfigInvalid,

    /// Reference audio could not be read or is unusable.
    AudioReadFailed,

    /// Generated audio could not be written.
    AudioWriteFailed,

    /// Model inference failed during generation.
    /// Trigger: runtime error or an output with an unexpected shape.
    ModelInferenceFailed,

    /// Broadcast input does not match the requested batch size.
    BatchSizeMismatch,

    /// A generation parameter is outside its valid range.
    InvalidParameter,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ModelNotFound => "MODEL_NOT_FOUND",
            ErrorCode::ModelLoadFailed => "MODEL_LOAD_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::AudioReadFailed => "AUDIO_READ_FAILED",
            ErrorCode::AudioWriteFailed => "AUDIO_WRITE_FAILED",
            ErrorCode::ModelInferenceFailed => "MODEL_INFERENCE_FAILED",
            ErrorCode::BatchSizeMismatch => "BATCH_SIZE_MISMATCH",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::ModelNotFound => "Checkpoint files not found at expected path",
            ErrorCode::ModelLoadFailed => "Failed to load ONNX model into memory",
            ErrorCode::ConfigInvalid => "Configuration document is missing or invalid",
            ErrorCode::AudioReadFailed => "Failed to read reference audio",
            ErrorCode::AudioWriteFailed => "Failed to write generated audio",
            ErrorCode::ModelInferenceFailed => "Model inference failed during generation",
            ErrorCode::BatchSizeMismatch => "Input cannot be broadcast to the batch size",
            ErrorCode::InvalidParameter => "Generation parameter out of range",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::ModelNotFound => {
                "Export the AudioLDM checkpoint to ONNX into the cache directory \
                 (~/.cache/audioldm/<model>) or point AUDIOLDM_CACHE_DIR / --model-dir at it"
            }
            ErrorCode::ModelLoadFailed => {
                "Verify the ONNX exports match the expected input names, check available \
                 memory, or re-export the checkpoint"
            }
            ErrorCode::ConfigInvalid => {
                "Check the YAML/JSON configuration against the documented sections \
                 (model.params, preprocessing.stft/mel/audio) or omit it to use defaults"
            }
            ErrorCode::AudioReadFailed => {
                "Provide a readable WAV file longer than 100 samples"
            }
            ErrorCode::AudioWriteFailed => {
                "Check that the output directory exists and is writable"
            }
            ErrorCode::ModelInferenceFailed => {
                "Try fewer DDIM steps or a smaller batch, or force CPU with AUDIOLDM_DEVICE=cpu"
            }
            ErrorCode::BatchSizeMismatch => {
                "Pass a single reference (leading dimension 1) or one per batch element"
            }
            ErrorCode::InvalidParameter => {
                "Check ddim_steps, duration, transfer_strength and mask ranges"
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for audioldm operations.
#[derive(Debug)]
pub struct AudioLdmError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AudioLdmError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new error with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a MODEL_NOT_FOUND error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ModelNotFound,
            format!("Model files not found at: {}", path.into()),
        )
    }

    /// Creates a MODEL_LOAD_FAILED error.
    pub fn model_load_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ModelLoadFailed,
            format!("Failed to load model: {}", reason.into()),
        )
    }

    /// Creates a CONFIG_INVALID error.
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalid,
            format!("Invalid configuration: {}", reason.into()),
        )
    }

    /// Creates an AUDIO_READ_FAILED error.
    pub fn audio_read_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::AudioReadFailed,
            format!("Failed to read audio: {}", reason.into()),
        )
    }

    /// Creates an AUDIO_WRITE_FAILED error.
    pub fn audio_write_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::AudioWriteFailed,
            format!("Failed to write audio: {}", reason.into()),
        )
    }

    /// Creates a MODEL_INFERENCE_FAILED error.
    pub fn model_inference_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ModelInferenceFailed,
            format!("Inference failed: {}", reason.into()),
        )
    }

    /// Creates a BATCH_SIZE_MISMATCH error.
    pub fn batch_size_mismatch(what: &str, shape: &[usize], batchsize: usize) -> Self {
        Self::new(
            ErrorCode::BatchSizeMismatch,
            format!(
                "Cannot broadcast {} of shape {:?} to batch size {}",
                what, shape, batchsize
            ),
        )
    }

    /// Creates an INVALID_PARAMETER error.
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, reason)
    }
}

impl fmt::Display for AudioLdmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for AudioLdmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using AudioLdmError.
pub type Result<T> = std::result::Result<T, AudioLdmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_as_str() {
        assert_eq!(ErrorCode::ModelNotFound.as_str(), "MODEL_NOT_FOUND");
        assert_eq!(ErrorCode::ModelLoadFailed.as_str(), "MODEL_LOAD_FAILED");
        assert_eq!(ErrorCode::ConfigInvalid.as_str(), "CONFIG_INVALID");
        assert_eq!(ErrorCode::AudioReadFailed.as_str(), "AUDIO_READ_FAILED");
        assert_eq!(ErrorCode::AudioWriteFailed.as_str(), "AUDIO_WRITE_FAILED");
        assert_eq!(ErrorCode::ModelInferenceFailed.as_str(), "MODEL_INFERENCE_FAILED");
        assert_eq!(ErrorCode::BatchSizeMismatch.as_str(), "BATCH_SIZE_MISMATCH");
        assert_eq!(ErrorCode::InvalidParameter.as_str(), "INVALID_PARAMETER");
    }

    #[test]
    fn error_code_recovery_hints_not_empty() {
        for code in [
            ErrorCode::ModelNotFound,
            ErrorCode::ModelLoadFailed,
            ErrorCode::ConfigInvalid,
            ErrorCode::AudioReadFailed,
            ErrorCode::AudioWriteFailed,
            ErrorCode::ModelInferenceFailed,
            ErrorCode::BatchSizeMismatch,
            ErrorCode::InvalidParameter,
        ] {
            assert!(!code.recovery_hint().is_empty(), "{} has no hint", code);
            assert!(!code.description().is_empty(), "{} has no description", code);
        }
    }

    #[test]
    fn batch_size_mismatch_display() {
        let err = AudioLdmError::batch_size_mismatch("waveform", &[2, 160000], 3);
        let text = err.to_string();
        assert!(text.contains("BATCH_SIZE_MISMATCH"));
        assert!(text.contains("[2, 160000]"));
        assert!(text.contains("Recovery:"));
    }

    #[test]
    fn with_source_exposes_cause() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = AudioLdmError::with_source(ErrorCode::AudioReadFailed, "read failed", io);
        assert!(err.source().is_some());
        assert_eq!(err.code, ErrorCode::AudioReadFailed);
    }
}
