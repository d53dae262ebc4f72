//! Conditioning selection.
//!
//! A [`ConditioningRequest`] names which batch slot feeds the conditioning
//! encoder and which encoder branch embeds it. It travels with each call.

use serde::{Deserialize, Serialize};

/// Batch slot read for conditioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKey {
    Text,
    Waveform,
}

impl ConditionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKey::Text => "text",
            ConditionKey::Waveform => "waveform",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ConditionKey::Text),
            "waveform" => Some(ConditionKey::Waveform),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conditioning encoder branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    Text,
    Audio,
}

impl EmbedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedMode::Text => "text",
            EmbedMode::Audio => "audio",
        }
    }
}

/// Conditioning mode for one generation call.
///
/// Only the two consistent pairings exist: text slot through the text
/// branch, waveform slot through the audio branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConditioningRequest {
    key: ConditionKey,
    embed_mode: EmbedMode,
}

impl ConditioningRequest {
    /// Condition on the prompt text.
    pub fn text() -> Self {
        Self {
            key: ConditionKey::Text,
            embed_mode: EmbedMode::Text,
        }
    }

    /// Condition on the reference waveform.
    pub fn audio() -> Self {
        Self {
            key: ConditionKey::Waveform,
            embed_mode: EmbedMode::Audio,
        }
    }

    /// AUDIO when a reference recording is supplied, TEXT otherwise.
    pub fn for_reference(has_audio: bool) -> Self {
        if has_audio {
            Self::audio()
        } else {
            Self::text()
        }
    }

    /// Request matching a batch slot name.
    pub fn from_key(key: ConditionKey) -> Self {
        match key {
            ConditionKey::Text => Self::text(),
            ConditionKey::Waveform => Self::audio(),
        }
    }

    pub fn key(&self) -> ConditionKey {
        self.key
    }

    pub fn embed_mode(&self) -> EmbedMode {
        self.embed_mode
    }
}

impl Default for ConditioningRequest {
    fn default() -> Self {
        Self::text()
    }
}
