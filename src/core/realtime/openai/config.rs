//! OpenAI Realtime API configuration types.
//!
//! Endpoint and audio constants, voice and modality enums, tool choice, and
//! the connection URL builder.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::realtime::{RealtimeError, RealtimeResult};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Default input transcription model.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Audio sample rate used by the Realtime API for PCM16.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Wire name of the PCM16 audio format.
pub const AUDIO_FORMAT_PCM16: &str = "pcm16";

/// Build the connection URL for `model` on `endpoint`.
///
/// Accepts `ws`/`wss` endpoints, and `http`/`https` which are mapped to their
/// WebSocket equivalents.
pub fn build_ws_url(endpoint: &str, model: &str) -> RealtimeResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| RealtimeError::InvalidConfiguration(format!("endpoint {endpoint}: {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "unsupported endpoint scheme '{other}'"
            )));
        }
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme).map_err(|_| {
            RealtimeError::InvalidConfiguration(format!("cannot use endpoint {endpoint}"))
        })?;
    }

    if model.trim().is_empty() {
        return Err(RealtimeError::InvalidConfiguration(
            "model must not be empty".to_string(),
        ));
    }

    url.query_pairs_mut().append_pair("model", model);
    Ok(url)
}

// =============================================================================
// Voices
// =============================================================================

/// Available output voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    /// Ash voice
    Ash,
    /// Ballad voice
    Ballad,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl OpenAIRealtimeVoice {
    const ALL: [OpenAIRealtimeVoice; 8] = [
        Self::Alloy,
        Self::Ash,
        Self::Ballad,
        Self::Coral,
        Self::Echo,
        Self::Sage,
        Self::Shimmer,
        Self::Verse,
    ];

    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse a voice name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        Self::ALL.into_iter().find(|voice| voice.as_str() == s)
    }

    /// All available voices.
    pub fn all() -> &'static [OpenAIRealtimeVoice] {
        &Self::ALL
    }
}

impl fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Modalities
// =============================================================================

/// Response modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text output
    Text,
    /// Audio output
    Audio,
}

impl Modality {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }

    /// Parse a modality name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

// =============================================================================
// Tool Choice
// =============================================================================

/// How the remote side may pick tools.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    /// Model decides
    #[default]
    Auto,
    /// Never call tools
    None,
    /// Must call some tool
    Required,
}

impl ToolChoice {
    /// Parse a config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "none" => Some(Self::None),
            "required" => Some(Self::Required),
            _ => None,
        }
    }
}

impl fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::None => write!(f, "none"),
            Self::Required => write!(f, "required"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
