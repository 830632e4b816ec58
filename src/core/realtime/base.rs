//! Base types for the realtime voice session engine.
//!
//! This module defines the error taxonomy, session lifecycle states, turn
//! modes and the events a running session surfaces to its owner.
//!
//! # Audio Format
//!
//! All audio exchanged with the remote service is PCM 16-bit signed
//! little-endian mono at 24kHz.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::openai::{
    AUDIO_FORMAT_PCM16, InputAudioTranscription, Modality, OpenAIRealtimeVoice, Session,
    SessionConfig, ToolChoice, ToolDef, TurnDetection,
};
use crate::core::audio::AudioError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the remote service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed by the remote side or the transport
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Missing or rejected credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Audio device failure
    #[error("Audio device error: {0}")]
    Device(#[from] AudioError),

    /// Error event reported by the remote service
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Inbound payload could not be decoded
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

impl RealtimeError {
    /// Whether this error ends the session.
    ///
    /// Transport and device failures are fatal. Protocol errors, malformed
    /// fragments and timeouts of individual operations are reported and the
    /// session continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RealtimeError::ConnectionFailed(_)
                | RealtimeError::ConnectionClosed(_)
                | RealtimeError::AuthenticationFailed(_)
                | RealtimeError::InvalidConfiguration(_)
                | RealtimeError::WebSocketError(_)
                | RealtimeError::Device(_)
                | RealtimeError::NotConnected
        )
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle of a voice session.
///
/// `Connecting → Established → Listening ⇄ Responding → Closing → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for the remote side to create the session
    #[default]
    Connecting,
    /// Session created, configuration anchored
    Established,
    /// Waiting for user input
    Listening,
    /// Remote side is streaming a response
    Responding,
    /// Tearing down
    Closing,
    /// Torn down
    Closed,
}

impl SessionState {
    /// Whether the session has been created and not yet torn down.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Established | SessionState::Listening | SessionState::Responding
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Established => write!(f, "Established"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Responding => write!(f, "Responding"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Turn Mode
// =============================================================================

/// How the end of a user turn is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// The remote side detects speech boundaries
    #[default]
    ServerVad,
    /// The client commits the buffer and requests a response
    Manual,
}

impl TurnMode {
    /// Config value.
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnMode::ServerVad => "server_vad",
            TurnMode::Manual => "manual",
        }
    }

    /// Parse from a config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "server_vad" | "server-vad" | "vad" | "auto" => Some(TurnMode::ServerVad),
            "manual" | "push_to_talk" | "push-to-talk" | "none" => Some(TurnMode::Manual),
            _ => None,
        }
    }

    /// Turn mode implied by a negotiated turn detection setting.
    pub fn from_turn_detection(detection: Option<&TurnDetection>) -> Self {
        match detection {
            Some(TurnDetection::ServerVad { .. }) | Some(TurnDetection::SemanticVad { .. }) => {
                TurnMode::ServerVad
            }
            Some(TurnDetection::None {}) | None => TurnMode::Manual,
        }
    }
}

impl fmt::Display for TurnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Session Settings
// =============================================================================

/// Session configuration requested by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Turn-taking mode
    pub turn_mode: TurnMode,
    /// Voice for audio output
    pub voice: OpenAIRealtimeVoice,
    /// System instructions
    pub instructions: Option<String>,
    /// Input transcription model; `None` disables user transcripts
    pub transcription_model: Option<String>,
    /// Response modalities
    pub modalities: Vec<Modality>,
    /// Tool selection strategy
    pub tool_choice: ToolChoice,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            turn_mode: TurnMode::ServerVad,
            voice: OpenAIRealtimeVoice::default(),
            instructions: None,
            transcription_model: Some("whisper-1".to_string()),
            modalities: vec![Modality::Text, Modality::Audio],
            tool_choice: ToolChoice::Auto,
            temperature: None,
        }
    }
}

impl SessionSettings {
    /// Build the `session.update` payload for these settings.
    pub fn session_config(&self, tools: Vec<ToolDef>) -> SessionConfig {
        let turn_detection = match self.turn_mode {
            TurnMode::ServerVad => Some(TurnDetection::server_vad()),
            TurnMode::Manual => None,
        };

        let has_tools = !tools.is_empty();
        let audio = self.modalities.contains(&Modality::Audio);

        SessionConfig {
            modalities: Some(self.modalities.iter().map(|m| m.as_str().to_string()).collect()),
            instructions: self.instructions.clone(),
            voice: audio.then(|| self.voice.as_str().to_string()),
            input_audio_format: Some(AUDIO_FORMAT_PCM16.to_string()),
            output_audio_format: audio.then(|| AUDIO_FORMAT_PCM16.to_string()),
            input_audio_transcription: self
                .transcription_model
                .as_ref()
                .map(|model| InputAudioTranscription {
                    model: model.clone(),
                }),
            turn_detection: Some(turn_detection),
            tools: has_tools.then_some(tools),
            tool_choice: has_tools.then(|| self.tool_choice.to_string()),
            temperature: self.temperature,
        }
    }
}

/// Session configuration as acknowledged by the remote side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NegotiatedSession {
    /// Session ID
    pub id: String,
    /// Model serving the session
    pub model: String,
    /// Voice for audio output
    pub voice: Option<String>,
    /// Effective turn mode
    pub turn_mode: TurnMode,
    /// Response modalities
    pub modalities: Vec<String>,
    /// Number of tools the remote side knows about
    pub tool_count: usize,
}

impl NegotiatedSession {
    /// Anchor a negotiated session from `session.created`.
    pub fn from_session(session: &Session, fallback_mode: TurnMode) -> Self {
        let mut negotiated = Self {
            turn_mode: fallback_mode,
            ..Default::default()
        };
        negotiated.amend(session);
        negotiated
    }

    /// Apply the fields present in a `session.updated` payload.
    pub fn amend(&mut self, session: &Session) {
        if !session.id.is_empty() {
            self.id = session.id.clone();
        }
        if !session.model.is_empty() {
            self.model = session.model.clone();
        }
        if session.voice.is_some() {
            self.voice = session.voice.clone();
        }
        if let Some(detection) = &session.turn_detection {
            self.turn_mode = TurnMode::from_turn_detection(detection.as_ref());
        }
        if let Some(modalities) = &session.modalities {
            self.modalities = modalities.clone();
        }
        if let Some(tools) = &session.tools {
            self.tool_count = tools.len();
        }
    }
}

// =============================================================================
// Session Events
// =============================================================================

/// Transcript surfaced by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// The text so far (partial) or in full (final)
    pub text: String,
    /// Role of the speaker
    pub role: TranscriptRole,
    /// Whether this is the finalized text
    pub is_final: bool,
    /// Item ID from the remote side
    pub item_id: String,
}

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant output
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Notifications emitted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session created by the remote side
    Ready {
        /// Session ID
        session_id: String,
    },
    /// Negotiated configuration changed
    ConfigUpdated {
        /// Effective turn mode
        turn_mode: TurnMode,
    },
    /// User started speaking; playback was cut off
    SpeechStarted {
        /// Item ID of the user turn
        item_id: String,
    },
    /// User stopped speaking
    SpeechStopped {
        /// Item ID of the user turn
        item_id: String,
    },
    /// Partial or final transcript
    Transcript(TranscriptResult),
    /// A local tool ran on behalf of the remote side
    ToolInvoked {
        /// Call ID
        call_id: String,
        /// Tool name
        name: String,
        /// Output sent back
        output: String,
        /// Whether the output is an error report
        is_error: bool,
    },
    /// A response finished
    ResponseDone {
        /// Response ID
        response_id: String,
        /// Number of tool calls it requested
        tool_calls: usize,
    },
    /// Error event from the remote side; the session continues
    ProviderError {
        /// Error message
        message: String,
        /// Error code, if any
        code: Option<String>,
    },
    /// Session ended
    Closed {
        /// Fatal error that ended it, if any
        reason: Option<String>,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Connecting.to_string(), "Connecting");
        assert_eq!(SessionState::Responding.to_string(), "Responding");
        assert_eq!(SessionState::Closed.to_string(), "Closed");
    }

    #[test]
    fn test_session_state_active() {
        assert!(!SessionState::Connecting.is_active());
        assert!(SessionState::Listening.is_active());
        assert!(!SessionState::Closing.is_active());
    }

    #[test]
    fn test_turn_mode_parse() {
        assert_eq!(TurnMode::parse("server_vad"), Some(TurnMode::ServerVad));
        assert_eq!(TurnMode::parse("MANUAL"), Some(TurnMode::Manual));
        assert_eq!(TurnMode::parse("push-to-talk"), Some(TurnMode::Manual));
        assert_eq!(TurnMode::parse("sometimes"), None);
    }

    #[test]
    fn test_turn_mode_from_detection() {
        assert_eq!(
            TurnMode::from_turn_detection(Some(&TurnDetection::server_vad())),
            TurnMode::ServerVad
        );
        assert_eq!(TurnMode::from_turn_detection(None), TurnMode::Manual);
        assert_eq!(
            TurnMode::from_turn_detection(Some(&TurnDetection::None {})),
            TurnMode::Manual
        );
    }

    #[test]
    fn test_error_fatality() {
        assert!(RealtimeError::ConnectionClosed("eof".into()).is_fatal());
        assert!(RealtimeError::Device(AudioError::ReadFailed("x".into())).is_fatal());
        assert!(!RealtimeError::ProviderError("bad".into()).is_fatal());
        assert!(!RealtimeError::MalformedPayload("odd".into()).is_fatal());
        assert!(!RealtimeError::Timeout("tool".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed("refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: refused");
        let err: RealtimeError = AudioError::StartFailed("busy".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Audio device error: Failed to start audio device: busy"
        );
    }

    #[test]
    fn test_manual_settings_send_null_turn_detection() {
        let settings = SessionSettings {
            turn_mode: TurnMode::Manual,
            ..Default::default()
        };
        let json = serde_json::to_value(settings.session_config(Vec::new())).unwrap();
        assert!(json.get("turn_detection").unwrap().is_null());
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    #[test]
    fn test_vad_settings_with_tools() {
        let settings = SessionSettings::default();
        let tools = vec![ToolDef::function(
            "lookup",
            "Look something up",
            serde_json::json!({"type": "object"}),
        )];
        let json = serde_json::to_value(settings.session_config(tools)).unwrap();
        assert_eq!(json["turn_detection"]["type"], "server_vad");
        assert_eq!(json["tools"][0]["name"], "lookup");
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(json["voice"], "alloy");
    }

    #[test]
    fn test_text_only_settings_omit_voice() {
        let settings = SessionSettings {
            modalities: vec![Modality::Text],
            ..Default::default()
        };
        let json = serde_json::to_value(settings.session_config(Vec::new())).unwrap();
        assert!(json.get("voice").is_none());
        assert!(json.get("output_audio_format").is_none());
        assert_eq!(json["modalities"], serde_json::json!(["text"]));
    }

    #[test]
    fn test_negotiated_session_amend() {
        let created: Session = serde_json::from_value(serde_json::json!({
            "id": "sess_1",
            "model": "gpt-4o-realtime-preview",
            "voice": "alloy",
            "turn_detection": {"type": "server_vad"}
        }))
        .unwrap();
        let mut negotiated = NegotiatedSession::from_session(&created, TurnMode::Manual);
        assert_eq!(negotiated.id, "sess_1");
        assert_eq!(negotiated.turn_mode, TurnMode::ServerVad);

        let updated: Session =
            serde_json::from_value(serde_json::json!({"turn_detection": null})).unwrap();
        negotiated.amend(&updated);
        assert_eq!(negotiated.turn_mode, TurnMode::Manual);
        assert_eq!(negotiated.id, "sess_1");

        let untouched: Session = serde_json::from_value(serde_json::json!({"voice": "echo"})).unwrap();
        negotiated.amend(&untouched);
        assert_eq!(negotiated.turn_mode, TurnMode::Manual);
        assert_eq!(negotiated.voice.as_deref(), Some("echo"));
    }
}
