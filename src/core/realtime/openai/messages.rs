//! OpenAI Realtime API wire events.
//!
//! Only the subset of the protocol the session engine speaks is modelled.
//! Every event is a JSON object tagged by `type`.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Request session configuration
//! - input_audio_buffer.append - Append audio to the input buffer
//! - input_audio_buffer.commit - Commit the input buffer as a user turn
//! - input_audio_buffer.clear - Discard the input buffer
//! - conversation.item.create - Add a message or tool output
//! - response.create - Ask for a response
//! - response.cancel - Cancel the current response
//!
//! Server events (received from server):
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped / committed
//! - conversation.item.input_audio_transcription.completed
//! - response.audio.delta, response.audio_transcript.delta/done
//! - response.text.delta/done
//! - response.done
//! - error
//!
//! Newer event names (`response.output_audio.delta` and friends) are accepted
//! as aliases. Event types outside this subset decode to
//! [`ServerEvent::Unknown`].

use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::audio::{AudioChunk, PLAYBACK_SAMPLE_RATE};
use crate::core::realtime::{RealtimeError, RealtimeResult};

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Payload of `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection. `Some(None)` is sent as `null` and disables server VAD.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub turn_detection: Option<Option<TurnDetection>>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic VAD
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
    },
    /// No turn detection
    #[serde(rename = "none")]
    None {},
}

impl TurnDetection {
    /// Server VAD with the service defaults.
    pub fn server_vad() -> Self {
        TurnDetection::ServerVad {
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
        }
    }
}

/// Tool definition advertised to the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDef {
    /// A function tool.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message carrying text.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user_message(ContentPart {
            content_type: "input_text".to_string(),
            text: Some(text.into()),
            ..Default::default()
        })
    }

    /// A user message carrying PCM16 audio.
    pub fn user_audio(pcm16: &[u8]) -> Self {
        Self::user_message(ContentPart {
            content_type: "input_audio".to_string(),
            audio: Some(BASE64_STANDARD.encode(pcm16)),
            ..Default::default()
        })
    }

    /// The output of a function call.
    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    /// Whether this item asks the client to run a function.
    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }

    fn user_message(part: ContentPart) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![part]),
            ..Default::default()
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from PCM16 bytes.
    pub fn audio_append(pcm16: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(pcm16),
        }
    }

    /// Event type name on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: Session,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: Session,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: String,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: String,
    },

    /// Audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        /// New item ID
        #[serde(default)]
        item_id: String,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        #[serde(default)]
        item_id: String,
        /// Transcript text
        transcript: String,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: Response,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: Response,
    },

    /// Text delta
    #[serde(rename = "response.text.delta", alias = "response.output_text.delta")]
    TextDelta {
        /// Item ID
        item_id: String,
        /// Text fragment
        delta: String,
    },

    /// Text done
    #[serde(rename = "response.text.done", alias = "response.output_text.done")]
    TextDone {
        /// Item ID
        item_id: String,
        /// Full text
        #[serde(default)]
        text: String,
    },

    /// Audio transcript delta
    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.output_audio_transcript.delta"
    )]
    AudioTranscriptDelta {
        /// Item ID
        item_id: String,
        /// Transcript fragment
        delta: String,
    },

    /// Audio transcript done
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    AudioTranscriptDone {
        /// Item ID
        item_id: String,
        /// Full transcript
        #[serde(default)]
        transcript: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        /// Response ID
        #[serde(default)]
        response_id: String,
        /// Item ID
        item_id: String,
        /// Base64-encoded PCM16 audio
        delta: String,
    },

    /// Audio done
    #[serde(rename = "response.audio.done", alias = "response.output_audio.done")]
    AudioDone {
        /// Item ID
        #[serde(default)]
        item_id: String,
    },

    /// Any event type outside the modelled subset
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Event type name, for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::InputAudioBufferCommitted { .. } => "input_audio_buffer.committed",
            ServerEvent::TranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::TextDelta { .. } => "response.text.delta",
            ServerEvent::TextDone { .. } => "response.text.done",
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone { .. } => "response.audio.done",
            ServerEvent::Unknown => "unknown",
        }
    }
}

/// Decode a base64 PCM16 audio delta into a playback chunk.
pub fn decode_audio_delta(delta: &str) -> RealtimeResult<AudioChunk> {
    let bytes = BASE64_STANDARD
        .decode(delta)
        .map_err(|e| RealtimeError::MalformedPayload(format!("audio delta: {e}")))?;
    AudioChunk::from_pcm16_le(&bytes, PLAYBACK_SAMPLE_RATE)
        .map_err(|e| RealtimeError::MalformedPayload(e.to_string()))
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Parameter that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information as reported by the server.
///
/// Fields absent from an update are `None` and leave the negotiated value
/// unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Session {
    /// Session ID
    #[serde(default)]
    pub id: String,
    /// Model used
    #[serde(default)]
    pub model: String,
    /// Response modalities
    #[serde(default)]
    pub modalities: Option<Vec<String>>,
    /// System instructions
    #[serde(default)]
    pub instructions: Option<String>,
    /// Voice
    #[serde(default)]
    pub voice: Option<String>,
    /// Input audio transcription config
    #[serde(default)]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    /// Turn detection; `Some(None)` means explicitly disabled
    #[serde(default, deserialize_with = "deserialize_some")]
    pub turn_detection: Option<Option<TurnDetection>>,
    /// Tools
    #[serde(default)]
    pub tools: Option<Vec<ToolDef>>,
}

/// Response information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    /// Response ID
    #[serde(default)]
    pub id: String,
    /// Response status
    #[serde(default)]
    pub status: String,
    /// Output items
    #[serde(default)]
    pub output: Vec<ConversationItem>,
}

impl Response {
    /// Function-call output items, in output order.
    pub fn function_calls(&self) -> impl Iterator<Item = &ConversationItem> {
        self.output.iter().filter(|item| item.is_function_call())
    }
}

// =============================================================================
// Tests
// =============================================================================
