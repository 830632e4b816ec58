//! OpenAI Realtime API protocol.
//!
//! Wire events, protocol constants, and the WebSocket transport that turns a
//! Realtime API connection into a [`DuplexChannel`](super::DuplexChannel).
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
mod messages;

pub use client::{ConnectOptions, connect};
pub use config::{
    AUDIO_FORMAT_PCM16, DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, Modality,
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeVoice, ToolChoice,
    build_ws_url,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, Response,
    ServerEvent, Session, SessionConfig, ToolDef, TurnDetection, decode_audio_delta,
};
