//! Realtime voice session engine.
//!
//! This module drives a spoken conversation with a remote realtime model over
//! a duplex event channel: microphone blocks stream out while recording is
//! on, response audio streams back into the playback buffer, transcripts are
//! reconstructed from fragments, and tool calls requested by the model are run
//! locally.
//!
//! # Architecture
//!
//! - [`DuplexChannel`]: typed outbound/inbound event queues plus the
//!   transport task behind them ([`openai::connect`] for WebSocket)
//! - [`SessionMachine`]: reacts to server events in receipt order
//! - [`TurnController`]: recording toggle and manual end-of-turn
//! - [`ToolRegistry`]: explicitly registered local tools
//! - [`VoiceSession`]: owns all of the above for one conversation
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian mono at 24kHz in both directions.

mod base;
pub mod channel;
pub mod machine;
pub mod openai;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod turn;

pub use base::{
    NegotiatedSession, RealtimeError, RealtimeResult, SessionEvent, SessionSettings,
    SessionState, TranscriptResult, TranscriptRole, TurnMode,
};
pub use channel::{
    DEFAULT_CHANNEL_CAPACITY, DuplexChannel, EventSender, InboundEvents, RemoteEnd,
};
pub use machine::{DEFAULT_SHUTDOWN_TIMEOUT, MachineObservers, MachineOptions, SessionMachine};
pub use openai::{Modality, OPENAI_REALTIME_SAMPLE_RATE, OpenAIRealtimeVoice, ToolChoice};
pub use session::{OutputOpener, VoiceSession, VoiceSessionBuilder};
pub use tools::{
    DEFAULT_TOOL_TIMEOUT, LocalTool, PendingToolCall, ToolError, ToolOutcome, ToolRegistry,
};
pub use transcript::{FinalizedTranscript, RetentionPolicy, TranscriptStore};
pub use turn::TurnController;
