pub mod audio;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{
    AudioChunk, AudioError, AudioResult, CaptureConfig, CaptureLoop, InputDevice, OutputDevice,
    PlaybackBuffer, PlaybackConfig, PlaybackSource,
};

pub use realtime::{
    DuplexChannel, EventSender, RealtimeError, RealtimeResult, SessionEvent, SessionSettings,
    SessionState, ToolRegistry, TurnMode, VoiceSession,
};
