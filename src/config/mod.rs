//! Configuration module for the voice session engine
//!
//! This module handles engine configuration from various sources: .env files,
//! YAML files, and environment variables. Priority: YAML > ENV vars > .env
//! values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable access
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use rtvoice::config::EngineConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = EngineConfig::from_file(Path::new("rtvoice.yaml"))?;
//!
//! println!("Connecting to {} ({})", config.endpoint, config.model);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::audio::{CaptureConfig, PLAYBACK_SAMPLE_RATE, PlaybackConfig};
use crate::core::realtime::openai::ConnectOptions;
use crate::core::realtime::{
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TOOL_TIMEOUT, Modality, OpenAIRealtimeVoice,
    RealtimeError, RealtimeResult, RetentionPolicy, SessionSettings, ToolChoice, TurnMode,
};

pub use env::ALL as ENV_VARS;

/// Default bound on one tool invocation, in seconds.
pub const DEFAULT_TOOL_TIMEOUT_SECONDS: u64 = DEFAULT_TOOL_TIMEOUT.as_secs();

/// Default bound on each teardown step, in milliseconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64;

/// Engine configuration
///
/// Contains everything needed to run a voice session:
/// - Remote service connection (credential, endpoint, model)
/// - Requested session settings (voice, instructions, turn mode, modalities)
/// - Audio device block sizes
/// - Bounded waits for tools and teardown
#[derive(Clone)]
pub struct EngineConfig {
    // Remote service
    /// Bearer credential for the realtime service
    pub api_key: Option<String>,
    /// Base WebSocket endpoint
    pub endpoint: String,
    /// Model query parameter
    pub model: String,
    /// Capacity of each direction of the duplex channel
    pub channel_capacity: usize,

    // Session settings
    pub voice: OpenAIRealtimeVoice,
    pub instructions: Option<String>,
    pub turn_mode: TurnMode,
    /// Input transcription model; `None` disables user transcripts
    pub transcription_model: Option<String>,
    pub modalities: Vec<Modality>,
    pub tool_choice: ToolChoice,
    pub temperature: Option<f32>,
    pub transcript_retention: RetentionPolicy,

    // Audio
    /// Capture device rate; must match what the device delivers
    pub capture_sample_rate: u32,
    pub capture_block_ms: u32,
    pub playback_block_ms: u32,

    // Timeouts
    pub tool_timeout_seconds: u64,
    pub shutdown_timeout_ms: u64,
}

/// Zeroize the credential when the config is dropped.
impl Drop for EngineConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("channel_capacity", &self.channel_capacity)
            .field("voice", &self.voice)
            .field("instructions", &self.instructions)
            .field("turn_mode", &self.turn_mode)
            .field("transcription_model", &self.transcription_model)
            .field("modalities", &self.modalities)
            .field("tool_choice", &self.tool_choice)
            .field("temperature", &self.temperature)
            .field("transcript_retention", &self.transcript_retention)
            .field("capture_sample_rate", &self.capture_sample_rate)
            .field("capture_block_ms", &self.capture_block_ms)
            .field("playback_block_ms", &self.playback_block_ms)
            .field("tool_timeout_seconds", &self.tool_timeout_seconds)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and defaults
    ///
    /// `.env` values must already be in the process environment (the binary
    /// loads them at startup).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the merged configuration for values the engine cannot use.
    pub fn validate(&self) -> Result<(), String> {
        validation::validate_endpoint(self)?;
        validation::validate_session(self)?;
        validation::validate_audio(self)?;
        validation::validate_limits(self)?;
        Ok(())
    }

    /// The credential, or an authentication error when none is configured.
    pub fn require_api_key(&self) -> RealtimeResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            RealtimeError::AuthenticationFailed(format!("{} is not set", env::OPENAI_API_KEY))
        })
    }

    /// WebSocket connection parameters.
    pub fn connect_options(&self) -> RealtimeResult<ConnectOptions> {
        let mut options = ConnectOptions::new(
            self.endpoint.as_str(),
            self.model.as_str(),
            self.require_api_key()?,
        );
        options.channel_capacity = self.channel_capacity;
        Ok(options)
    }

    /// Requested session settings.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            turn_mode: self.turn_mode,
            voice: self.voice,
            instructions: self.instructions.clone(),
            transcription_model: self.transcription_model.clone(),
            modalities: self.modalities.clone(),
            tool_choice: self.tool_choice.clone(),
            temperature: self.temperature,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            block_ms: self.playback_block_ms,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.capture_sample_rate,
            block_ms: self.capture_block_ms,
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
