//! Merging YAML, environment and defaults into an [`EngineConfig`].

use super::env;
use super::yaml::YamlConfig;
use super::{DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_TOOL_TIMEOUT_SECONDS, EngineConfig};
use crate::core::audio::{DEFAULT_CAPTURE_BLOCK_MS, DEFAULT_PLAYBACK_BLOCK_MS};
use crate::core::realtime::openai::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL,
};
use crate::core::realtime::{
    DEFAULT_CHANNEL_CAPACITY, Modality, OpenAIRealtimeVoice, RetentionPolicy, ToolChoice,
    TurnMode,
};

/// Build the configuration with YAML values taking precedence over the
/// environment, and the environment over defaults.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    let provider = yaml.provider.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let audio = yaml.audio.unwrap_or_default();
    let timeouts = yaml.timeouts.unwrap_or_default();

    let voice = match session.voice.or_else(|| env::var(env::VOICE)) {
        Some(raw) => OpenAIRealtimeVoice::parse(&raw)
            .ok_or_else(|| format!("Invalid voice '{raw}'"))?,
        None => OpenAIRealtimeVoice::default(),
    };

    let turn_mode = match session.turn_mode.or_else(|| env::var(env::TURN_MODE)) {
        Some(raw) => TurnMode::parse(&raw).ok_or_else(|| format!("Invalid turn mode '{raw}'"))?,
        None => TurnMode::default(),
    };

    let modalities = match session.modalities.or_else(|| env::list(env::MODALITIES)) {
        Some(raw) => raw
            .iter()
            .map(|m| Modality::parse(m).ok_or_else(|| format!("Invalid modality '{m}'")))
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![Modality::Text, Modality::Audio],
    };

    let tool_choice = match session.tool_choice.or_else(|| env::var(env::TOOL_CHOICE)) {
        Some(raw) => {
            ToolChoice::parse(&raw).ok_or_else(|| format!("Invalid tool choice '{raw}'"))?
        }
        None => ToolChoice::default(),
    };

    let transcript_retention = match session
        .transcript_retention
        .or_else(|| env::var(env::TRANSCRIPT_RETENTION))
    {
        Some(raw) => RetentionPolicy::parse(&raw)
            .ok_or_else(|| format!("Invalid transcript retention '{raw}'"))?,
        None => RetentionPolicy::default(),
    };

    let transcription_model = match session
        .transcription_model
        .or_else(|| env::var(env::TRANSCRIPTION_MODEL))
    {
        Some(raw) if raw.trim().is_empty() || raw.eq_ignore_ascii_case("none") => None,
        Some(raw) => Some(raw),
        None => Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
    };

    let temperature = match session.temperature {
        Some(t) => Some(t),
        None => env::parse::<f32>(env::TEMPERATURE)?,
    };

    Ok(EngineConfig {
        api_key: provider.api_key.or_else(|| env::var(env::OPENAI_API_KEY)),
        endpoint: provider
            .endpoint
            .or_else(|| env::var(env::ENDPOINT))
            .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string()),
        model: provider
            .model
            .or_else(|| env::var(env::MODEL))
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
        channel_capacity: or_env(provider.channel_capacity, env::CHANNEL_CAPACITY)?
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
        voice,
        instructions: session.instructions.or_else(|| env::var(env::INSTRUCTIONS)),
        turn_mode,
        transcription_model,
        modalities,
        tool_choice,
        temperature,
        transcript_retention,
        capture_sample_rate: or_env(audio.capture_sample_rate, env::CAPTURE_SAMPLE_RATE)?
            .unwrap_or(OPENAI_REALTIME_SAMPLE_RATE),
        capture_block_ms: or_env(audio.capture_block_ms, env::CAPTURE_BLOCK_MS)?
            .unwrap_or(DEFAULT_CAPTURE_BLOCK_MS),
        playback_block_ms: or_env(audio.playback_block_ms, env::PLAYBACK_BLOCK_MS)?
            .unwrap_or(DEFAULT_PLAYBACK_BLOCK_MS),
        tool_timeout_seconds: or_env(timeouts.tool_seconds, env::TOOL_TIMEOUT_SECONDS)?
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECONDS),
        shutdown_timeout_ms: or_env(timeouts.shutdown_ms, env::SHUTDOWN_TIMEOUT_MS)?
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
    })
}

fn or_env<T>(value: Option<T>, name: &str) -> Result<Option<T>, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => Ok(Some(v)),
        None => env::parse(name),
    }
}
