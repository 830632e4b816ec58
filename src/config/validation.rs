//! Configuration validation.

use super::EngineConfig;
use crate::core::realtime::openai::build_ws_url;

/// Sample rates a capture device may be opened at.
const SUPPORTED_CAPTURE_RATES: &[u32] = &[8000, 16000, 24000, 44100, 48000];

/// Temperature range accepted by the realtime service.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.6..=1.2;

pub fn validate_endpoint(config: &EngineConfig) -> Result<(), String> {
    build_ws_url(&config.endpoint, &config.model)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

pub fn validate_session(config: &EngineConfig) -> Result<(), String> {
    if config.modalities.is_empty() {
        return Err("At least one modality is required".to_string());
    }
    if let Some(t) = config.temperature
        && !TEMPERATURE_RANGE.contains(&t)
    {
        return Err(format!(
            "Temperature {t} outside {}..={}",
            TEMPERATURE_RANGE.start(),
            TEMPERATURE_RANGE.end()
        ));
    }
    Ok(())
}

pub fn validate_audio(config: &EngineConfig) -> Result<(), String> {
    if !SUPPORTED_CAPTURE_RATES.contains(&config.capture_sample_rate) {
        return Err(format!(
            "Unsupported capture sample rate {} (expected one of {:?})",
            config.capture_sample_rate, SUPPORTED_CAPTURE_RATES
        ));
    }
    if !(10..=1000).contains(&config.capture_block_ms) {
        return Err(format!(
            "Capture block of {}ms outside 10..=1000",
            config.capture_block_ms
        ));
    }
    if !(10..=1000).contains(&config.playback_block_ms) {
        return Err(format!(
            "Playback block of {}ms outside 10..=1000",
            config.playback_block_ms
        ));
    }
    Ok(())
}

pub fn validate_limits(config: &EngineConfig) -> Result<(), String> {
    if config.tool_timeout_seconds == 0 {
        return Err("Tool timeout must be positive".to_string());
    }
    if config.shutdown_timeout_ms == 0 {
        return Err("Shutdown timeout must be positive".to_string());
    }
    if config.channel_capacity == 0 {
        return Err("Channel capacity must be positive".to_string());
    }
    Ok(())
}
