//! Environment variable access.
//!
//! `.env` files are loaded into the process environment by the binary at
//! startup, so everything here reads the real environment only.

use std::env;
use std::str::FromStr;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENDPOINT: &str = "RTVOICE_ENDPOINT";
pub const MODEL: &str = "RTVOICE_MODEL";
pub const CHANNEL_CAPACITY: &str = "RTVOICE_CHANNEL_CAPACITY";
pub const VOICE: &str = "RTVOICE_VOICE";
pub const INSTRUCTIONS: &str = "RTVOICE_INSTRUCTIONS";
pub const TURN_MODE: &str = "RTVOICE_TURN_MODE";
pub const TRANSCRIPTION_MODEL: &str = "RTVOICE_TRANSCRIPTION_MODEL";
pub const MODALITIES: &str = "RTVOICE_MODALITIES";
pub const TOOL_CHOICE: &str = "RTVOICE_TOOL_CHOICE";
pub const TEMPERATURE: &str = "RTVOICE_TEMPERATURE";
pub const TRANSCRIPT_RETENTION: &str = "RTVOICE_TRANSCRIPT_RETENTION";
pub const CAPTURE_SAMPLE_RATE: &str = "RTVOICE_CAPTURE_SAMPLE_RATE";
pub const CAPTURE_BLOCK_MS: &str = "RTVOICE_CAPTURE_BLOCK_MS";
pub const PLAYBACK_BLOCK_MS: &str = "RTVOICE_PLAYBACK_BLOCK_MS";
pub const TOOL_TIMEOUT_SECONDS: &str = "RTVOICE_TOOL_TIMEOUT_SECONDS";
pub const SHUTDOWN_TIMEOUT_MS: &str = "RTVOICE_SHUTDOWN_TIMEOUT_MS";

/// Every variable the engine reads.
pub const ALL: &[&str] = &[
    OPENAI_API_KEY,
    ENDPOINT,
    MODEL,
    CHANNEL_CAPACITY,
    VOICE,
    INSTRUCTIONS,
    TURN_MODE,
    TRANSCRIPTION_MODEL,
    MODALITIES,
    TOOL_CHOICE,
    TEMPERATURE,
    TRANSCRIPT_RETENTION,
    CAPTURE_SAMPLE_RATE,
    CAPTURE_BLOCK_MS,
    PLAYBACK_BLOCK_MS,
    TOOL_TIMEOUT_SECONDS,
    SHUTDOWN_TIMEOUT_MS,
];

/// Trimmed value of `name`; unset and blank are both `None`.
pub fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parsed value of `name`.
pub fn parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} value '{raw}': {e}")),
        None => Ok(None),
    }
}

/// Comma-separated list in `name`.
pub fn list(name: &str) -> Option<Vec<String>> {
    var(name).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_var_trims_and_skips_blank() {
        unsafe {
            env::set_var(MODEL, "  spaced  ");
            env::set_var(VOICE, "   ");
        }
        assert_eq!(var(MODEL), Some("spaced".to_string()));
        assert_eq!(var(VOICE), None);
        unsafe {
            env::remove_var(MODEL);
            env::remove_var(VOICE);
        }
    }

    #[test]
    #[serial]
    fn test_parse_reports_variable() {
        unsafe {
            env::set_var(CAPTURE_BLOCK_MS, "twenty");
        }
        let err = parse::<u32>(CAPTURE_BLOCK_MS).unwrap_err();
        assert!(err.contains(CAPTURE_BLOCK_MS));
        unsafe {
            env::remove_var(CAPTURE_BLOCK_MS);
        }
        assert_eq!(parse::<u32>(CAPTURE_BLOCK_MS).unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_list() {
        unsafe {
            env::set_var(MODALITIES, "text, audio,");
        }
        assert_eq!(
            list(MODALITIES),
            Some(vec!["text".to_string(), "audio".to_string()])
        );
        unsafe {
            env::remove_var(MODALITIES);
        }
    }
}
