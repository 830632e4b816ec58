use serde::Deserialize;
use std::path::Path;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// provider:
///   api_key: "sk-..."
///   endpoint: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview"
///
/// session:
///   voice: "alloy"
///   instructions: "You are a concise assistant."
///   turn_mode: "manual"
///   transcription_model: "whisper-1"
///   modalities: ["text", "audio"]
///   tool_choice: "auto"
///   temperature: 0.8
///   transcript_retention: "retain"
///
/// audio:
///   capture_sample_rate: 24000
///   capture_block_ms: 20
///   playback_block_ms: 50
///
/// timeouts:
///   tool_seconds: 30
///   shutdown_ms: 2000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub provider: Option<ProviderYaml>,
    pub session: Option<SessionYaml>,
    pub audio: Option<AudioYaml>,
    pub timeouts: Option<TimeoutsYaml>,
}

/// Remote service connection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderYaml {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub channel_capacity: Option<usize>,
}

/// Requested session configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub voice: Option<String>,
    pub instructions: Option<String>,
    /// "server_vad" or "manual"
    pub turn_mode: Option<String>,
    /// Empty string or "none" disables input transcription
    pub transcription_model: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub tool_choice: Option<String>,
    pub temperature: Option<f32>,
    /// "discard" or "retain"
    pub transcript_retention: Option<String>,
}

/// Audio device settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub capture_sample_rate: Option<u32>,
    pub capture_block_ms: Option<u32>,
    pub playback_block_ms: Option<u32>,
}

/// Bounded waits from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutsYaml {
    pub tool_seconds: Option<u64>,
    pub shutdown_ms: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
provider:
  api_key: "sk-test"
  endpoint: "wss://example.com/v1/realtime"
  model: "custom-model"
  channel_capacity: 64

session:
  voice: "verse"
  instructions: "Be brief."
  turn_mode: "manual"
  transcription_model: "none"
  modalities: ["text"]
  tool_choice: "required"
  temperature: 0.6
  transcript_retention: "retain"

audio:
  capture_sample_rate: 16000
  capture_block_ms: 40
  playback_block_ms: 100

timeouts:
  tool_seconds: 5
  shutdown_ms: 500
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let provider = config.provider.unwrap();
        assert_eq!(provider.api_key, Some("sk-test".to_string()));
        assert_eq!(provider.model, Some("custom-model".to_string()));
        assert_eq!(provider.channel_capacity, Some(64));

        let session = config.session.unwrap();
        assert_eq!(session.voice, Some("verse".to_string()));
        assert_eq!(session.turn_mode, Some("manual".to_string()));
        assert_eq!(session.modalities, Some(vec!["text".to_string()]));
        assert_eq!(session.temperature, Some(0.6));

        let audio = config.audio.unwrap();
        assert_eq!(audio.capture_sample_rate, Some(16000));
        assert_eq!(audio.playback_block_ms, Some(100));

        let timeouts = config.timeouts.unwrap();
        assert_eq!(timeouts.tool_seconds, Some(5));
        assert_eq!(timeouts.shutdown_ms, Some(500));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
session:
  voice: "echo"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.provider.is_none());
        assert!(config.audio.is_none());
        let session = config.session.unwrap();
        assert_eq!(session.voice, Some("echo".to_string()));
        assert!(session.turn_mode.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();

        assert!(config.provider.is_none());
        assert!(config.session.is_none());
        assert!(config.audio.is_none());
        assert!(config.timeouts.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(
            &config_path,
            r#"
provider:
  model: "file-model"
"#,
        )
        .unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.provider.as_ref().unwrap().model,
            Some("file-model".to_string())
        );
    }

    #[test]
    fn test_from_file_not_found() {
        let path = Path::new("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
