//! Configuration types for the voice session.

use crate::credentials::CredentialRef;
use crate::error::{Result, SessionError};
use crate::persona::DEFAULT_PERSONA;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Voice service connection settings.
    pub transport: TransportConfig,
    /// Persona instructions sent when the channel opens.
    pub persona: PersonaConfig,
    /// API key lookup and credential-error classification.
    pub credentials: CredentialConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of captured audio sent to the service, in Hz.
    pub input_sample_rate: u32,
    /// Sample rate of synthesized speech from the service, in Hz.
    pub output_sample_rate: u32,
    /// Samples per capture block.
    ///
    /// Larger blocks mean fewer, bigger packets: steadier on poor networks,
    /// at the cost of added latency (8192 samples is ~0.5s at 16kHz).
    pub capture_block_size: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            capture_block_size: 8192,
            input_device: None,
            output_device: None,
        }
    }
}

/// Response modality requested from the voice service. Replies are played
/// as speech, so audio is the only one accepted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    /// Synthesized speech.
    #[default]
    Audio,
}

impl ResponseModality {
    /// Wire name of the modality.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
        }
    }
}

/// Voice service connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint of the bidirectional streaming service.
    pub endpoint: String,
    /// Model identifier (without the `models/` prefix).
    pub model: String,
    /// Prebuilt voice used for synthesized replies.
    pub voice_name: String,
    /// Requested response modality.
    pub response_modality: ResponseModality,
    /// Capacity of the outbound message queue.
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_owned(),
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_owned(),
            voice_name: "Kore".to_owned(),
            response_modality: ResponseModality::Audio,
            outbound_queue: 32,
        }
    }
}

/// Persona configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// System instructions, passed through to the service unchanged.
    pub instructions: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_PERSONA.trim().to_owned(),
        }
    }
}

/// Credential lookup and error-classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Stored API key reference.
    pub api_key: CredentialRef,
    /// Environment variable consulted before the stored key.
    pub env_var: Option<String>,
    /// Case-insensitive fragments of a channel error that mean the key is
    /// missing or invalid.
    pub error_patterns: Vec<String>,
    /// HTTP handshake statuses that mean the key was rejected.
    pub error_statuses: Vec<u16>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            api_key: CredentialRef::None,
            env_var: Some("GEMINI_API_KEY".to_owned()),
            error_patterns: vec![
                "Requested entity was not found".to_owned(),
                "API key not valid".to_owned(),
                "API_KEY_INVALID".to_owned(),
                "PERMISSION_DENIED".to_owned(),
            ],
            error_statuses: vec![401, 403],
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voxlink/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("voxlink")
            .join("config.toml")
    }

    /// Check values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 {
            return Err(SessionError::Config("audio.input_sample_rate must be > 0".into()));
        }
        if self.audio.output_sample_rate == 0 {
            return Err(SessionError::Config("audio.output_sample_rate must be > 0".into()));
        }
        if self.audio.capture_block_size == 0 {
            return Err(SessionError::Config("audio.capture_block_size must be > 0".into()));
        }
        if self.transport.outbound_queue == 0 {
            return Err(SessionError::Config("transport.outbound_queue must be > 0".into()));
        }
        if self.transport.model.trim().is_empty() {
            return Err(SessionError::Config("transport.model must not be empty".into()));
        }
        url::Url::parse(&self.transport.endpoint)
            .map_err(|e| SessionError::Config(format!("transport.endpoint: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn text_modality_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transport]\nresponse_modality = \"text\"\n").unwrap();
        assert!(SessionConfig::from_file(&path).is_err());
    }

    #[test]
    fn default_config_is_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.audio.capture_block_size, 8192);
        assert_eq!(config.transport.voice_name, "Kore");
        assert_eq!(config.transport.response_modality, ResponseModality::Audio);
        assert!(!config.persona.instructions.is_empty());
        assert!(!config.credentials.api_key.is_set());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SessionConfig::default();
        config.audio.capture_block_size = 4096;
        config.transport.voice_name = "Puck".to_owned();
        config.credentials.api_key = CredentialRef::Keyring {
            service: "voxlink-credentials".to_owned(),
            account: "voice.api_key".to_owned(),
        };
        config.save_to_file(&path).unwrap();

        let loaded = SessionConfig::from_file(&path).unwrap();
        assert_eq!(loaded.audio.capture_block_size, 4096);
        assert_eq!(loaded.transport.voice_name, "Puck");
        assert_eq!(loaded.credentials.api_key, config.credentials.api_key);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\ninput_sample_rate = 8000\n").unwrap();

        let loaded = SessionConfig::from_file(&path).unwrap();
        assert_eq!(loaded.audio.input_sample_rate, 8000);
        assert_eq!(loaded.audio.output_sample_rate, 24_000);
        assert_eq!(loaded.transport.model, TransportConfig::default().model);
    }

    #[test]
    fn response_modality_uses_lowercase_names() {
        let parsed: TransportConfig =
            toml::from_str("response_modality = \"audio\"").unwrap();
        assert_eq!(parsed.response_modality, ResponseModality::Audio);
        assert_eq!(ResponseModality::Audio.as_wire(), "AUDIO");
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = SessionConfig::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            SessionConfig::from_file(&path),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_block_size() {
        let mut config = SessionConfig::default();
        config.audio.capture_block_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_endpoint() {
        let mut config = SessionConfig::default();
        config.transport.endpoint = "not a url".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = SessionConfig::default_config_path();
        assert!(path.ends_with("voxlink/config.toml"));
    }
}
