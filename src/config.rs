use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub recognition: RecognitionConfig,
    pub translation: TranslationConfig,
    pub suggestion: SuggestionConfig,
    pub server: ServerConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Name substring of the loopback/virtual-cable recording device.
    /// `None` selects the host's default input device.
    pub loopback_device: Option<String>,
    /// Name substring of the microphone device. Optional; capture degrades
    /// to loopback-only when it cannot be resolved.
    pub mic_device: Option<String>,
    /// Preferred low-latency host API (e.g. "wasapi", "jack"). `None` uses
    /// the platform default host.
    pub host_api: Option<String>,
    pub sample_rate: u32,
}

/// Streaming recognition service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub endpoint: String,
    /// API key; usually supplied via `PARLEY_RECOGNITION_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    pub language: String,
    /// Request per-word speaker attribution from the service.
    pub diarize: bool,
    /// Milliseconds of trailing silence before the service emits an
    /// utterance-end marker.
    pub utterance_end_ms: u32,
}

/// Translation service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslationConfig {
    pub endpoint: String,
    /// API key; usually supplied via `PARLEY_TRANSLATION_KEY`.
    pub api_key: Option<String>,
    pub target_lang: String,
}

/// Reply suggestion service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuggestionConfig {
    pub endpoint: String,
    /// API key; usually supplied via `PARLEY_SUGGESTION_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Push channel server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to open a push channel connection.
    pub allowed_origins: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            loopback_device: Some("CABLE Output".to_string()),
            mic_device: None,
            host_api: None,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
            api_key: None,
            model: "nova-2".to_string(),
            language: "en".to_string(),
            diarize: true,
            utterance_end_ms: 1000,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api-free.deepl.com/v2/translate".to_string(),
            api_key: None,
            target_lang: "EN-US".to_string(),
        }
    }
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 150,
            temperature: 0.7,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PARLEY_RECOGNITION_KEY → recognition.api_key
    /// - PARLEY_TRANSLATION_KEY → translation.api_key
    /// - PARLEY_SUGGESTION_KEY → suggestion.api_key
    /// - PARLEY_LOOPBACK_DEVICE → audio.loopback_device
    /// - PARLEY_MIC_DEVICE → audio.mic_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("PARLEY_RECOGNITION_KEY")
            && !key.is_empty()
        {
            self.recognition.api_key = Some(key);
        }

        if let Ok(key) = std::env::var("PARLEY_TRANSLATION_KEY")
            && !key.is_empty()
        {
            self.translation.api_key = Some(key);
        }

        if let Ok(key) = std::env::var("PARLEY_SUGGESTION_KEY")
            && !key.is_empty()
        {
            self.suggestion.api_key = Some(key);
        }

        if let Ok(device) = std::env::var("PARLEY_LOOPBACK_DEVICE")
            && !device.is_empty()
        {
            self.audio.loopback_device = Some(device);
        }

        if let Ok(device) = std::env::var("PARLEY_MIC_DEVICE")
            && !device.is_empty()
        {
            self.audio.mic_device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/parley/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
            .join("config.toml")
    }
}
