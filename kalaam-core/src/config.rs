use crate::error::{CoreError, Result};
use crate::model::DisplaySettings;
use crate::pcm::{SYNTHESIS_CHANNELS, SYNTHESIS_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable that overrides `provider.api_key`
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KalaamConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Defaults for users who have not saved their own display settings
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_voice_name")]
    pub voice_name: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_text_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_voice_name() -> String {
    "Zephyr".to_string()
}

const fn default_provider_timeout() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            tts_model: default_tts_model(),
            text_model: default_text_model(),
            voice_name: default_voice_name(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl ProviderConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_sample_rate")]
    pub synthesis_sample_rate: u32,
    #[serde(default = "default_channels")]
    pub synthesis_channels: u16,
    #[serde(default = "default_static_timeout")]
    pub static_timeout_secs: u64,
    /// Reject static responses whose content type cannot carry audio
    #[serde(default = "default_true")]
    pub validate_content_type: bool,
    /// Send recitations to the default sound card when one is available
    #[serde(default = "default_true")]
    pub audio_output: bool,
}

const fn default_progress_interval() -> u64 {
    100
}

const fn default_sample_rate() -> u32 {
    SYNTHESIS_SAMPLE_RATE
}

const fn default_channels() -> u16 {
    SYNTHESIS_CHANNELS
}

const fn default_static_timeout() -> u64 {
    crate::loader::DEFAULT_STATIC_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval(),
            synthesis_sample_rate: default_sample_rate(),
            synthesis_channels: default_channels(),
            static_timeout_secs: default_static_timeout(),
            validate_content_type: true,
            audio_output: true,
        }
    }
}

impl PlaybackConfig {
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    #[must_use]
    pub const fn static_timeout(&self) -> Duration {
        Duration::from_secs(self.static_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Library database location; defaults to the config directory
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::paths::library_db_path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to `kalaam.log` in the config directory
    #[serde(default)]
    pub enabled: bool,
}

impl KalaamConfig {
    /// Get the configuration directory path (~/.config/kalaam/)
    #[must_use]
    pub fn config_dir() -> PathBuf {
        crate::paths::config_dir()
    }

    /// Get the config file path (~/.config/kalaam/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from the default location or create a template on first run
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` after writing the template, or an error if the
    /// file cannot be read, parsed or validated.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::config_path())
    }

    /// Load config from `path` or create a template there
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` after writing the template, or an error if the
    /// file cannot be read, parsed or validated.
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, CONFIG_TEMPLATE)?;

            return Err(CoreError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        Self::load_from(path)
    }

    /// Load and validate an existing config file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Parse and validate TOML content
    ///
    /// # Errors
    ///
    /// Returns `ConfigParseError` for malformed TOML and `ConfigInvalid` for
    /// values outside their allowed range.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the file's API key with a non-blank override
    pub fn apply_env_overrides(&mut self, api_key: Option<String>) {
        if let Some(key) = api_key.filter(|key| !key.trim().is_empty()) {
            debug!("Using API key from {}", API_KEY_ENV);
            self.provider.api_key = key.trim().to_string();
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(CoreError::ConfigInvalid {
                message: message.to_string(),
            })
        };

        if self.playback.progress_interval_ms == 0 {
            return invalid("playback.progress_interval_ms must be greater than 0");
        }
        if self.playback.synthesis_sample_rate == 0 {
            return invalid("playback.synthesis_sample_rate must be greater than 0");
        }
        if self.playback.synthesis_channels == 0 {
            return invalid("playback.synthesis_channels must be greater than 0");
        }
        if self.display.font_size == 0 {
            return invalid("display.font_size must be greater than 0");
        }
        Ok(())
    }

    /// Fields that must be filled in before the provider can be used
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.provider.api_key.trim().is_empty() {
            missing.push("provider.api_key");
        }
        if self.provider.base_url.trim().is_empty() {
            missing.push("provider.base_url");
        }
        missing
    }

    /// Provider settings, if every required field is present
    ///
    /// # Errors
    ///
    /// Returns `ConfigMissingField` naming the first missing field.
    pub fn require_provider(&self) -> Result<&ProviderConfig> {
        match self.missing_fields().first() {
            Some(field) => Err(CoreError::ConfigMissingField {
                field: (*field).to_string(),
            }),
            None => Ok(&self.provider),
        }
    }
}

const CONFIG_TEMPLATE: &str = r##"# Kalaam Configuration
# ~/.config/kalaam/config.toml

[provider]
# Required for recitation and interpretation. GEMINI_API_KEY overrides this value.
api_key = ""
base_url = "https://generativelanguage.googleapis.com/v1beta"
tts_model = "gemini-2.5-flash-preview-tts"
text_model = "gemini-3-flash-preview"
voice_name = "Zephyr"
timeout_secs = 60

[playback]
progress_interval_ms = 100
# Format of synthesized speech: 16-bit little-endian PCM
synthesis_sample_rate = 24000
synthesis_channels = 1
static_timeout_secs = 20
validate_content_type = true
# Play through the default sound card; false only shows progress
audio_output = true

[display]
# Defaults for readers without saved settings
background_color = "#F5F5DC"
text_color = "#1A0F0D"
font_size = 24
line_height = 2.5

[storage]
# database_path = "/path/to/library.db"

[logging]
# Also write logs to kalaam.log next to this file
enabled = false
"##;
