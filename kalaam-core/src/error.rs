use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error(
        "Config file not found at {path}. A template has been created - \
         please edit it with your Gemini API key and restart."
    )]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Playback errors
    #[error("Failed to decode audio: {reason}")]
    Decode { reason: String },

    #[error("Failed to fetch static audio from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Speech synthesis via {provider} failed: {reason}")]
    Synthesis { provider: String, reason: String },

    #[error("Provider {provider} returned no audio")]
    ProviderEmptyResponse { provider: String },

    #[error("Audio output unavailable: {reason}")]
    AudioOutput { reason: String },

    #[error("Interpretation via {provider} failed: {reason}")]
    Interpretation { provider: String, reason: String },

    // Library errors
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Registration is closed")]
    SignupDisabled,

    #[error("Login is currently disabled")]
    LoginDisabled,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    // Store errors
    #[error("Store database error: {0}")]
    StoreError(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    // Network errors
    #[error("Network request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Network middleware failed: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Build a `Decode` error from anything displayable.
    pub fn decode(reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            reason: reason.to_string(),
        }
    }

    /// Build a `Fetch` error for a static audio URL.
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an `AudioOutput` error from anything displayable.
    pub fn audio_output(reason: impl std::fmt::Display) -> Self {
        Self::AudioOutput {
            reason: reason.to_string(),
        }
    }

    /// Build a `NotFound` error for a record kind and id.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
