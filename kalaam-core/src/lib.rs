pub mod config;
pub mod error;
pub mod loader;
pub mod model;
#[cfg(feature = "audio-output")]
pub mod output;
pub mod paths;
pub mod pcm;
pub mod playable;
pub mod playback;
pub mod provider;
pub mod resolver;
pub mod seed;
pub mod store;
pub mod time;
pub mod view;

pub use config::{
    KalaamConfig, LoggingConfig, PlaybackConfig, ProviderConfig, StorageConfig, API_KEY_ENV,
};

/// Re-export toml error type for config parsing error handling
pub use toml::de::Error as TomlParseError;
pub use error::{CoreError, Result};
pub use loader::{HttpAudioLoader, StaticAudioLoader};
pub use model::{
    Category, Couplet, DisplaySettings, GlobalSettings, Lyric, NewLyric, NewUser, ProfileUpdate,
    SubCategory, User, UserRole,
};
pub use paths::{
    config_dir, config_path, library_db_path, log_file_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    LIBRARY_DB_FILE_NAME, LOG_FILE_NAME,
};
pub use pcm::{decode_base64_pcm, decode_pcm16le, DecodedAudio};
pub use playable::{AudibleTrack, AudioSink, Playable, SourceKind};
#[cfg(feature = "audio-output")]
pub use output::DeviceSink;
pub use playback::{
    PlaybackController, PlaybackEvent, PlaybackSnapshot, PlaybackStatus, SessionTicket,
};
pub use provider::{Interpreter, SpeechSynthesizer, SynthesizedSpeech};
pub use resolver::{PlayOutcome, Reciter, ToggleOutcome};
pub use store::{ContentRepository, LibraryStore};
pub use time::DurationExt;
pub use view::{LyricView, INTERPRETATION_FAILED};
