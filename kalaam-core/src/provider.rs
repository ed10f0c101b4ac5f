use crate::error::CoreError;
use async_trait::async_trait;

/// Audio returned by a [`SpeechSynthesizer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedSpeech {
    /// Base64 text wrapping 16-bit little-endian PCM
    pub data: String,
    /// MIME type reported by the provider, e.g. `audio/L16;codec=pcm;rate=24000`
    pub mime_type: Option<String>,
}

impl SynthesizedSpeech {
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: None,
        }
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sample rate from the `rate=` MIME parameter
    #[must_use]
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_param("rate")?.parse().ok().filter(|rate| *rate > 0)
    }

    /// Channel count from the `channels=` MIME parameter
    #[must_use]
    pub fn channels(&self) -> Option<u16> {
        self.mime_param("channels")?
            .parse()
            .ok()
            .filter(|channels| *channels > 0)
    }

    fn mime_param(&self, name: &str) -> Option<&str> {
        self.mime_type.as_deref()?.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().trim_matches('"'))
        })
    }
}

/// Remote text-to-speech generation
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Synthesize a recitation of `text`.
    ///
    /// Without format parameters in the MIME type the payload is read as
    /// [`SYNTHESIS_SAMPLE_RATE`](crate::pcm::SYNTHESIS_SAMPLE_RATE), mono.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech, CoreError>;
}

/// Remote text-to-text explanation of verses
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Explain the spiritual meaning and difficult words of `text`
    async fn interpret(&self, text: &str) -> Result<String, CoreError>;
}
