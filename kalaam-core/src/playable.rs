//! Playable handles for recitation audio.
//!
//! Static recordings and synthesized speech are played through the same
//! [`Playable`] interface so the controller never branches on where the
//! audio came from.

use crate::pcm::DecodedAudio;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Where the audio of a session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Pre-recorded file referenced by the lyric
    Static,
    /// Speech generated by the provider from the lyric text
    Synthesized,
}

impl SourceKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Synthesized => "synthesized",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handle the playback controller can drive.
pub trait Playable: Send {
    /// Source of the underlying audio
    fn kind(&self) -> SourceKind;

    /// Start or resume playback
    fn play(&mut self);

    /// Pause, keeping the current position
    fn pause(&mut self);

    /// Stop and rewind. A stopped handle never reports an ended state.
    fn stop(&mut self);

    /// Position within the audio, never beyond `duration()`
    fn current_time(&self) -> Duration;

    /// Total length of the audio
    fn duration(&self) -> Duration;

    /// Whether playback reached the end on its own
    fn has_ended(&self) -> bool;

    /// Decoded samples backing this handle
    fn audio(&self) -> &DecodedAudio;
}

/// Monotonic play/pause clock shared by every handle variant.
#[derive(Debug, Clone)]
pub struct Transport {
    duration: Duration,
    started_at: Option<Instant>,
    offset: Duration,
    stopped: bool,
}

impl Transport {
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self {
            duration,
            started_at: None,
            offset: Duration::ZERO,
            stopped: false,
        }
    }

    pub fn play(&mut self) {
        if self.started_at.is_none() {
            self.stopped = false;
            self.started_at = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.offset += started.elapsed();
        }
    }

    pub fn stop(&mut self) {
        self.started_at = None;
        self.offset = Duration::ZERO;
        self.stopped = true;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    #[must_use]
    pub fn current_time(&self) -> Duration {
        let running = self.started_at.map_or(Duration::ZERO, |s| s.elapsed());
        (self.offset + running).min(self.duration)
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn has_ended(&self) -> bool {
        !self.stopped && self.current_time() >= self.duration
    }
}

/// Recording loaded from the lyric's audio URL.
#[derive(Debug)]
pub struct StaticTrack {
    url: String,
    audio: DecodedAudio,
    transport: Transport,
}

impl StaticTrack {
    #[must_use]
    pub fn new(url: impl Into<String>, audio: DecodedAudio) -> Self {
        let transport = Transport::new(audio.duration());
        Self {
            url: url.into(),
            audio,
            transport,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Playable for StaticTrack {
    fn kind(&self) -> SourceKind {
        SourceKind::Static
    }

    fn play(&mut self) {
        self.transport.play();
    }

    fn pause(&mut self) {
        self.transport.pause();
    }

    fn stop(&mut self) {
        self.transport.stop();
    }

    fn current_time(&self) -> Duration {
        self.transport.current_time()
    }

    fn duration(&self) -> Duration {
        self.transport.duration()
    }

    fn has_ended(&self) -> bool {
        self.transport.has_ended()
    }

    fn audio(&self) -> &DecodedAudio {
        &self.audio
    }
}

/// Speech decoded from a provider payload.
#[derive(Debug)]
pub struct SynthesizedTrack {
    audio: DecodedAudio,
    transport: Transport,
}

impl SynthesizedTrack {
    #[must_use]
    pub fn new(audio: DecodedAudio) -> Self {
        let transport = Transport::new(audio.duration());
        Self { audio, transport }
    }
}

impl Playable for SynthesizedTrack {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthesized
    }

    fn play(&mut self) {
        self.transport.play();
    }

    fn pause(&mut self) {
        self.transport.pause();
    }

    fn stop(&mut self) {
        self.transport.stop();
    }

    fn current_time(&self) -> Duration {
        self.transport.current_time()
    }

    fn duration(&self) -> Duration {
        self.transport.duration()
    }

    fn has_ended(&self) -> bool {
        self.transport.has_ended()
    }

    fn audio(&self) -> &DecodedAudio {
        &self.audio
    }
}

/// Destination for the samples of a playing handle, usually a sound card.
///
/// Each `start` opens a new stream and replaces whatever was queued. Calls
/// naming an older stream are ignored.
pub trait AudioSink: Send + Sync {
    /// Output format as `(sample_rate, channels)`
    fn format(&self) -> (u32, u16);

    /// Queue `samples`, interleaved in [`format`](Self::format), and return the stream id
    fn start(&self, samples: Vec<f32>) -> u64;

    fn pause(&self, stream: u64);

    fn resume(&self, stream: u64);

    /// Drop everything still queued for `stream`
    fn stop(&self, stream: u64);
}

/// Handle that sends its audio to an [`AudioSink`] while the wrapped
/// handle keeps time.
pub struct AudibleTrack {
    inner: Box<dyn Playable>,
    sink: Arc<dyn AudioSink>,
    stream: Option<u64>,
}

impl AudibleTrack {
    #[must_use]
    pub fn new(inner: Box<dyn Playable>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            inner,
            sink,
            stream: None,
        }
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.sink.stop(stream);
        }
    }
}

impl Playable for AudibleTrack {
    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    fn play(&mut self) {
        match self.stream {
            Some(stream) => self.sink.resume(stream),
            None => {
                let (sample_rate, channels) = self.sink.format();
                let samples = self.inner.audio().render(sample_rate, channels);
                self.stream = Some(self.sink.start(samples));
            }
        }
        self.inner.play();
    }

    fn pause(&mut self) {
        if let Some(stream) = self.stream {
            self.sink.pause(stream);
        }
        self.inner.pause();
    }

    fn stop(&mut self) {
        self.release();
        self.inner.stop();
    }

    fn current_time(&self) -> Duration {
        self.inner.current_time()
    }

    fn duration(&self) -> Duration {
        self.inner.duration()
    }

    fn has_ended(&self) -> bool {
        self.inner.has_ended()
    }

    fn audio(&self) -> &DecodedAudio {
        self.inner.audio()
    }
}

impl Drop for AudibleTrack {
    fn drop(&mut self) {
        self.release();
    }
}
