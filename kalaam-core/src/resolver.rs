//! Source resolution for recitations.
//!
//! The recorded file referenced by a lyric is tried first. If there is none,
//! or it cannot be loaded, the lyric text is synthesized instead. The fallback
//! hop happens inside a single Buffering phase, so observers only see
//! `Buffering -> Playing` either way. A synthesis failure ends the attempt.

use crate::error::{CoreError, Result};
use crate::loader::StaticAudioLoader;
use crate::model::Lyric;
use crate::pcm::{decode_base64_pcm, SYNTHESIS_CHANNELS, SYNTHESIS_SAMPLE_RATE};
use crate::playable::{
    AudibleTrack, AudioSink, Playable, SourceKind, StaticTrack, SynthesizedTrack,
};
use crate::playback::{PlaybackController, PlaybackStatus};
use crate::provider::SpeechSynthesizer;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a play request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Audio is playing from the given source
    Playing(SourceKind),
    /// A newer request or a stop arrived while this one was buffering
    Superseded,
}

/// Result of a toggle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Stopped,
    Play(PlayOutcome),
}

/// Resolves a lyric to playable audio and hands it to the controller.
pub struct Reciter {
    controller: Arc<PlaybackController>,
    loader: Arc<dyn StaticAudioLoader>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Option<Arc<dyn AudioSink>>,
    sample_rate: u32,
    channels: u16,
}

impl Reciter {
    pub fn new(
        controller: Arc<PlaybackController>,
        loader: Arc<dyn StaticAudioLoader>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            controller,
            loader,
            synthesizer,
            output: None,
            sample_rate: SYNTHESIS_SAMPLE_RATE,
            channels: SYNTHESIS_CHANNELS,
        }
    }

    /// Override the PCM format expected from the synthesizer.
    #[must_use]
    pub const fn with_synthesis_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    /// Play recitations through `sink` instead of only keeping time.
    #[must_use]
    pub fn with_output(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.output = Some(sink);
        self
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    /// Play a recitation of `lyric`, replacing whatever is playing.
    ///
    /// # Errors
    ///
    /// Returns the synthesis or decode error when no audio could be produced.
    /// The controller is back to Idle in that case and `play` may be retried.
    pub async fn play(&self, lyric: &Lyric) -> Result<PlayOutcome> {
        let ticket = self.controller.begin(&lyric.id).await;
        if !self.controller.is_current(&ticket).await {
            info!("Play request for {} refused by a closed controller", lyric.id);
            return Ok(PlayOutcome::Superseded);
        }

        let handle = match self.resolve(lyric).await {
            Ok(handle) => handle,
            Err(e) => {
                self.controller.fail(&ticket, &e).await;
                return Err(e);
            }
        };
        let handle: Box<dyn Playable> = match &self.output {
            Some(sink) => Box::new(AudibleTrack::new(handle, Arc::clone(sink))),
            None => handle,
        };

        let kind = handle.kind();
        if self.controller.start(&ticket, handle).await {
            Ok(PlayOutcome::Playing(kind))
        } else {
            info!("Play request for {} was superseded", lyric.id);
            Ok(PlayOutcome::Superseded)
        }
    }

    /// Stop if something is playing or buffering, otherwise play `lyric`.
    ///
    /// # Errors
    ///
    /// Returns an error when starting playback fails.
    pub async fn toggle(&self, lyric: &Lyric) -> Result<ToggleOutcome> {
        if self.controller.status().await == PlaybackStatus::Idle {
            self.play(lyric).await.map(ToggleOutcome::Play)
        } else {
            self.controller.stop().await;
            Ok(ToggleOutcome::Stopped)
        }
    }

    /// Stop the current recitation. No-op when idle.
    pub async fn stop(&self) -> bool {
        self.controller.stop().await
    }

    /// Produce a ready-to-play handle for `lyric` without touching the controller.
    ///
    /// # Errors
    ///
    /// Returns an error when the synthesis fallback fails.
    pub async fn resolve(&self, lyric: &Lyric) -> Result<Box<dyn Playable>> {
        if let Some(url) = lyric.static_audio() {
            match self.loader.load(url).await {
                Ok(audio) => {
                    info!("Using static recitation for {}", lyric.id);
                    return Ok(Box::new(StaticTrack::new(url, audio)));
                }
                Err(e) => {
                    warn!(
                        "Static recitation for {} unavailable, falling back to {}: {}",
                        lyric.id,
                        self.synthesizer.name(),
                        e
                    );
                }
            }
        }

        self.synthesize(lyric).await
    }

    async fn synthesize(&self, lyric: &Lyric) -> Result<Box<dyn Playable>> {
        info!(
            "Synthesizing recitation for {} via {}",
            lyric.id,
            self.synthesizer.name()
        );

        let speech = self.synthesizer.synthesize(&lyric.content).await?;
        if speech.data.trim().is_empty() {
            return Err(CoreError::ProviderEmptyResponse {
                provider: self.synthesizer.name().to_string(),
            });
        }

        // A format announced by the provider wins over the configured one
        let sample_rate = speech.sample_rate().unwrap_or(self.sample_rate);
        let channels = speech.channels().unwrap_or(self.channels);
        if sample_rate != self.sample_rate || channels != self.channels {
            debug!(
                "Provider reported {} Hz x{} instead of the configured {} Hz x{}",
                sample_rate, channels, self.sample_rate, self.channels
            );
        }

        let audio = decode_base64_pcm(&speech.data, sample_rate, channels)?;
        Ok(Box::new(SynthesizedTrack::new(audio)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::DecodedAudio;
    use crate::playback::{PlaybackEvent, DEFAULT_PROGRESS_INTERVAL};
    use crate::playable::tests::RecordingSink;
    use crate::provider::SynthesizedSpeech;
    use async_trait::async_trait;
    use base64::{engine::general_purpose, Engine as _};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct FakeLoader {
        result: Option<DecodedAudio>,
        calls: AtomicUsize,
    }

    impl FakeLoader {
        fn ok(secs: usize) -> Arc<Self> {
            Arc::new(Self {
                result: Some(
                    DecodedAudio::from_channels(1000, vec![vec![0.0; secs * 1000]]).unwrap(),
                ),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StaticAudioLoader for FakeLoader {
        async fn load(&self, url: &str) -> Result<DecodedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .ok_or_else(|| CoreError::fetch(url, "connection refused"))
        }
    }

    enum Reply {
        Seconds(usize),
        AtRate { secs: usize, rate: usize },
        Empty,
        Fail,
    }

    struct FakeSynth {
        reply: Reply,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeSynth {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(reply: Reply, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn synthesize(&self, _text: &str) -> Result<SynthesizedSpeech> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.reply {
                Reply::Seconds(secs) => {
                    let bytes = vec![0u8; secs * 24_000 * 2];
                    Ok(SynthesizedSpeech::new(general_purpose::STANDARD.encode(bytes)))
                }
                Reply::AtRate { secs, rate } => {
                    let bytes = vec![0u8; secs * rate * 2];
                    Ok(SynthesizedSpeech::new(general_purpose::STANDARD.encode(bytes))
                        .with_mime_type(format!("audio/L16;codec=pcm;rate={rate}")))
                }
                Reply::Empty => Ok(SynthesizedSpeech::new("")),
                Reply::Fail => Err(CoreError::Synthesis {
                    provider: "fake".to_string(),
                    reason: "quota exceeded".to_string(),
                }),
            }
        }
    }

    fn lyric(id: &str, audio_url: Option<&str>) -> Lyric {
        Lyric {
            id: id.to_string(),
            user_id: None,
            sub_category_id: "s1".to_string(),
            title: "title".to_string(),
            content: "line1\nline2".to_string(),
            serial: 1,
            audio_url: audio_url.map(str::to_string),
        }
    }

    fn reciter(loader: Arc<FakeLoader>, synth: Arc<FakeSynth>) -> Reciter {
        Reciter::new(
            PlaybackController::new(DEFAULT_PROGRESS_INTERVAL),
            loader,
            synth,
        )
    }

    fn lifecycle(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !matches!(event, PlaybackEvent::Progress { .. }) {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_reference_plays_directly() {
        let loader = FakeLoader::ok(3);
        let synth = FakeSynth::new(Reply::Seconds(2));
        let reciter = reciter(loader.clone(), synth.clone());

        let outcome = reciter.play(&lyric("l1", Some("https://a/b.mp3"))).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing(SourceKind::Static));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_static_reference_falls_back_silently() {
        let loader = FakeLoader::failing();
        let synth = FakeSynth::new(Reply::Seconds(2));
        let reciter = reciter(loader.clone(), synth.clone());
        let mut rx = reciter.controller().subscribe();

        let outcome = reciter.play(&lyric("l1", Some("https://a/b.mp3"))).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing(SourceKind::Synthesized));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);

        let events = lifecycle(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PlaybackEvent::Buffering { .. }));
        assert!(matches!(
            events[1],
            PlaybackEvent::Started { kind: SourceKind::Synthesized, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_static_reference_goes_straight_to_synthesis() {
        let loader = FakeLoader::ok(3);
        let synth = FakeSynth::new(Reply::Seconds(2));
        let reciter = reciter(loader.clone(), synth.clone());

        let outcome = reciter.play(&lyric("l1", None)).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing(SourceKind::Synthesized));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);

        reciter.play(&lyric("l1", Some(""))).await.unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_failure_is_terminal() {
        let synth = FakeSynth::new(Reply::Fail);
        let reciter = reciter(FakeLoader::failing(), synth.clone());
        let mut rx = reciter.controller().subscribe();

        let err = reciter.play(&lyric("l1", Some("https://a/b.mp3"))).await.unwrap_err();
        assert!(matches!(err, CoreError::Synthesis { .. }));
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reciter.controller().status().await, PlaybackStatus::Idle);

        let events = lifecycle(&mut rx);
        assert!(matches!(events.last(), Some(PlaybackEvent::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_is_terminal() {
        let reciter = reciter(FakeLoader::failing(), FakeSynth::new(Reply::Empty));

        let err = reciter.play(&lyric("l1", None)).await.unwrap_err();
        assert!(matches!(err, CoreError::ProviderEmptyResponse { .. }));
        assert_eq!(reciter.controller().status().await, PlaybackStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_synthesis_result_is_discarded() {
        let synth = FakeSynth::slow(Reply::Seconds(2), Duration::from_secs(1));
        let reciter = Arc::new(reciter(FakeLoader::failing(), synth));

        let background = {
            let reciter = Arc::clone(&reciter);
            tokio::spawn(async move { reciter.play(&lyric("l1", None)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reciter.controller().status().await, PlaybackStatus::Buffering);

        // The user stops while the provider is still working
        assert!(reciter.stop().await);
        let outcome = background.await.unwrap().unwrap();
        assert_eq!(outcome, PlayOutcome::Superseded);
        assert_eq!(reciter.controller().status().await, PlaybackStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_stops_then_plays() {
        let reciter = reciter(FakeLoader::failing(), FakeSynth::new(Reply::Seconds(5)));
        let l = lyric("l1", None);

        let first = reciter.toggle(&l).await.unwrap();
        assert_eq!(
            first,
            ToggleOutcome::Play(PlayOutcome::Playing(SourceKind::Synthesized))
        );
        assert_eq!(reciter.toggle(&l).await.unwrap(), ToggleOutcome::Stopped);
        assert_eq!(reciter.controller().status().await, PlaybackStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_two_second_recitation() {
        let reciter = reciter(FakeLoader::failing(), FakeSynth::new(Reply::Seconds(2)));
        let mut rx = reciter.controller().subscribe();

        reciter.play(&lyric("l1", None)).await.unwrap();
        let playing = reciter.controller().snapshot().await;
        assert_eq!(playing.duration, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let halfway = reciter.controller().snapshot().await;
        assert_eq!(halfway.status, PlaybackStatus::Playing);
        assert!((halfway.progress - 0.5).abs() < 0.06, "progress {}", halfway.progress);

        tokio::time::sleep(Duration::from_millis(1050)).await;
        let done = reciter.controller().snapshot().await;
        assert_eq!(done.status, PlaybackStatus::Idle);
        assert!(done.progress.abs() < f64::EPSILON);

        let events = lifecycle(&mut rx);
        assert!(matches!(events.last(), Some(PlaybackEvent::Ended { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_sample_rate_overrides_configured_rate() {
        let reciter = reciter(
            FakeLoader::failing(),
            FakeSynth::new(Reply::AtRate {
                secs: 3,
                rate: 16_000,
            }),
        );

        let handle = reciter.resolve(&lyric("l1", None)).await.unwrap();
        assert_eq!(handle.audio().sample_rate(), 16_000);
        assert_eq!(handle.duration(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_sink_receives_recitation_until_end() {
        let sink = Arc::new(RecordingSink::default());
        let reciter = reciter(FakeLoader::ok(1), FakeSynth::new(Reply::Fail))
            .with_output(Arc::clone(&sink) as Arc<dyn AudioSink>);

        let outcome = reciter.play(&lyric("l1", Some("https://a/x.mp3"))).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing(SourceKind::Static));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(reciter.controller().status().await, PlaybackStatus::Idle);
        // 1 s at 1 kHz mono, rendered as 2 kHz stereo
        assert_eq!(sink.calls(), vec!["start:1:4000", "stop:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_silences_output_sink() {
        let sink = Arc::new(RecordingSink::default());
        let reciter = reciter(FakeLoader::failing(), FakeSynth::new(Reply::Seconds(5)))
            .with_output(Arc::clone(&sink) as Arc<dyn AudioSink>);

        reciter.play(&lyric("l1", None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(reciter.stop().await);
        assert_eq!(sink.calls().last().map(String::as_str), Some("stop:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_controller_skips_synthesis() {
        let synth = FakeSynth::new(Reply::Seconds(1));
        let reciter = reciter(FakeLoader::failing(), Arc::clone(&synth));
        reciter.controller().dispose().await;

        let outcome = reciter.play(&lyric("l1", None)).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Superseded);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reciter.controller().status().await, PlaybackStatus::Idle);
    }
}
