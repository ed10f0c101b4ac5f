//! Loading of pre-recorded recitations referenced by a lyric's audio URL.
//!
//! A URL is only considered playable once its body has been fetched,
//! its content type accepted, and its container decoded. Any failure along
//! the way is reported as an error so the resolver can fall back to
//! synthesis.

use crate::error::{CoreError, Result};
use crate::pcm::DecodedAudio;
use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info};

/// Default timeout for static audio requests (20 seconds)
pub const DEFAULT_STATIC_TIMEOUT_SECS: u64 = 20;

/// Fetches and decodes a static recitation
#[async_trait]
pub trait StaticAudioLoader: Send + Sync {
    /// Load the audio at `url`
    async fn load(&self, url: &str) -> Result<DecodedAudio>;
}

/// HTTP loader backed by reqwest and symphonia
pub struct HttpAudioLoader {
    client: reqwest::Client,
    validate_content_type: bool,
}

impl HttpAudioLoader {
    /// Create a loader with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(timeout: Duration, validate_content_type: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent("Kalaam/1.0")
            .build()?;

        Ok(Self {
            client,
            validate_content_type,
        })
    }
}

#[async_trait]
impl StaticAudioLoader for HttpAudioLoader {
    async fn load(&self, url: &str) -> Result<DecodedAudio> {
        info!("Fetching static recitation: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::fetch(url, format!("server returned {status}")));
        }

        if self.validate_content_type {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            if let Some(content_type) = content_type {
                if !is_audio_content_type(content_type) {
                    return Err(CoreError::fetch(
                        url,
                        format!("unexpected content type {content_type}"),
                    ));
                }
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::fetch(url, e))?;
        if bytes.is_empty() {
            return Err(CoreError::fetch(url, "empty response body"));
        }
        debug!("Fetched {} bytes from {}", bytes.len(), url);

        let hint = extension_hint(url);
        tokio::task::spawn_blocking(move || decode_encoded_audio(bytes.to_vec(), hint.as_deref()))
            .await
            .map_err(|e| CoreError::decode(format!("decoder task failed: {e}")))?
    }
}

/// Whether a `Content-Type` header value can carry an audio file.
#[must_use]
pub fn is_audio_content_type(value: &str) -> bool {
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime.starts_with("audio/") || mime == "application/octet-stream" || mime == "application/ogg"
}

/// File extension of the URL path, used as a container hint.
fn extension_hint(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5).then(|| ext.to_ascii_lowercase())
}

/// Decode a complete encoded audio file (MP3, WAV, OGG, FLAC, AAC) into samples.
///
/// # Errors
///
/// Returns `Decode` if the container is not recognized, holds no audio
/// track, or yields no frames.
pub fn decode_encoded_audio(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(
        Box::new(Cursor::new(bytes)),
        MediaSourceStreamOptions::default(),
    );

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| CoreError::decode(format!("unrecognized audio container: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| CoreError::decode("no audio track found"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| CoreError::decode(format!("unsupported codec: {e}")))?;

    let mut planes: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(CoreError::decode(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let channels = spec.channels.count();
                if channels == 0 {
                    continue;
                }
                if planes.is_empty() {
                    planes = vec![Vec::new(); channels];
                    sample_rate.get_or_insert(spec.rate);
                }

                let capacity = u64::try_from(decoded.capacity()).unwrap_or(0);
                let mut buffer = SampleBuffer::<f32>::new(capacity, spec);
                buffer.copy_interleaved_ref(decoded);
                for frame in buffer.samples().chunks_exact(channels) {
                    for (plane, sample) in planes.iter_mut().zip(frame) {
                        plane.push(*sample);
                    }
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {e}");
            }
            Err(e) => return Err(CoreError::decode(e)),
        }
    }

    if planes.first().map_or(true, Vec::is_empty) {
        return Err(CoreError::decode("audio file contains no frames"));
    }

    let sample_rate = sample_rate.ok_or_else(|| CoreError::decode("unknown sample rate"))?;
    DecodedAudio::from_channels(sample_rate, planes)
}
