//! Raw PCM decoding for synthesized speech payloads.
//!
//! Providers return speech as base64 text wrapping interleaved 16-bit
//! little-endian samples. A trailing partial frame is dropped rather than
//! rejected so that padded payloads still play.

use crate::error::{CoreError, Result};
use crate::time::frames_to_duration;
use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;
use tracing::debug;

/// Sample rate of synthesized speech payloads
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;

/// Channel count of synthesized speech payloads
pub const SYNTHESIS_CHANNELS: u16 = 1;

const BYTES_PER_SAMPLE: usize = 2;

/// Immutable deinterleaved sample data.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    sample_rate: u32,
    /// One vector per channel, all the same length
    channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Build from per-channel sample vectors.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if there are no channels, the sample rate is zero,
    /// or the channels differ in length.
    pub fn from_channels(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(CoreError::decode("sample rate must be non-zero"));
        }
        let Some(first) = channels.first() else {
            return Err(CoreError::decode("audio has no channels"));
        };
        let frames = first.len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(CoreError::decode("channels have different lengths"));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel
    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames(), self.sample_rate)
    }

    /// Samples re-interleaved frame by frame, for output devices and WAV export.
    #[must_use]
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames() * self.channel_count());
        for frame in 0..self.frames() {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }

    /// Interleaved samples converted to `sample_rate` and `channels`.
    ///
    /// Resampling is linear. Mono is copied to every output channel, a mono
    /// output gets the average of all channels, and other layouts map channel
    /// by channel with missing channels left silent.
    #[must_use]
    pub fn render(&self, sample_rate: u32, channels: u16) -> Vec<f32> {
        let source_frames = self.frames();
        let out_channels = usize::from(channels);
        if source_frames == 0 || out_channels == 0 || sample_rate == 0 {
            return Vec::new();
        }
        if sample_rate == self.sample_rate && out_channels == self.channel_count() {
            return self.interleaved();
        }

        let scaled = u64::try_from(source_frames)
            .unwrap_or(u64::MAX)
            .saturating_mul(u64::from(sample_rate))
            / u64::from(self.sample_rate);
        let out_frames = usize::try_from(scaled).unwrap_or(usize::MAX);
        let step = f64::from(self.sample_rate) / f64::from(sample_rate);

        let mut out = Vec::with_capacity(out_frames.saturating_mul(out_channels));
        for frame in 0..out_frames {
            #[allow(clippy::cast_precision_loss)]
            let position = frame as f64 * step;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = (position.floor() as usize).min(source_frames - 1);
            let next = (index + 1).min(source_frames - 1);
            #[allow(clippy::cast_possible_truncation)]
            let weight = (position - position.floor()) as f32;

            let sample_at =
                |channel: &[f32]| channel[index] + (channel[next] - channel[index]) * weight;
            for out_channel in 0..out_channels {
                out.push(self.mix(out_channel, out_channels, sample_at));
            }
        }
        out
    }

    fn mix(
        &self,
        out_channel: usize,
        out_channels: usize,
        sample_at: impl Fn(&[f32]) -> f32,
    ) -> f32 {
        match (self.channels.as_slice(), out_channels) {
            ([mono], _) => sample_at(mono),
            (all, 1) => {
                #[allow(clippy::cast_precision_loss)]
                let count = all.len() as f32;
                all.iter().map(|c| sample_at(c)).sum::<f32>() / count
            }
            (all, _) => all.get(out_channel).map_or(0.0, |c| sample_at(c)),
        }
    }
}

/// Decode interleaved 16-bit little-endian PCM.
///
/// Each sample is scaled by `1 / 32768`, so output lies in `[-1.0, 1.0)`.
///
/// # Errors
///
/// Returns `Decode` if `channels` or `sample_rate` is zero, or if `bytes`
/// does not hold at least one whole frame.
pub fn decode_pcm16le(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    if channels == 0 {
        return Err(CoreError::decode("channel count must be non-zero"));
    }
    let channels = usize::from(channels);
    let frame_size = channels * BYTES_PER_SAMPLE;
    let frames = bytes.len() / frame_size;
    if frames == 0 {
        return Err(CoreError::decode(format!(
            "payload of {} bytes is shorter than one {frame_size}-byte frame",
            bytes.len()
        )));
    }

    let trailing = bytes.len() % frame_size;
    if trailing != 0 {
        debug!("Dropping {trailing} trailing byte(s) of partial PCM frame");
    }

    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in bytes[..frames * frame_size].chunks_exact(frame_size) {
        for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(BYTES_PER_SAMPLE)) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            plane.push(f32::from(value) / 32768.0);
        }
    }

    DecodedAudio::from_channels(sample_rate, planes)
}

/// Decode a base64 payload wrapping 16-bit little-endian PCM.
///
/// # Errors
///
/// Returns `Decode` if the text is not valid base64 or the PCM is malformed.
pub fn decode_base64_pcm(payload: &str, sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::decode(format!("invalid base64 payload: {e}")))?;
    decode_pcm16le(&bytes, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_mono_frame_count_and_range() {
        let samples: Vec<i16> = vec![i16::MIN, -1, 0, 1, i16::MAX, 16384];
        let audio = decode_pcm16le(&pcm_bytes(&samples), 24_000, 1).unwrap();

        assert_eq!(audio.channel_count(), 1);
        assert_eq!(audio.frames(), samples.len());
        let channel = audio.channel(0).unwrap();
        assert!(channel.iter().all(|s| (-1.0..1.0).contains(s)));
        assert!((channel[0] + 1.0).abs() < f32::EPSILON);
        assert!((channel[5] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_decode_stereo_deinterleaves() {
        // L, R, L, R
        let bytes = pcm_bytes(&[100, -100, 200, -200]);
        let audio = decode_pcm16le(&bytes, 44_100, 2).unwrap();

        assert_eq!(audio.frames(), 2);
        let left = audio.channel(0).unwrap();
        let right = audio.channel(1).unwrap();
        assert!(left.iter().all(|s| *s > 0.0));
        assert!(right.iter().all(|s| *s < 0.0));
        assert_eq!(audio.interleaved().len(), 4);
    }

    #[test]
    fn test_decode_frame_counts_for_many_lengths() {
        for channels in 1..=4u16 {
            for frames in [1usize, 2, 7, 480] {
                let bytes = vec![0x7Fu8; frames * usize::from(channels) * 2];
                let audio = decode_pcm16le(&bytes, 24_000, channels).unwrap();
                assert_eq!(audio.frames(), frames);
                assert_eq!(audio.channel_count(), usize::from(channels));
            }
        }
    }

    #[test]
    fn test_decode_truncates_partial_frame() {
        let mut bytes = pcm_bytes(&[1, 2, 3]);
        bytes.push(0xAB);
        let audio = decode_pcm16le(&bytes, 24_000, 1).unwrap();
        assert_eq!(audio.frames(), 3);

        // 3 samples in stereo is one whole frame plus half a frame
        let audio = decode_pcm16le(&pcm_bytes(&[1, 2, 3]), 24_000, 2).unwrap();
        assert_eq!(audio.frames(), 1);
    }

    #[test]
    fn test_decode_rejects_undersized_payload() {
        assert!(matches!(
            decode_pcm16le(&[], 24_000, 1),
            Err(CoreError::Decode { .. })
        ));
        assert!(matches!(
            decode_pcm16le(&[0, 0], 24_000, 2),
            Err(CoreError::Decode { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_zero_channels_and_rate() {
        assert!(decode_pcm16le(&[0, 0], 24_000, 0).is_err());
        assert!(decode_pcm16le(&[0, 0], 0, 1).is_err());
    }

    #[test]
    fn test_decode_base64_duration() {
        // Two seconds of silence at 24 kHz mono
        let bytes = vec![0u8; 24_000 * 2 * 2];
        let payload = general_purpose::STANDARD.encode(&bytes);
        let audio =
            decode_base64_pcm(&payload, SYNTHESIS_SAMPLE_RATE, SYNTHESIS_CHANNELS).unwrap();
        assert_eq!(audio.frames(), 48_000);
        assert_eq!(audio.duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        let err = decode_base64_pcm("not base64!!", 24_000, 1).unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));
    }

    #[test]
    fn test_from_channels_rejects_ragged() {
        let result = DecodedAudio::from_channels(24_000, vec![vec![0.0; 3], vec![0.0; 2]]);
        assert!(result.is_err());
        assert!(DecodedAudio::from_channels(24_000, vec![]).is_err());
    }

    #[test]
    fn test_render_same_format_is_interleaved() {
        let audio =
            DecodedAudio::from_channels(8, vec![vec![0.1, 0.2], vec![-0.1, -0.2]]).unwrap();
        assert_eq!(audio.render(8, 2), audio.interleaved());
    }

    #[test]
    fn test_render_mono_to_stereo_duplicates() {
        let audio = DecodedAudio::from_channels(8, vec![vec![0.25, -0.5]]).unwrap();
        assert_eq!(audio.render(8, 2), vec![0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn test_render_stereo_to_mono_averages() {
        let audio = DecodedAudio::from_channels(8, vec![vec![0.5], vec![-0.25]]).unwrap();
        assert_eq!(audio.render(8, 1), vec![0.125]);
    }

    #[test]
    fn test_render_upsamples_linearly() {
        let audio = DecodedAudio::from_channels(2, vec![vec![0.0, 1.0]]).unwrap();
        let out = audio.render(4, 1);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
        // Past the last frame the signal holds
        assert!((out[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_render_keeps_duration_when_resampling() {
        let audio = DecodedAudio::from_channels(24_000, vec![vec![0.0; 48_000]]).unwrap();
        let out = audio.render(48_000, 2);
        assert_eq!(out.len(), 48_000 * 2 * 2);
        assert!(audio.render(0, 2).is_empty());
        assert!(audio.render(48_000, 0).is_empty());
    }
}
