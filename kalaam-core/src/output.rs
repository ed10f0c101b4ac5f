//! Sound card output through cpal.
//!
//! A cpal `Stream` cannot leave the thread that built it, so a dedicated
//! output thread owns it for the lifetime of the [`DeviceSink`]. Samples reach
//! the audio callback through a ring buffer filled by one feeder thread per
//! stream. Starting a new stream or stopping the current one orphans the old
//! feeder and drains whatever it already queued.

use crate::error::{CoreError, Result};
use crate::playable::AudioSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// About a quarter second of stereo audio at 48 kHz
const RING_BUFFER_SIZE: usize = 48_000 * 2 / 4;

/// Samples pushed per lock of the producer
const FEED_CHUNK: usize = 1024;

const FEED_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct SharedState {
    /// Stream allowed to feed the ring buffer
    current: AtomicU64,
    paused: AtomicBool,
    /// Set to make the callback drain the ring buffer
    clear: AtomicBool,
}

/// Default output device of the host
pub struct DeviceSink {
    producer: Arc<Mutex<HeapProd<f32>>>,
    state: Arc<SharedState>,
    sample_rate: u32,
    channels: u16,
    /// Dropping this ends the output thread, which closes the stream
    _shutdown: mpsc::Sender<()>,
}

impl DeviceSink {
    /// Open the default output device.
    ///
    /// # Errors
    ///
    /// Returns `AudioOutput` if there is no device or the stream cannot be started.
    pub fn open() -> Result<Self> {
        let (producer, consumer) = HeapRb::<f32>::new(RING_BUFFER_SIZE).split();
        let state = Arc::new(SharedState::default());

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_state = Arc::clone(&state);

        thread::Builder::new()
            .name("kalaam-audio-output".to_string())
            .spawn(move || match open_stream(consumer, thread_state) {
                Ok((stream, format)) => {
                    let _ = ready_tx.send(Ok(format));
                    // Returns once the sink is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Audio output thread finished");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| CoreError::audio_output("output thread exited before opening a device"))??;

        info!("Audio output ready: {} Hz, {} channel(s)", sample_rate, channels);
        Ok(Self {
            producer: Arc::new(Mutex::new(producer)),
            state,
            sample_rate,
            channels,
            _shutdown: shutdown_tx,
        })
    }
}

impl AudioSink for DeviceSink {
    fn format(&self) -> (u32, u16) {
        (self.sample_rate, self.channels)
    }

    fn start(&self, samples: Vec<f32>) -> u64 {
        let stream = self.state.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.paused.store(false, Ordering::Release);
        self.state.clear.store(true, Ordering::Release);

        let producer = Arc::clone(&self.producer);
        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name(format!("kalaam-audio-feed-{stream}"))
            .spawn(move || feed(&producer, &state, stream, &samples));
        if let Err(e) = spawned {
            warn!("Failed to start audio feeder: {e}");
        }
        stream
    }

    fn pause(&self, stream: u64) {
        if self.state.current.load(Ordering::Acquire) == stream {
            self.state.paused.store(true, Ordering::Release);
        }
    }

    fn resume(&self, stream: u64) {
        if self.state.current.load(Ordering::Acquire) == stream {
            self.state.paused.store(false, Ordering::Release);
        }
    }

    fn stop(&self, stream: u64) {
        let stopped = self
            .state
            .current
            .compare_exchange(stream, stream + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if stopped {
            self.state.paused.store(false, Ordering::Release);
            self.state.clear.store(true, Ordering::Release);
        }
    }
}

/// Push `samples` into the ring buffer until done or orphaned.
fn feed(producer: &Mutex<HeapProd<f32>>, state: &SharedState, stream: u64, samples: &[f32]) {
    let mut remaining = samples;

    while !remaining.is_empty() {
        if state.current.load(Ordering::Acquire) != stream {
            debug!("Audio stream {stream} superseded with {} samples left", remaining.len());
            return;
        }
        // Wait for the callback to drain the previous stream
        if state.clear.load(Ordering::Acquire) {
            thread::sleep(FEED_BACKOFF);
            continue;
        }

        let chunk = &remaining[..remaining.len().min(FEED_CHUNK)];
        let written = producer.lock().push_slice(chunk);
        remaining = &remaining[written..];
        if written < chunk.len() {
            thread::sleep(FEED_BACKOFF);
        }
    }
    debug!("Audio stream {stream} fully queued");
}

fn open_stream(consumer: HeapCons<f32>, state: Arc<SharedState>) -> Result<(Stream, (u32, u16))> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| CoreError::audio_output("no output device available"))?;
    let supported = device
        .default_output_config()
        .map_err(CoreError::audio_output)?;

    let format = (supported.sample_rate().0, supported.channels());
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, state),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, state),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, state),
        other => Err(CoreError::audio_output(format!(
            "unsupported sample format {other:?}"
        ))),
    }?;
    stream.play().map_err(CoreError::audio_output)?;

    Ok((stream, format))
}

fn build_stream<T: SizedSample + FromSample<f32>>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    state: Arc<SharedState>,
) -> Result<Stream> {
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if state.clear.swap(false, Ordering::AcqRel) {
                    while consumer.try_pop().is_some() {}
                }
                let paused = state.paused.load(Ordering::Acquire);
                for sample in data.iter_mut() {
                    let value = if paused {
                        0.0
                    } else {
                        consumer.try_pop().unwrap_or(0.0)
                    };
                    *sample = T::from_sample(value);
                }
            },
            |err| warn!("Audio output error: {err}"),
            None,
        )
        .map_err(CoreError::audio_output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> (Mutex<HeapProd<f32>>, HeapCons<f32>) {
        let (producer, consumer) = HeapRb::<f32>::new(64).split();
        (Mutex::new(producer), consumer)
    }

    #[test]
    fn test_feed_queues_current_stream() {
        let (producer, mut consumer) = ring();
        let state = SharedState::default();
        state.current.store(3, Ordering::Release);

        feed(&producer, &state, 3, &[0.25, -0.25, 0.5]);

        let queued: Vec<f32> = std::iter::from_fn(|| consumer.try_pop()).collect();
        assert_eq!(queued, vec![0.25, -0.25, 0.5]);
    }

    #[test]
    fn test_feed_skips_superseded_stream() {
        let (producer, mut consumer) = ring();
        let state = SharedState::default();
        state.current.store(4, Ordering::Release);

        feed(&producer, &state, 3, &[0.25; 10]);

        assert!(consumer.try_pop().is_none());
    }
}
