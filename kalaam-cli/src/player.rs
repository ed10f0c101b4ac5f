//! Terminal rendering of a recitation and WAV export.

use kalaam_core::{
    CoreError, DecodedAudio, DurationExt, LyricView, PlayOutcome, PlaybackEvent, SourceKind,
};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const BAR_WIDTH: usize = 30;

/// Play the view's lyric, drawing progress until it ends or `cancel` fires.
///
/// # Errors
///
/// Returns an error when no audio could be produced.
pub async fn run(view: LyricView, cancel: CancellationToken) -> Result<(), CoreError> {
    let mut rx = view.subscribe();
    eprint!("Buffering...");

    let outcome = tokio::select! {
        outcome = view.play() => outcome,
        () = cancel.cancelled() => {
            eprintln!();
            view.close().await;
            return Ok(());
        }
    };

    let kind = match outcome {
        Ok(PlayOutcome::Playing(kind)) => kind,
        Ok(PlayOutcome::Superseded) => {
            eprintln!();
            view.close().await;
            return Ok(());
        }
        Err(e) => {
            eprintln!();
            view.close().await;
            return Err(e);
        }
    };
    let duration = view.playback().await.duration;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                view.stop().await;
                eprintln!();
                info!("Recitation stopped");
                break;
            }
            event = rx.recv() => match event {
                Ok(PlaybackEvent::Progress { fraction, position, .. }) => {
                    draw(&render_progress(fraction, position, duration, kind));
                }
                Ok(PlaybackEvent::Ended { .. }) => {
                    draw(&render_progress(1.0, duration, duration, kind));
                    eprintln!();
                    break;
                }
                Ok(PlaybackEvent::Stopped { .. } | PlaybackEvent::Failed { .. })
                | Err(RecvError::Closed) => {
                    eprintln!();
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("Missed {} playback events", n),
            }
        }
    }

    view.close().await;
    Ok(())
}

fn draw(line: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r{line}");
    let _ = stderr.flush();
}

/// One status line: bar, clock and source
#[must_use]
pub fn render_progress(
    fraction: f64,
    position: Duration,
    duration: Duration,
    kind: SourceKind,
) -> String {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let filled = ((fraction.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);

    format!(
        "[{}{}] {} / {} ({})",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        position.to_clock(),
        duration.to_clock(),
        kind
    )
}

/// Write decoded audio as a 16-bit PCM WAV file.
///
/// # Errors
///
/// Returns an IO error if the file cannot be written.
pub fn write_wav(audio: &DecodedAudio, path: &Path) -> Result<(), CoreError> {
    let channels = u16::try_from(audio.channel_count()).map_err(|_| CoreError::InvalidInput {
        reason: format!("cannot write {} channels to WAV", audio.channel_count()),
    })?;
    let spec = hound::WavSpec {
        channels,
        sample_rate: audio.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(std::io::Error::other)?;
    for sample in audio.interleaved() {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(value).map_err(std::io::Error::other)?;
    }
    writer.finalize().map_err(std::io::Error::other)?;

    info!(
        "Wrote {} of audio to {}",
        audio.duration().to_clock(),
        path.display()
    );
    Ok(())
}
