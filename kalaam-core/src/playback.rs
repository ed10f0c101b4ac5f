//! Playback controller: owns the "now playing" session of one lyric view.
//!
//! Lifecycle: `Idle -> Buffering -> Playing -> Idle`. A session ends on
//! natural end, explicit stop, failure, a newer play request, or disposal.
//! Every one of those paths goes through the same teardown, which cancels
//! the progress sampler and stops the handle before anything else changes.

use crate::error::CoreError;
use crate::playable::{Playable, SourceKind};
use crate::time::DurationExt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default period of the progress sampler
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Buffering,
    Playing,
}

impl PlaybackStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
        }
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state for rendering a play control
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub source_kind: Option<SourceKind>,
    /// Fraction of the audio played, in `[0.0, 1.0]`
    pub progress: f64,
    pub session: Option<u64>,
    pub lyric_id: Option<String>,
    pub position: Duration,
    pub duration: Duration,
}

impl PlaybackSnapshot {
    fn idle() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            source_kind: None,
            progress: 0.0,
            session: None,
            lyric_id: None,
            position: Duration::ZERO,
            duration: Duration::ZERO,
        }
    }
}

/// Events emitted by the playback controller
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// A play request was accepted and audio is being prepared
    Buffering { session: u64, lyric_id: String },
    /// Audio started playing
    Started {
        session: u64,
        kind: SourceKind,
        duration: Duration,
    },
    /// Periodic progress sample
    Progress {
        session: u64,
        fraction: f64,
        position: Duration,
    },
    /// Audio reached its end
    Ended { session: u64 },
    /// Session torn down by stop, a newer request, or disposal
    Stopped { session: u64 },
    /// Audio could not be prepared
    Failed { session: u64, message: String },
}

/// Proof of a play request, checked when its audio becomes ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    session: u64,
    lyric_id: String,
}

impl SessionTicket {
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    #[must_use]
    pub fn lyric_id(&self) -> &str {
        &self.lyric_id
    }
}

struct ActiveSession {
    id: u64,
    lyric_id: String,
    /// None while buffering
    handle: Option<Box<dyn Playable>>,
    sampler: Option<CancellationToken>,
    progress: f64,
}

struct ControllerInner {
    next_session: u64,
    active: Option<ActiveSession>,
}

/// Drives at most one playback session at a time.
pub struct PlaybackController {
    inner: Mutex<ControllerInner>,
    event_tx: broadcast::Sender<PlaybackEvent>,
    progress_interval: Duration,
    root_token: CancellationToken,
}

impl PlaybackController {
    /// Create a controller sampling progress every `progress_interval`
    #[must_use]
    pub fn new(progress_interval: Duration) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            inner: Mutex::new(ControllerInner {
                next_session: 0,
                active: None,
            }),
            event_tx,
            progress_interval: progress_interval.max(Duration::from_millis(1)),
            root_token: CancellationToken::new(),
        })
    }

    /// Subscribe to playback events
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.event_tx.subscribe()
    }

    /// Accept a play request: tear down any current session, then enter Buffering.
    ///
    /// After [`dispose`](Self::dispose) the returned ticket is already stale,
    /// so the request is refused without a session ever being created.
    pub async fn begin(&self, lyric_id: &str) -> SessionTicket {
        let mut inner = self.inner.lock().await;
        inner.next_session += 1;
        let session = inner.next_session;

        if self.is_disposed() {
            debug!("Controller disposed, refusing to play lyric {lyric_id}");
            return SessionTicket {
                session,
                lyric_id: lyric_id.to_string(),
            };
        }

        if let Some(previous) = Self::teardown(&mut inner) {
            info!("Replacing playback session {previous}");
            let _ = self.event_tx.send(PlaybackEvent::Stopped { session: previous });
        }

        inner.active = Some(ActiveSession {
            id: session,
            lyric_id: lyric_id.to_string(),
            handle: None,
            sampler: None,
            progress: 0.0,
        });

        debug!("Session {session} buffering lyric {lyric_id}");
        let _ = self.event_tx.send(PlaybackEvent::Buffering {
            session,
            lyric_id: lyric_id.to_string(),
        });

        SessionTicket {
            session,
            lyric_id: lyric_id.to_string(),
        }
    }

    /// Start playing `handle` for the session identified by `ticket`.
    ///
    /// Returns `false` and discards the handle when the ticket is stale,
    /// i.e. the session was stopped or superseded while buffering.
    pub async fn start(
        self: &Arc<Self>,
        ticket: &SessionTicket,
        mut handle: Box<dyn Playable>,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        let disposed = self.is_disposed();

        let active = match inner.active.as_mut() {
            Some(active)
                if !disposed && active.id == ticket.session && active.handle.is_none() =>
            {
                active
            }
            _ => {
                debug!(
                    "Discarding {} audio for stale session {}",
                    handle.kind(),
                    ticket.session
                );
                handle.stop();
                return false;
            }
        };

        let kind = handle.kind();
        let duration = handle.duration();
        handle.play();

        let token = self.root_token.child_token();
        active.handle = Some(handle);
        active.sampler = Some(token.clone());
        active.progress = 0.0;

        info!(
            "Session {} playing {} audio ({})",
            ticket.session,
            kind,
            duration.to_clock()
        );
        let _ = self.event_tx.send(PlaybackEvent::Started {
            session: ticket.session,
            kind,
            duration,
        });

        self.spawn_sampler(ticket.session, token);
        true
    }

    /// Mark the session as failed and return to Idle.
    ///
    /// Returns `false` when the ticket is stale.
    pub async fn fail(&self, ticket: &SessionTicket, error: &CoreError) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.active.as_ref().map(|a| a.id) != Some(ticket.session) {
            return false;
        }

        Self::teardown(&mut inner);
        warn!("Session {} failed: {}", ticket.session, error);
        let _ = self.event_tx.send(PlaybackEvent::Failed {
            session: ticket.session,
            message: error.to_string(),
        });
        true
    }

    /// Stop the current session. Safe to call in any state.
    ///
    /// Returns `true` if a session was torn down.
    pub async fn stop(&self) -> bool {
        let mut inner = self.inner.lock().await;

        match Self::teardown(&mut inner) {
            Some(session) => {
                info!("Session {session} stopped");
                let _ = self.event_tx.send(PlaybackEvent::Stopped { session });
                true
            }
            None => false,
        }
    }

    /// Tear down the session and every sampler owned by this controller.
    ///
    /// Call when the hosting view goes away.
    pub async fn dispose(&self) {
        self.root_token.cancel();
        self.stop().await;
    }

    /// Whether [`dispose`](Self::dispose) has been called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.root_token.is_cancelled()
    }

    /// Whether `ticket` still identifies the current session
    pub async fn is_current(&self, ticket: &SessionTicket) -> bool {
        self.inner
            .lock()
            .await
            .active
            .as_ref()
            .is_some_and(|a| a.id == ticket.session)
    }

    /// Current observable state
    pub async fn snapshot(&self) -> PlaybackSnapshot {
        let inner = self.inner.lock().await;

        let Some(active) = inner.active.as_ref() else {
            return PlaybackSnapshot::idle();
        };

        match active.handle.as_ref() {
            Some(handle) => PlaybackSnapshot {
                status: PlaybackStatus::Playing,
                source_kind: Some(handle.kind()),
                progress: active.progress,
                session: Some(active.id),
                lyric_id: Some(active.lyric_id.clone()),
                position: handle.current_time(),
                duration: handle.duration(),
            },
            None => PlaybackSnapshot {
                status: PlaybackStatus::Buffering,
                source_kind: None,
                progress: 0.0,
                session: Some(active.id),
                lyric_id: Some(active.lyric_id.clone()),
                position: Duration::ZERO,
                duration: Duration::ZERO,
            },
        }
    }

    /// Current status
    pub async fn status(&self) -> PlaybackStatus {
        self.snapshot().await.status
    }

    /// Cancel the sampler, stop the handle and clear the session.
    fn teardown(inner: &mut ControllerInner) -> Option<u64> {
        let mut active = inner.active.take()?;

        if let Some(token) = active.sampler.take() {
            token.cancel();
        }
        if let Some(mut handle) = active.handle.take() {
            handle.stop();
        }

        Some(active.id)
    }

    fn spawn_sampler(self: &Arc<Self>, session: u64, token: CancellationToken) {
        let controller: Weak<Self> = Arc::downgrade(self);
        let period = self.progress_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        if !controller.sample(session).await {
                            break;
                        }
                    }
                }
            }
            debug!("Progress sampler for session {session} finished");
        });
    }

    /// Take one progress sample. Returns `false` once the session is over.
    async fn sample(&self, session: u64) -> bool {
        let mut inner = self.inner.lock().await;

        let Some(active) = inner.active.as_mut().filter(|a| a.id == session) else {
            return false;
        };
        let Some(handle) = active.handle.as_ref() else {
            return false;
        };

        let position = handle.current_time();
        let fraction = position.fraction_of(handle.duration());
        let ended = handle.has_ended();
        active.progress = active.progress.max(fraction);

        let _ = self.event_tx.send(PlaybackEvent::Progress {
            session,
            fraction: active.progress,
            position,
        });

        if ended {
            Self::teardown(&mut inner);
            info!("Session {session} reached the end");
            let _ = self.event_tx.send(PlaybackEvent::Ended { session });
            return false;
        }

        true
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}
