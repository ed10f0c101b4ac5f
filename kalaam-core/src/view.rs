//! Reading screen state for a single lyric.

use crate::error::{CoreError, Result};
use crate::model::{Couplet, DisplaySettings, Lyric};
use crate::playback::{PlaybackEvent, PlaybackSnapshot};
use crate::provider::Interpreter;
use crate::resolver::{PlayOutcome, Reciter, ToggleOutcome};
use crate::store::ContentRepository;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shown in place of an interpretation the provider could not produce
pub const INTERPRETATION_FAILED: &str = "تشریح حاصل کرنے میں دشواری پیش آئی۔";

/// One user reading one lyric, with its own playback controller
pub struct LyricView {
    repository: Arc<dyn ContentRepository>,
    reciter: Reciter,
    interpreter: Arc<dyn Interpreter>,
    user_id: String,
    lyric: Lyric,
    settings: DisplaySettings,
    is_favorite: bool,
}

impl LyricView {
    /// Load `lyric_id` from the user's library.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the lyric does not exist, or a store error.
    pub async fn open(
        repository: Arc<dyn ContentRepository>,
        reciter: Reciter,
        interpreter: Arc<dyn Interpreter>,
        user_id: &str,
        lyric_id: &str,
    ) -> Result<Self> {
        let lyric = repository
            .lyric(user_id, lyric_id)
            .await?
            .ok_or_else(|| CoreError::not_found("lyric", lyric_id))?;
        let settings = repository.display_settings(user_id).await?;
        let is_favorite = repository
            .favorites(user_id)
            .await?
            .iter()
            .any(|id| id == lyric_id);

        info!("Opened lyric {} for {}", lyric.id, user_id);
        Ok(Self {
            repository,
            reciter,
            interpreter,
            user_id: user_id.to_string(),
            lyric,
            settings,
            is_favorite,
        })
    }

    #[must_use]
    pub const fn lyric(&self) -> &Lyric {
        &self.lyric
    }

    #[must_use]
    pub const fn settings(&self) -> &DisplaySettings {
        &self.settings
    }

    #[must_use]
    pub const fn is_favorite(&self) -> bool {
        self.is_favorite
    }

    #[must_use]
    pub fn couplets(&self) -> Vec<Couplet> {
        self.lyric.couplets()
    }

    /// Flip the favorite flag and return the new state.
    ///
    /// # Errors
    ///
    /// Returns a store error; the cached flag is left unchanged then.
    pub async fn toggle_favorite(&mut self) -> Result<bool> {
        self.is_favorite = self
            .repository
            .toggle_favorite(&self.user_id, &self.lyric.id)
            .await?;
        Ok(self.is_favorite)
    }

    /// Interpretation of the verses, or [`INTERPRETATION_FAILED`].
    pub async fn interpret(&self) -> String {
        match self.interpreter.interpret(&self.lyric.content).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(
                    "{} returned an empty interpretation for {}",
                    self.interpreter.name(),
                    self.lyric.id
                );
                INTERPRETATION_FAILED.to_string()
            }
            Err(e) => {
                warn!("Interpretation of {} failed: {}", self.lyric.id, e);
                INTERPRETATION_FAILED.to_string()
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error when no audio could be produced.
    pub async fn play(&self) -> Result<PlayOutcome> {
        self.reciter.play(&self.lyric).await
    }

    pub async fn stop(&self) -> bool {
        self.reciter.stop().await
    }

    /// # Errors
    ///
    /// Returns an error when starting playback fails.
    pub async fn toggle_playback(&self) -> Result<ToggleOutcome> {
        self.reciter.toggle(&self.lyric).await
    }

    pub async fn playback(&self) -> PlaybackSnapshot {
        self.reciter.controller().snapshot().await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.reciter.controller().subscribe()
    }

    /// Leave the screen, stopping any recitation.
    pub async fn close(self) {
        info!("Closing lyric {}", self.lyric.id);
        self.reciter.controller().dispose().await;
    }
}
