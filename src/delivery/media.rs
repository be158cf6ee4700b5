//! Coexistence with external media playback.
//!
//! Consulted immediately before an item reaches the speech engine. Whatever
//! the negotiator takes (focus, a ducked volume) it gives back in
//! [`MediaNegotiator::release`], which the coordinator calls when the item
//! finishes, fails, times out or is cancelled.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::QueuedItem;
use crate::config::MediaMode;
use crate::error::Result;
use crate::filter::classify_media;

/// Platform audio controls.
pub trait AudioSystem: Send + Sync {
    /// Whether another app is currently playing audio.
    fn is_playback_active(&self) -> bool;

    fn volume(&self) -> Result<u32>;

    fn max_volume(&self) -> Result<u32>;

    fn set_volume(&self, volume: u32) -> Result<()>;

    /// Ask for transient exclusive focus. `Ok(false)` means denied.
    fn request_focus(&self) -> Result<bool>;

    fn abandon_focus(&self) -> Result<()>;
}

/// Outcome of negotiation for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaDecision {
    Proceed,
    Silence(String),
}

/// Applies the media mode and tracks what must be restored afterwards.
pub struct MediaNegotiator {
    audio: Arc<dyn AudioSystem>,
    saved_volume: Option<u32>,
    holding_focus: bool,
}

impl MediaNegotiator {
    pub fn new(audio: Arc<dyn AudioSystem>) -> Self {
        Self {
            audio,
            saved_volume: None,
            holding_focus: false,
        }
    }

    /// Decide whether `item` may be spoken now, taking any resources needed.
    pub fn prepare(&mut self, item: &QueuedItem) -> MediaDecision {
        if !self.audio.is_playback_active() {
            return MediaDecision::Proceed;
        }

        // Media notifications are never read over playback, whatever the mode.
        match classify_media(&item.event) {
            Ok(Some(signal)) => {
                return MediaDecision::Silence(format!(
                    "media notification during playback ({signal})"
                ));
            }
            Ok(None) => {}
            Err(e) => debug!(id = %item.id, "media classification failed, not media: {e}"),
        }

        match item.settings.media_mode {
            MediaMode::Ignore => {}
            MediaMode::Pause => self.take_focus(),
            MediaMode::Duck => self.duck(item.settings.ducking_percent),
            MediaMode::Silence => {
                return MediaDecision::Silence("media is playing".to_owned());
            }
        }
        MediaDecision::Proceed
    }

    /// Restore the volume and abandon focus taken by [`prepare`](Self::prepare).
    pub fn release(&mut self) {
        if let Some(volume) = self.saved_volume.take() {
            match self.audio.set_volume(volume) {
                Ok(()) => debug!(volume, "media volume restored"),
                Err(e) => warn!("failed to restore media volume: {e}"),
            }
        }
        if std::mem::take(&mut self.holding_focus) {
            if let Err(e) = self.audio.abandon_focus() {
                warn!("failed to abandon audio focus: {e}");
            }
        }
    }

    fn take_focus(&mut self) {
        if self.holding_focus {
            return;
        }
        match self.audio.request_focus() {
            Ok(true) => self.holding_focus = true,
            Ok(false) => info!("audio focus denied, speaking anyway"),
            Err(e) => warn!("audio focus request failed, speaking anyway: {e}"),
        }
    }

    fn duck(&mut self, percent: u8) {
        if let Err(e) = self.try_duck(percent) {
            warn!("failed to duck media volume: {e}");
        }
    }

    fn try_duck(&mut self, percent: u8) -> Result<()> {
        let max = self.audio.max_volume()?;
        let target = (max * u32::from(percent) / 100).max(1);
        let current = self.audio.volume()?;
        if self.saved_volume.is_none() {
            self.saved_volume = Some(current);
        }
        self.audio.set_volume(target)?;
        debug!(from = current, to = target, "media ducked");
        Ok(())
    }
}
