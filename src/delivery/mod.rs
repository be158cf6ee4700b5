//! Delivery: arbitrating, delaying and speaking items that passed the filters.
//!
//! [`scheduler`] is the pure state machine, [`media`] negotiates with any
//! external playback, [`executor`] wraps the speech engine and
//! [`coordinator`] is the single task that owns all of it.

pub mod coordinator;
pub mod executor;
pub mod media;
pub mod scheduler;

use std::sync::Arc;

use crate::config::{BehaviorMode, MediaMode};
use crate::event::InboundEvent;
use crate::filter::{FilterResult, NO_DELAY};
use crate::rules::VoiceParams;
use crate::snapshot::ConfigSnapshot;

pub use coordinator::{DeliveryCommand, DeliveryCoordinator, DeliveryHandle, DeliveryStatus};
pub use executor::{SpeakMode, SpeechEngine, SpeechEvent, SpeechEventSender, SpeechExecutor};
pub use media::{AudioSystem, MediaDecision, MediaNegotiator};
pub use scheduler::{Directive, DropReason, SchedulerPhase, SchedulerState};

/// Delivery settings captured from the snapshot the item was filtered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    pub behavior_mode: BehaviorMode,
    /// Global delay, used when the item carries no conditional delay.
    pub delay_seconds: u32,
    pub media_mode: MediaMode,
    pub ducking_percent: u8,
}

impl DeliverySettings {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self {
            behavior_mode: snapshot.behavior_mode,
            delay_seconds: snapshot.delay_seconds,
            media_mode: snapshot.media_mode,
            ducking_percent: snapshot.ducking_percent,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from_snapshot(&ConfigSnapshot::default())
    }
}

/// A filtered notification waiting to be spoken.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    /// Unique id, also used as the utterance id.
    pub id: String,
    pub app_name: String,
    pub text: String,
    pub is_priority: bool,
    /// Rule-imposed delay, or [`NO_DELAY`].
    pub conditional_delay_seconds: i32,
    pub voice_override: Option<VoiceParams>,
    pub event: Arc<InboundEvent>,
    pub settings: DeliverySettings,
}

impl QueuedItem {
    /// Build an item from a passing filter result.
    pub fn from_result(
        event: Arc<InboundEvent>,
        result: FilterResult,
        snapshot: &ConfigSnapshot,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app_name: event.display_name().to_owned(),
            text: result.processed_text,
            is_priority: snapshot.is_priority(&event.source_id),
            conditional_delay_seconds: result.conditional_delay_seconds,
            voice_override: result.voice_override,
            settings: DeliverySettings::from_snapshot(snapshot),
            event,
        }
    }

    /// A bare item with default settings. Mostly useful in tests and tools.
    pub fn new(app_name: impl Into<String>, text: impl Into<String>) -> Self {
        let app_name = app_name.into();
        let text = text.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: Arc::new(InboundEvent::new(app_name.clone(), app_name.clone(), text.clone())),
            app_name,
            text,
            is_priority: false,
            conditional_delay_seconds: NO_DELAY,
            voice_override: None,
            settings: DeliverySettings::default(),
        }
    }

    /// Rule delay when positive, else the global delay.
    pub fn effective_delay_seconds(&self) -> u32 {
        u32::try_from(self.conditional_delay_seconds)
            .ok()
            .filter(|s| *s > 0)
            .unwrap_or(self.settings.delay_seconds)
    }
}
