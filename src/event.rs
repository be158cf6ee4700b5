//! Inbound notification events delivered by the host notification source.

use serde::{Deserialize, Serialize};

/// Platform flags attached to a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFlags {
    /// Notification is marked ongoing.
    pub ongoing: bool,
    /// Notification cannot be swiped away.
    pub no_clear: bool,
    /// Notification belongs to a foreground service.
    pub foreground_service: bool,
}

/// One notification occurrence, consumed once by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundEvent {
    /// Posting app identifier (package name).
    pub source_id: String,
    /// Human-readable app name; falls back to `source_id` when empty.
    pub app_name: String,
    pub title: String,
    pub text: String,
    pub big_text: String,
    pub summary_text: String,
    pub info_text: String,
    pub flags: EventFlags,
    /// Priority on the platform's -2 (min) ..= 2 (max) scale.
    pub priority_level: i8,
    pub channel_id: Option<String>,
    pub sound_present: bool,
    pub vibrate_present: bool,
    /// Opaque platform extras.
    pub extras: serde_json::Map<String, serde_json::Value>,
    /// Epoch milliseconds when the notification was posted (0 = unknown).
    pub posted_at_ms: u64,
}

impl InboundEvent {
    /// Convenience constructor for a plain text notification.
    pub fn new(
        source_id: impl Into<String>,
        app_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            app_name: app_name.into(),
            text: text.into(),
            sound_present: true,
            ..Self::default()
        }
    }

    /// Display name used in spoken output and placeholders.
    pub fn display_name(&self) -> &str {
        if self.app_name.trim().is_empty() {
            &self.source_id
        } else {
            &self.app_name
        }
    }

    /// The text the pipeline speaks: `text`, else `big_text`, else `title`.
    pub fn speakable_text(&self) -> &str {
        [&self.text, &self.big_text, &self.title]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .map_or("", String::as_str)
    }

    /// All text fields joined by spaces, for lexicon scans.
    pub fn combined_text(&self) -> String {
        [
            &self.title,
            &self.text,
            &self.big_text,
            &self.summary_text,
            &self.info_text,
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Whether the platform supplied anything beyond the bare text.
    pub fn has_metadata(&self) -> bool {
        !self.extras.is_empty()
            || self.channel_id.is_some()
            || !self.title.is_empty()
            || !self.big_text.is_empty()
            || !self.summary_text.is_empty()
            || !self.info_text.is_empty()
    }
}
