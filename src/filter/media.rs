//! Stage 2: media notification detection.
//!
//! A notification is media when any one signal fires: a media-session marker
//! in the extras, a playback-control word anywhere in its text, a seekbar
//! (progress with a positive maximum), or a video app posting a title-like
//! text. The classifier is shared with the media negotiator's fail-safe.

use serde_json::Value;

use super::text::contains_ci;
use super::{FilterContext, FilterStage, StageOutcome};
use crate::error::EvaluationError;
use crate::event::InboundEvent;

/// Playback-control vocabulary, matched as case-insensitive substrings.
const CONTROL_WORDS: &[&str] = &[
    "play",
    "pause",
    "now playing",
    "track",
    "episode",
    "podcast",
    "album",
    "song",
    "rewind",
    "fast forward",
    "shuffle",
];

/// Extras keys whose presence marks a media session.
const SESSION_KEYS: &[&str] = &["android.mediaSession", "android.mediaRemoteDevice"];

const TEMPLATE_KEY: &str = "android.template";
const PROGRESS_KEY: &str = "android.progress";
const PROGRESS_MAX_KEY: &str = "android.progressMax";

/// Source-id fragments of apps that post video titles as notifications.
const VIDEO_APP_MARKERS: &[&str] = &[
    "youtube",
    "netflix",
    "twitch",
    "vimeo",
    "primevideo",
    "disneyplus",
    "hulu",
];

const TITLE_SEPARATORS: &[&str] = &["•", "·", " | ", " - "];
const VIDEO_KEYWORDS: &[&str] = &["video", "watch", "views", "trailer", "stream"];

/// Which signal classified a notification as media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSignal {
    SessionMarker,
    ControlWord(&'static str),
    Seekbar,
    VideoApp,
}

impl std::fmt::Display for MediaSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionMarker => write!(f, "media session"),
            Self::ControlWord(word) => write!(f, "control word '{word}'"),
            Self::Seekbar => write!(f, "seekbar"),
            Self::VideoApp => write!(f, "video app"),
        }
    }
}

/// Classify `event`, returning the first signal that fired.
///
/// # Errors
///
/// Returns [`EvaluationError::MalformedEvent`] when progress extras are
/// present but not numeric.
pub fn classify_media(event: &InboundEvent) -> Result<Option<MediaSignal>, EvaluationError> {
    if has_session_marker(event) {
        return Ok(Some(MediaSignal::SessionMarker));
    }

    let combined = event.combined_text();
    if let Some(word) = CONTROL_WORDS.iter().find(|w| contains_ci(&combined, w)) {
        return Ok(Some(MediaSignal::ControlWord(*word)));
    }

    if has_seekbar(event)? {
        return Ok(Some(MediaSignal::Seekbar));
    }

    if is_video_title(event, &combined) {
        return Ok(Some(MediaSignal::VideoApp));
    }

    Ok(None)
}

fn has_session_marker(event: &InboundEvent) -> bool {
    SESSION_KEYS.iter().any(|k| event.extras.contains_key(*k))
        || event
            .extras
            .get(TEMPLATE_KEY)
            .and_then(Value::as_str)
            .is_some_and(|t| t.contains("MediaStyle"))
}

fn has_seekbar(event: &InboundEvent) -> Result<bool, EvaluationError> {
    let progress = numeric_extra(event, PROGRESS_KEY)?;
    let max = numeric_extra(event, PROGRESS_MAX_KEY)?;
    Ok(matches!((progress, max), (Some(_), Some(max)) if max > 0.0))
}

fn numeric_extra(event: &InboundEvent, key: &str) -> Result<Option<f64>, EvaluationError> {
    match event.extras.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(EvaluationError::MalformedEvent(format!(
            "{key} is not numeric: {other}"
        ))),
    }
}

fn is_video_title(event: &InboundEvent, combined: &str) -> bool {
    let source = event.source_id.to_lowercase();
    if !VIDEO_APP_MARKERS.iter().any(|m| source.contains(m)) {
        return false;
    }
    TITLE_SEPARATORS.iter().any(|s| combined.contains(s))
        || VIDEO_KEYWORDS.iter().any(|k| contains_ci(combined, k))
}

/// Blocks media notifications unless excepted or important.
pub struct MediaFilterStage;

impl FilterStage for MediaFilterStage {
    fn name(&self) -> &'static str {
        "media"
    }

    fn apply(&self, ctx: &mut FilterContext<'_>) -> Result<StageOutcome, EvaluationError> {
        let settings = &ctx.snapshot.media_filter;
        if !settings.enabled || !ctx.event.has_metadata() {
            return Ok(StageOutcome::Continue);
        }

        let Some(signal) = classify_media(ctx.event)? else {
            return Ok(StageOutcome::Continue);
        };

        if settings.excepted_apps.contains(&ctx.event.source_id) {
            ctx.notes
                .push(format!("media notification allowed: {} is excepted", ctx.event.source_id));
            return Ok(StageOutcome::Continue);
        }

        let combined = ctx.event.combined_text();
        if let Some(keyword) = settings
            .important_keywords
            .iter()
            .find(|k| contains_ci(&combined, k))
        {
            ctx.notes
                .push(format!("media notification allowed: important keyword '{keyword}'"));
            return Ok(StageOutcome::Continue);
        }

        Ok(StageOutcome::Block(format!("media notification ({signal})")))
    }
}
