//! Speech engine boundary.
//!
//! The engine renders one utterance at a time. `speak` must return once the
//! utterance is accepted; progress is reported separately as [`SpeechEvent`]s
//! tagged with the utterance id.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::QueuedItem;
use crate::error::{HeraldError, Result};
use crate::rules::VoiceParams;

/// How a new utterance relates to anything the engine is already saying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakMode {
    /// Drop anything in the engine's own buffer first.
    Flush,
    /// Append after the engine's own buffer.
    Enqueue,
}

/// Progress of one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started { utterance_id: String },
    Done { utterance_id: String },
    Error { utterance_id: String, message: String },
}

impl SpeechEvent {
    pub fn utterance_id(&self) -> &str {
        match self {
            Self::Started { utterance_id }
            | Self::Done { utterance_id }
            | Self::Error { utterance_id, .. } => utterance_id,
        }
    }
}

/// Where an engine reports [`SpeechEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SpeechEventSender {
    tx: mpsc::UnboundedSender<SpeechEvent>,
}

impl SpeechEventSender {
    pub fn new(tx: mpsc::UnboundedSender<SpeechEvent>) -> Self {
        Self { tx }
    }

    /// Report progress. Fails only when the coordinator has shut down.
    pub fn send(&self, event: SpeechEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| HeraldError::Channel(format!("speech event dropped: {e}")))
    }

    pub fn started(&self, utterance_id: &str) -> Result<()> {
        self.send(SpeechEvent::Started {
            utterance_id: utterance_id.to_owned(),
        })
    }

    pub fn done(&self, utterance_id: &str) -> Result<()> {
        self.send(SpeechEvent::Done {
            utterance_id: utterance_id.to_owned(),
        })
    }

    pub fn error(&self, utterance_id: &str, message: impl Into<String>) -> Result<()> {
        self.send(SpeechEvent::Error {
            utterance_id: utterance_id.to_owned(),
            message: message.into(),
        })
    }
}

/// Text-to-speech engine supplied by the host.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Start speaking `text`. Progress goes to `events`.
    async fn speak(
        &self,
        text: &str,
        mode: SpeakMode,
        utterance_id: &str,
        voice: Option<&VoiceParams>,
        events: SpeechEventSender,
    ) -> Result<()>;

    /// Stop the current utterance, if any.
    async fn stop(&self) -> Result<()>;
}

/// Hands queued items to the engine, one utterance at a time.
pub struct SpeechExecutor {
    engine: Arc<dyn SpeechEngine>,
    events: SpeechEventSender,
}

impl SpeechExecutor {
    pub fn new(engine: Arc<dyn SpeechEngine>, events: SpeechEventSender) -> Self {
        Self { engine, events }
    }

    /// Speak `item`, using its id as the utterance id.
    pub async fn speak(&self, item: &QueuedItem, mode: SpeakMode) -> Result<()> {
        debug!(utterance_id = %item.id, app = %item.app_name, ?mode, "speaking");
        self.engine
            .speak(
                &item.text,
                mode,
                &item.id,
                item.voice_override.as_ref(),
                self.events.clone(),
            )
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.engine.stop().await
    }
}
