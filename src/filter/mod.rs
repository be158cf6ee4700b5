//! Filter engine: decides whether and how an inbound notification is spoken.
//!
//! The engine is a pure function of `(event, snapshot)` built from ordered
//! [`FilterStage`]s:
//!
//! 1. app allow/deny list
//! 2. media notification detection
//! 3. persistent/silent categories
//! 4. blocked words, private words, replacements
//! 5. conditional rules
//!
//! The first stage that blocks short-circuits the rest. A stage that fails is
//! skipped (no decision) unless it is marked non-skippable, in which case the
//! failure reaches the outer boundary and [`fold_to_allow`] lets the event
//! through. The pipeline fails open.

pub mod app;
pub mod media;
pub mod persistence;
pub mod rules;
pub mod text;
pub mod words;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::EvaluationError;
use crate::event::InboundEvent;
use crate::rules::{AmbientProbes, VoiceParams};
use crate::snapshot::ConfigSnapshot;

pub use media::{MediaSignal, classify_media};
pub use words::private_placeholder;

/// Sentinel for "no conditional delay".
pub const NO_DELAY: i32 = -1;

/// Final decision for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub should_speak: bool,
    pub processed_text: String,
    pub reason: String,
    /// Delay imposed by a rule, or [`NO_DELAY`].
    pub conditional_delay_seconds: i32,
    /// Voice parameters imposed by a rule.
    pub voice_override: Option<VoiceParams>,
}

impl FilterResult {
    /// A passing result that speaks `text` unchanged.
    pub fn allow(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            should_speak: true,
            processed_text: text.into(),
            reason: reason.into(),
            conditional_delay_seconds: NO_DELAY,
            voice_override: None,
        }
    }
}

/// Working state threaded through the stages for one event.
#[derive(Debug)]
pub struct FilterContext<'a> {
    pub event: &'a InboundEvent,
    pub snapshot: &'a ConfigSnapshot,
    pub processed_text: String,
    pub conditional_delay_seconds: i32,
    pub voice_override: Option<VoiceParams>,
    /// Pass-through notes from stages that let the event through for a reason.
    pub notes: Vec<String>,
}

impl<'a> FilterContext<'a> {
    pub fn new(event: &'a InboundEvent, snapshot: &'a ConfigSnapshot) -> Self {
        Self {
            event,
            snapshot,
            processed_text: event.speakable_text().to_owned(),
            conditional_delay_seconds: NO_DELAY,
            voice_override: None,
            notes: Vec::new(),
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            processed_text: self.processed_text.clone(),
            conditional_delay_seconds: self.conditional_delay_seconds,
            voice_override: self.voice_override.clone(),
            notes: self.notes.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.processed_text = checkpoint.processed_text;
        self.conditional_delay_seconds = checkpoint.conditional_delay_seconds;
        self.voice_override = checkpoint.voice_override;
        self.notes.truncate(checkpoint.notes);
    }
}

struct Checkpoint {
    processed_text: String,
    conditional_delay_seconds: i32,
    voice_override: Option<VoiceParams>,
    notes: usize,
}

/// What a stage decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Let the event continue to the next stage.
    Continue,
    /// Stop here; the event is not spoken.
    Block(String),
}

/// One ordered predicate/transform of the filter pipeline.
pub trait FilterStage: Send + Sync {
    /// Stable stage name for logs.
    fn name(&self) -> &'static str;

    /// Inspect the event and optionally rewrite the context.
    fn apply(&self, ctx: &mut FilterContext<'_>) -> Result<StageOutcome, EvaluationError>;

    /// Whether a failure of this stage is skipped (`true`) or escalated to the
    /// outer boundary (`false`).
    fn skippable(&self) -> bool {
        true
    }
}

/// Ordered, short-circuiting stage pipeline.
pub struct FilterEngine {
    stages: Vec<Box<dyn FilterStage>>,
}

impl FilterEngine {
    /// The standard five-stage pipeline.
    pub fn new(probes: Arc<dyn AmbientProbes>) -> Self {
        Self::with_stages(vec![
            Box::new(app::AppFilterStage::new(probes.clone())),
            Box::new(media::MediaFilterStage),
            Box::new(persistence::PersistenceFilterStage::new()),
            Box::new(words::WordFilterStage),
            Box::new(rules::ConditionalRulesStage::new(probes)),
        ])
    }

    /// A pipeline with caller-supplied stages, run in the given order.
    pub fn with_stages(stages: Vec<Box<dyn FilterStage>>) -> Self {
        Self { stages }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Decide one event. Never fails: outer errors fold to "allow".
    pub fn evaluate(&self, event: &InboundEvent, snapshot: &ConfigSnapshot) -> FilterResult {
        fold_to_allow(self.try_evaluate(event, snapshot), event)
    }

    /// Run the stages, surfacing failures of non-skippable stages.
    pub fn try_evaluate(
        &self,
        event: &InboundEvent,
        snapshot: &ConfigSnapshot,
    ) -> Result<FilterResult, EvaluationError> {
        let mut ctx = FilterContext::new(event, snapshot);

        for stage in &self.stages {
            let checkpoint = ctx.checkpoint();
            match stage.apply(&mut ctx) {
                Ok(StageOutcome::Continue) => {}
                Ok(StageOutcome::Block(reason)) => {
                    debug!(stage = stage.name(), source = %event.source_id, %reason, "blocked");
                    return Ok(FilterResult {
                        should_speak: false,
                        processed_text: ctx.processed_text,
                        reason,
                        conditional_delay_seconds: ctx.conditional_delay_seconds,
                        voice_override: ctx.voice_override,
                    });
                }
                Err(e) if stage.skippable() => {
                    warn!(stage = stage.name(), "filter stage failed, skipping: {e}");
                    ctx.restore(checkpoint);
                }
                Err(e) => return Err(e),
            }
        }

        let reason = if ctx.notes.is_empty() {
            "passed all filters".to_owned()
        } else {
            ctx.notes.join("; ")
        };
        Ok(FilterResult {
            should_speak: true,
            processed_text: ctx.processed_text,
            reason,
            conditional_delay_seconds: ctx.conditional_delay_seconds,
            voice_override: ctx.voice_override,
        })
    }
}

/// Outer fail-open policy: an evaluation error lets the event through with
/// its original text.
pub fn fold_to_allow(
    result: Result<FilterResult, EvaluationError>,
    event: &InboundEvent,
) -> FilterResult {
    match result {
        Ok(result) => result,
        Err(e) => {
            warn!(
                source = %event.source_id,
                "filter pipeline failed, allowing as safety measure: {e}"
            );
            FilterResult::allow(
                event.speakable_text(),
                format!("allowed as safety measure: {e}"),
            )
        }
    }
}
