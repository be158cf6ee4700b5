//! Stage 4: blocked words, private redaction and word replacements.
//!
//! Order matters and is fixed: blocked words are checked first against the
//! original text; then a private app or the first matching private word
//! replaces the whole text with a placeholder naming only the app; then
//! every replacement pair runs over whatever text remains. Replacements run
//! over the placeholder too, and may reintroduce text that a blocked or
//! private word would have caught. That ordering is kept as-is.

use super::text::{contains_ci, replace_ci};
use super::{FilterContext, FilterStage, StageOutcome};
use crate::error::EvaluationError;

/// The text spoken in place of a private notification.
pub fn private_placeholder(app_name: &str) -> String {
    format!("You received a private notification from {app_name}")
}

pub struct WordFilterStage;

impl FilterStage for WordFilterStage {
    fn name(&self) -> &'static str {
        "words"
    }

    fn apply(&self, ctx: &mut FilterContext<'_>) -> Result<StageOutcome, EvaluationError> {
        let snapshot = ctx.snapshot;

        if let Some(word) = snapshot
            .blocked_words
            .iter()
            .find(|w| contains_ci(&ctx.processed_text, w))
        {
            return Ok(StageOutcome::Block(format!("blocked word: {word}")));
        }

        let private_app = snapshot.private_apps.contains(&ctx.event.source_id);
        let private_word = snapshot
            .private_words
            .iter()
            .find(|w| contains_ci(&ctx.processed_text, w));
        if private_app || private_word.is_some() {
            ctx.processed_text = private_placeholder(ctx.event.display_name());
            ctx.notes.push(match private_word {
                Some(word) if !private_app => format!("redacted: private word '{word}'"),
                _ => "redacted: private app".to_owned(),
            });
        }

        for replacement in &snapshot.replacements {
            ctx.processed_text =
                replace_ci(&ctx.processed_text, &replacement.from, &replacement.to);
        }

        Ok(StageOutcome::Continue)
    }
}
