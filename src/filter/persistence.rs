//! Stage 3: persistent and silent notification categories.
//!
//! Each category is a named predicate over the event plus a switch in the
//! snapshot. All enabled categories are evaluated (no short-circuit) so the
//! block reason names every one that matched.

use super::{FilterContext, FilterStage, StageOutcome};
use crate::config::PersistenceFilterConfig;
use crate::error::EvaluationError;
use crate::event::InboundEvent;

/// Source ids treated as the operating system itself.
const SYSTEM_SOURCES: &[&str] = &["android", "com.android.systemui", "com.android.system"];

/// Channel ids the platform uses for its own status notifications.
const SYSTEM_CHANNELS: &[&str] = &["system", "system_changes", "usb", "battery", "ALERTS"];

/// One independently switchable category.
pub struct CategoryPredicate {
    pub name: &'static str,
    pub enabled: fn(&PersistenceFilterConfig) -> bool,
    pub matches: fn(&InboundEvent) -> bool,
}

/// The five categories, in reporting order.
pub fn categories() -> Vec<CategoryPredicate> {
    vec![
        CategoryPredicate {
            name: "persistent",
            enabled: |c| c.persistent,
            matches: is_persistent,
        },
        CategoryPredicate {
            name: "silent",
            enabled: |c| c.silent,
            matches: is_silent,
        },
        CategoryPredicate {
            name: "foreground_service",
            enabled: |c| c.foreground_service,
            matches: is_foreground_service,
        },
        CategoryPredicate {
            name: "low_priority",
            enabled: |c| c.low_priority,
            matches: is_low_priority,
        },
        CategoryPredicate {
            name: "system",
            enabled: |c| c.system,
            matches: is_system,
        },
    ]
}

pub fn is_persistent(event: &InboundEvent) -> bool {
    event.flags.ongoing || event.flags.no_clear
}

pub fn is_silent(event: &InboundEvent) -> bool {
    !event.sound_present && !event.vibrate_present
}

pub fn is_foreground_service(event: &InboundEvent) -> bool {
    event.flags.foreground_service
}

pub fn is_low_priority(event: &InboundEvent) -> bool {
    event.priority_level < 0
}

pub fn is_system(event: &InboundEvent) -> bool {
    SYSTEM_SOURCES.contains(&event.source_id.as_str())
        || event
            .channel_id
            .as_deref()
            .is_some_and(|c| SYSTEM_CHANNELS.contains(&c))
}

/// Blocks when any enabled category matches.
pub struct PersistenceFilterStage {
    categories: Vec<CategoryPredicate>,
}

impl PersistenceFilterStage {
    pub fn new() -> Self {
        Self {
            categories: categories(),
        }
    }
}

impl Default for PersistenceFilterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterStage for PersistenceFilterStage {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn apply(&self, ctx: &mut FilterContext<'_>) -> Result<StageOutcome, EvaluationError> {
        let settings = &ctx.snapshot.persistence;
        let matched: Vec<&str> = self
            .categories
            .iter()
            .filter(|c| (c.enabled)(settings) && (c.matches)(ctx.event))
            .map(|c| c.name)
            .collect();

        if matched.is_empty() {
            Ok(StageOutcome::Continue)
        } else {
            Ok(StageOutcome::Block(format!(
                "persistent/silent filter: {}",
                matched.join(", ")
            )))
        }
    }
}
