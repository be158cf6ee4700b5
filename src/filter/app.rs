//! Stage 1: app allow/deny list.
//!
//! A rule with an `allow` app action lifts the list entry for its apps while
//! the rule applies. Rule blocks are still enforced later by the rules stage.

use std::sync::Arc;

use super::{FilterContext, FilterStage, StageOutcome};
use crate::config::AppListMode;
use crate::error::EvaluationError;
use crate::rules::{AmbientProbes, RuleEvaluator};

/// Blocks by source app according to the configured list mode.
pub struct AppFilterStage {
    probes: Arc<dyn AmbientProbes>,
}

impl AppFilterStage {
    pub fn new(probes: Arc<dyn AmbientProbes>) -> Self {
        Self { probes }
    }

    fn lifted_by_rule(&self, ctx: &FilterContext<'_>) -> bool {
        !ctx.snapshot.rules.is_empty()
            && RuleEvaluator::new(self.probes.as_ref())
                .evaluate(&ctx.snapshot.rules, ctx.event)
                .app_list_lifted
    }
}

impl FilterStage for AppFilterStage {
    fn name(&self) -> &'static str {
        "app"
    }

    fn apply(&self, ctx: &mut FilterContext<'_>) -> Result<StageOutcome, EvaluationError> {
        let source = &ctx.event.source_id;
        let listed = ctx.snapshot.apps.contains(source);

        let reason = match ctx.snapshot.app_list_mode {
            AppListMode::Deny if listed => format!("app blocked: {source}"),
            AppListMode::Allow if !listed => format!("app not in allow list: {source}"),
            AppListMode::None | AppListMode::Deny | AppListMode::Allow => {
                return Ok(StageOutcome::Continue);
            }
        };

        if self.lifted_by_rule(ctx) {
            ctx.notes.push(format!("app list lifted by rule: {source}"));
            return Ok(StageOutcome::Continue);
        }
        Ok(StageOutcome::Block(reason))
    }

    fn skippable(&self) -> bool {
        false
    }
}
