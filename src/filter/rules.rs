//! Stage 5: conditional rules.

use std::sync::Arc;

use super::words::private_placeholder;
use super::{FilterContext, FilterStage, StageOutcome};
use crate::error::EvaluationError;
use crate::rules::{AmbientProbes, RuleEvaluator};

/// Applies the snapshot's rules using live ambient probes.
pub struct ConditionalRulesStage {
    probes: Arc<dyn AmbientProbes>,
}

impl ConditionalRulesStage {
    pub fn new(probes: Arc<dyn AmbientProbes>) -> Self {
        Self { probes }
    }
}

impl FilterStage for ConditionalRulesStage {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn apply(&self, ctx: &mut FilterContext<'_>) -> Result<StageOutcome, EvaluationError> {
        if ctx.snapshot.rules.is_empty() {
            return Ok(StageOutcome::Continue);
        }

        let effects =
            RuleEvaluator::new(self.probes.as_ref()).evaluate(&ctx.snapshot.rules, ctx.event);

        if let Some(rule) = effects.blocked_by {
            return Ok(StageOutcome::Block(format!("blocked by rule: {rule}")));
        }
        if effects.private == Some(true) {
            ctx.processed_text = private_placeholder(ctx.event.display_name());
            ctx.notes.push("redacted: rule".to_owned());
        }
        if let Some(seconds) = effects.delay_seconds {
            ctx.conditional_delay_seconds = i32::try_from(seconds).unwrap_or(i32::MAX);
        }
        if effects.voice.is_some() {
            ctx.voice_override = effects.voice;
        }
        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::HeraldConfig;
    use crate::event::InboundEvent;
    use crate::filter::{FilterEngine, NO_DELAY};
    use crate::rules::{Action, AppActionMode, Condition, Rule, StaticProbes, VoiceParams};
    use crate::snapshot::ConfigSnapshot;

    fn engine(screen_on: bool) -> FilterEngine {
        let mut probes = StaticProbes::now();
        probes.screen_on = screen_on;
        FilterEngine::new(Arc::new(probes))
    }

    fn when_screen_off(action: Action) -> Rule {
        Rule::new("screen-off", "Screen off")
            .with_trigger(Condition::ScreenState { on: false })
            .with_action(action)
    }

    fn snapshot(rules: Vec<Rule>) -> ConfigSnapshot {
        ConfigSnapshot::from_config(&HeraldConfig::default(), rules, 1)
    }

    #[test]
    fn disable_pipeline_blocks() {
        let snap = snapshot(vec![when_screen_off(Action::DisablePipeline)]);
        let result = engine(false).evaluate(&InboundEvent::new("a", "A", "hi"), &snap);
        assert!(!result.should_speak);
        assert_eq!(result.reason, "blocked by rule: Screen off");

        let result = engine(true).evaluate(&InboundEvent::new("a", "A", "hi"), &snap);
        assert!(result.should_speak);
    }

    #[test]
    fn delay_and_voice_flow_into_result() {
        let voice = VoiceParams {
            voice: None,
            rate: Some(0.8),
            pitch: None,
        };
        let rule = when_screen_off(Action::SetDelay { seconds: 12 })
            .with_action(Action::SetVoice(voice.clone()));
        let result =
            engine(false).evaluate(&InboundEvent::new("a", "A", "hi"), &snapshot(vec![rule]));
        assert!(result.should_speak);
        assert_eq!(result.conditional_delay_seconds, 12);
        assert_eq!(result.voice_override, Some(voice));
    }

    #[test]
    fn private_action_redacts_matching_app() {
        let rule = when_screen_off(Action::AppFilter {
            app_ids: vec!["com.chat".to_owned()],
            mode: AppActionMode::Private,
        });
        let snap = snapshot(vec![rule]);
        let redacted = engine(false).evaluate(&InboundEvent::new("com.chat", "Chat", "hi"), &snap);
        assert_eq!(
            redacted.processed_text,
            "You received a private notification from Chat"
        );
        let untouched = engine(false).evaluate(&InboundEvent::new("com.mail", "Mail", "hi"), &snap);
        assert_eq!(untouched.processed_text, "hi");
        assert_eq!(untouched.conditional_delay_seconds, NO_DELAY);
    }
}
