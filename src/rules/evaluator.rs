//! Rule evaluation against ambient device state.
//!
//! Each enabled rule is evaluated independently: triggers fold with the rule's
//! trigger gate, exceptions with its exception gate, and the rule applies iff
//! the triggers hold and the exceptions do not. Actions of applicable rules
//! accumulate in rule order. Block effects are OR'd; delay, privacy and voice
//! are last-write-wins.

use chrono::{Datelike, Timelike};
use tracing::{debug, warn};

use super::probes::AmbientProbes;
use super::{Action, AppActionMode, Condition, Day, Rule, VoiceParams};
use crate::error::EvaluationError;
use crate::event::InboundEvent;

/// Accumulated effect of every applicable rule for one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleEffects {
    /// Set when any applicable rule blocks this event. Holds that rule's name.
    pub blocked_by: Option<String>,
    /// Last privacy decision from an applicable rule.
    pub private: Option<bool>,
    /// Last delay override from an applicable rule.
    pub delay_seconds: Option<u32>,
    /// Last voice override from an applicable rule.
    pub voice: Option<VoiceParams>,
    /// An applicable rule re-admits this event's app past the app list.
    pub app_list_lifted: bool,
    /// IDs of rules that applied, in order.
    pub applied: Vec<String>,
}

impl RuleEffects {
    /// Whether no applicable rule changed anything.
    pub fn is_empty(&self) -> bool {
        self.blocked_by.is_none()
            && self.private.is_none()
            && self.delay_seconds.is_none()
            && self.voice.is_none()
            && !self.app_list_lifted
    }
}

/// Evaluates rules against a set of ambient probes.
pub struct RuleEvaluator<'a> {
    probes: &'a dyn AmbientProbes,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(probes: &'a dyn AmbientProbes) -> Self {
        Self { probes }
    }

    /// Evaluate every enabled rule for `event`.
    ///
    /// A rule whose conditions cannot be evaluated is logged and skipped.
    pub fn evaluate(&self, rules: &[Rule], event: &InboundEvent) -> RuleEffects {
        let mut effects = RuleEffects::default();

        for rule in rules.iter().filter(|r| r.enabled) {
            match self.rule_applies(rule) {
                Ok(true) => {
                    debug!(rule = %rule.id, "rule applies");
                    apply_actions(rule, event, &mut effects);
                    effects.applied.push(rule.id.clone());
                }
                Ok(false) => {}
                Err(e) => warn!(rule = %rule.id, "skipping rule: {e}"),
            }
        }

        effects
    }

    /// Whether the rule's triggers hold and its exceptions do not.
    pub fn rule_applies(&self, rule: &Rule) -> Result<bool, EvaluationError> {
        let triggers = rule
            .triggers
            .iter()
            .map(|c| self.condition_holds(c))
            .collect::<Result<Vec<_>, _>>()?;
        if !rule.trigger_logic.fold(&triggers) {
            return Ok(false);
        }

        let exceptions = rule
            .exceptions
            .iter()
            .map(|c| self.condition_holds(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(!rule.exception_logic.fold(&exceptions))
    }

    /// Evaluate a single condition against the probes.
    pub fn condition_holds(&self, condition: &Condition) -> Result<bool, EvaluationError> {
        match condition {
            Condition::BluetoothDevice {
                device_ids,
                connected,
            } => {
                let current = self.probes.connected_devices()?;
                let any_match = if device_ids.is_empty() {
                    !current.is_empty()
                } else {
                    device_ids.iter().any(|id| current.contains(id))
                };
                Ok(any_match == *connected)
            }
            Condition::ScreenState { on } => Ok(self.probes.screen_on()? == *on),
            Condition::TimeWindow {
                start_minute,
                end_minute,
                days,
            } => {
                let now = self.probes.local_time()?;
                let day = Day::from(now.weekday());
                if !days.is_empty() && !days.contains(&day) {
                    return Ok(false);
                }
                let minute = (now.hour() * 60 + now.minute()) as u16;
                Ok(minute_in_window(minute, *start_minute, *end_minute))
            }
            Condition::WifiNetwork { ssids, connected } => {
                let current = self.probes.network_identity()?;
                let any_match = match &current {
                    Some(id) => ssids.is_empty() || ssids.iter().any(|s| s == id),
                    None => false,
                };
                Ok(any_match == *connected)
            }
        }
    }
}

/// `start == end` covers the whole day; `start > end` wraps past midnight.
fn minute_in_window(minute: u16, start: u16, end: u16) -> bool {
    match start.cmp(&end) {
        std::cmp::Ordering::Equal => true,
        std::cmp::Ordering::Less => minute >= start && minute < end,
        std::cmp::Ordering::Greater => minute >= start || minute < end,
    }
}

fn apply_actions(rule: &Rule, event: &InboundEvent, effects: &mut RuleEffects) {
    let label = if rule.name.is_empty() {
        rule.id.clone()
    } else {
        rule.name.clone()
    };

    for action in &rule.actions {
        match action {
            Action::DisablePipeline => {
                effects.blocked_by.get_or_insert_with(|| label.clone());
            }
            Action::AppFilter { app_ids, mode } => {
                if !app_ids.iter().any(|id| id == &event.source_id) {
                    continue;
                }
                match mode {
                    AppActionMode::Block => {
                        effects.blocked_by.get_or_insert_with(|| label.clone());
                    }
                    AppActionMode::Private => effects.private = Some(true),
                    AppActionMode::Allow => effects.app_list_lifted = true,
                }
            }
            Action::SetVoice(params) => effects.voice = Some(params.clone()),
            Action::SetDelay { seconds } => effects.delay_seconds = Some(*seconds),
        }
    }
}
