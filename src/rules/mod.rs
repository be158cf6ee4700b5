//! Conditional rules: triggers, exceptions and actions joined by logic gates.
//!
//! Rules are authored by an external rule-management collaborator and stored
//! through a [`RuleStore`]. The filter engine only ever reads them, through the
//! copy captured in each [`ConfigSnapshot`](crate::snapshot::ConfigSnapshot).

pub mod evaluator;
pub mod probes;
pub mod store;

pub use evaluator::{RuleEffects, RuleEvaluator};
pub use probes::{AmbientProbes, StaticProbes};
pub use store::{JsonRuleStore, RuleStore};

use serde::{Deserialize, Serialize};

/// Boolean combinator used to fold trigger or exception results.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicGate {
    /// Every operand must be true.
    #[default]
    And,
    /// At least one operand must be true.
    Or,
    /// An odd number of operands must be true.
    Xor,
}

impl LogicGate {
    /// Fold `values` with this gate. An empty operand list is always false.
    pub fn fold(self, values: &[bool]) -> bool {
        if values.is_empty() {
            return false;
        }
        match self {
            Self::And => values.iter().all(|v| *v),
            Self::Or => values.iter().any(|v| *v),
            Self::Xor => values.iter().filter(|v| **v).count() % 2 == 1,
        }
    }
}

/// Day of week for time-window conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<chrono::Weekday> for Day {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Self::Mon,
            chrono::Weekday::Tue => Self::Tue,
            chrono::Weekday::Wed => Self::Wed,
            chrono::Weekday::Thu => Self::Thu,
            chrono::Weekday::Fri => Self::Fri,
            chrono::Weekday::Sat => Self::Sat,
            chrono::Weekday::Sun => Self::Sun,
        }
    }
}

/// A point-in-time device-state condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Paired-device connectivity. An empty list means "any device".
    BluetoothDevice {
        #[serde(default)]
        device_ids: Vec<String>,
        /// Whether the device must be connected (`true`) or absent (`false`).
        connected: bool,
    },
    /// Screen on/off.
    ScreenState { on: bool },
    /// Local time window in minutes since midnight; wraps when `start > end`.
    TimeWindow {
        start_minute: u16,
        end_minute: u16,
        /// Days the window applies on. Empty means every day.
        #[serde(default)]
        days: Vec<Day>,
    },
    /// Current network identity. An empty list means "any network".
    WifiNetwork {
        #[serde(default)]
        ssids: Vec<String>,
        connected: bool,
    },
}

/// Condition that activates a rule.
pub type Trigger = Condition;
/// Condition that vetoes a rule.
pub type Exception = Condition;

/// What an app-filter action does to matching apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppActionMode {
    Block,
    Private,
    /// Lift the app-list entry so the listed apps pass the app stage.
    Allow,
}

/// Voice parameters a rule can impose on the readout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    /// Engine-specific voice identifier.
    pub voice: Option<String>,
    /// Speech rate multiplier (1.0 = normal).
    pub rate: Option<f32>,
    /// Pitch multiplier (1.0 = normal).
    pub pitch: Option<f32>,
}

/// Effect applied while a rule is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Nothing is read while the rule applies.
    DisablePipeline,
    /// Block, privatize or re-admit the listed apps.
    AppFilter {
        app_ids: Vec<String>,
        mode: AppActionMode,
    },
    /// Override the active voice parameters.
    SetVoice(VoiceParams),
    /// Override the readout delay.
    SetDelay { seconds: u32 },
}

/// A user-defined conditional rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub exceptions: Vec<Exception>,
    #[serde(default)]
    pub trigger_logic: LogicGate,
    /// Defaults to `OR`: any one exception vetoes the rule.
    #[serde(default = "default_exception_logic")]
    pub exception_logic: LogicGate,
    /// Unix epoch milliseconds of the last edit.
    #[serde(default)]
    pub modified_at: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_exception_logic() -> LogicGate {
    LogicGate::Or
}

impl Rule {
    /// Create an enabled rule with no clauses.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            triggers: Vec::new(),
            actions: Vec::new(),
            exceptions: Vec::new(),
            trigger_logic: LogicGate::And,
            exception_logic: default_exception_logic(),
            modified_at: 0,
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    #[must_use]
    pub fn with_exception(mut self, exception: Exception) -> Self {
        self.exceptions.push(exception);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn with_logic(mut self, triggers: LogicGate, exceptions: LogicGate) -> Self {
        self.trigger_logic = triggers;
        self.exception_logic = exceptions;
        self
    }
}
