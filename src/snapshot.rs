//! Immutable configuration snapshots shared by atomic swap.
//!
//! Every configuration change compiles a fresh [`ConfigSnapshot`] and swaps
//! it into a `tokio::sync::watch` channel. Readers clone the current
//! `Arc<ConfigSnapshot>` once per event, so a single event always sees one
//! consistent version even while settings are being edited.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{
    AppListMode, BehaviorMode, HeraldConfig, MediaMode, PersistenceFilterConfig, WordReplacement,
};
use crate::rules::Rule;

/// Media filter settings, normalized.
#[derive(Debug, Clone, Default)]
pub struct MediaFilterSettings {
    pub enabled: bool,
    pub excepted_apps: HashSet<String>,
    /// Lowercased.
    pub important_keywords: Vec<String>,
}

/// Every setting the filter engine and scheduler read, frozen at one version.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    /// Monotonically increasing per store.
    pub version: u64,
    pub app_list_mode: AppListMode,
    pub apps: HashSet<String>,
    pub private_apps: HashSet<String>,
    /// Lowercased, deduplicated, in configured order.
    pub blocked_words: Vec<String>,
    /// Lowercased, deduplicated, in configured order.
    pub private_words: Vec<String>,
    pub replacements: Vec<WordReplacement>,
    pub media_filter: MediaFilterSettings,
    pub persistence: PersistenceFilterConfig,
    pub behavior_mode: BehaviorMode,
    pub priority_apps: HashSet<String>,
    pub media_mode: MediaMode,
    pub ducking_percent: u8,
    pub delay_seconds: u32,
    pub rules: Vec<Rule>,
}

impl ConfigSnapshot {
    /// Compile a snapshot from the user configuration and rule list.
    pub fn from_config(config: &HeraldConfig, rules: Vec<Rule>, version: u64) -> Self {
        Self {
            version,
            app_list_mode: config.filter.app_list_mode,
            apps: id_set(&config.filter.apps),
            private_apps: id_set(&config.filter.private_apps),
            blocked_words: normalize_words(&config.filter.blocked_words),
            private_words: normalize_words(&config.filter.private_words),
            replacements: config
                .filter
                .replacements
                .iter()
                .filter(|r| !r.from.is_empty())
                .cloned()
                .collect(),
            media_filter: MediaFilterSettings {
                enabled: config.media_filter.enabled,
                excepted_apps: id_set(&config.media_filter.excepted_apps),
                important_keywords: normalize_words(&config.media_filter.important_keywords),
            },
            persistence: config.persistence_filter.clone(),
            behavior_mode: config.behavior.mode,
            priority_apps: id_set(&config.behavior.priority_apps),
            media_mode: config.media.mode,
            ducking_percent: config.media.ducking_percent.min(100),
            delay_seconds: config.behavior.delay_seconds,
            rules,
        }
    }

    /// Whether `source_id` is a priority app for smart mode.
    pub fn is_priority(&self, source_id: &str) -> bool {
        self.priority_apps.contains(source_id)
    }
}

fn id_set(ids: &[String]) -> HashSet<String> {
    ids.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_words(words: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Owner of the current snapshot. Share it behind an `Arc`.
pub struct SnapshotStore {
    tx: watch::Sender<Arc<ConfigSnapshot>>,
}

impl SnapshotStore {
    /// Create a store holding version 1 of the given configuration.
    pub fn new(config: &HeraldConfig, rules: Vec<Rule>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(ConfigSnapshot::from_config(config, rules, 1)));
        Self { tx }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receive every future swap.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }

    /// Rebuild from `config`, keeping the current rules. Returns the new version.
    ///
    /// This is the hook the configuration store calls with the name of the
    /// setting that changed.
    pub fn apply_setting_change(&self, key: &str, config: &HeraldConfig) -> u64 {
        let mut version = 0;
        self.tx.send_modify(|current| {
            version = current.version + 1;
            let rules = current.rules.clone();
            *current = Arc::new(ConfigSnapshot::from_config(config, rules, version));
        });
        info!(setting = key, version, "config snapshot rebuilt");
        version
    }

    /// Swap in a new rule list, keeping every other setting.
    pub fn replace_rules(&self, rules: Vec<Rule>) -> u64 {
        let mut version = 0;
        self.tx.send_modify(|current| {
            let mut next = ConfigSnapshot::clone(current);
            next.version += 1;
            next.rules = rules;
            version = next.version;
            *current = Arc::new(next);
        });
        debug!(version, "rule list swapped");
        version
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::rules::{Action, Condition};

    #[test]
    fn words_are_lowercased_and_deduplicated() {
        let mut config = HeraldConfig::default();
        config.filter.blocked_words = vec![
            "OTP".to_owned(),
            " otp ".to_owned(),
            String::new(),
            "Code".to_owned(),
        ];
        let snap = ConfigSnapshot::from_config(&config, Vec::new(), 1);
        assert_eq!(snap.blocked_words, vec!["otp".to_owned(), "code".to_owned()]);
    }

    #[test]
    fn setting_change_bumps_version_and_keeps_rules() {
        let config = HeraldConfig::default();
        let rule = Rule::new("r", "r")
            .with_trigger(Condition::ScreenState { on: false })
            .with_action(Action::DisablePipeline);
        let store = SnapshotStore::new(&config, vec![rule]);
        let before = store.current();
        assert_eq!(before.version, 1);

        let mut changed = config.clone();
        changed.behavior.mode = BehaviorMode::Queue;
        let version = store.apply_setting_change("behavior.mode", &changed);
        assert_eq!(version, 2);

        let after = store.current();
        assert_eq!(after.behavior_mode, BehaviorMode::Queue);
        assert_eq!(after.rules.len(), 1);
        // The old snapshot is untouched.
        assert_eq!(before.behavior_mode, BehaviorMode::Interrupt);
    }

    #[test]
    fn replace_rules_keeps_settings() {
        let mut config = HeraldConfig::default();
        config.behavior.delay_seconds = 7;
        let store = SnapshotStore::new(&config, Vec::new());
        assert_eq!(store.replace_rules(vec![Rule::new("x", "x")]), 2);
        let snap = store.current();
        assert_eq!(snap.delay_seconds, 7);
        assert_eq!(snap.rules[0].id, "x");
    }

    #[tokio::test]
    async fn subscribers_observe_swaps() {
        let store = SnapshotStore::new(&HeraldConfig::default(), Vec::new());
        let mut rx = store.subscribe();
        store.apply_setting_change("media.mode", &HeraldConfig::default());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version, 2);
    }
}
