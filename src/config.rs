//! Configuration types for the notification pipeline.
//!
//! [`HeraldConfig`] is the on-disk (TOML) shape of every user setting. It is
//! never read directly by the filter engine or scheduler; instead it is
//! compiled into an immutable [`ConfigSnapshot`](crate::snapshot::ConfigSnapshot)
//! whenever a setting changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HeraldError, Result};

/// Top-level configuration for the notification pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// App allow/deny lists and word filters.
    pub filter: FilterConfig,
    /// Media notification detection.
    pub media_filter: MediaFilterConfig,
    /// Persistent/silent notification categories.
    pub persistence_filter: PersistenceFilterConfig,
    /// How concurrent readouts are arbitrated.
    pub behavior: BehaviorConfig,
    /// Coexistence with external audio playback.
    pub media: MediaCoexistenceConfig,
    /// Listener health monitor and watchdog tuning.
    pub health: HealthConfig,
    /// Delivery coordinator tuning.
    pub delivery: DeliveryConfig,
    /// Recent-history window.
    pub history: HistoryConfig,
    /// Conditional rule storage.
    pub rules: RulesConfig,
}

/// How the app list is interpreted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppListMode {
    /// App list ignored.
    #[default]
    None,
    /// Only listed apps are spoken.
    Allow,
    /// Listed apps are never spoken.
    Deny,
}

/// A single case-insensitive word replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordReplacement {
    /// Text to find (case-insensitive).
    pub from: String,
    /// Replacement text, inserted verbatim.
    pub to: String,
}

/// App list and word filter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Interpretation of `apps`.
    pub app_list_mode: AppListMode,
    /// Source identifiers for the allow/deny list.
    pub apps: Vec<String>,
    /// Apps whose notifications are always read as a privacy placeholder.
    pub private_apps: Vec<String>,
    /// Any notification containing one of these words is not spoken.
    pub blocked_words: Vec<String>,
    /// Any notification containing one of these words is redacted.
    pub private_words: Vec<String>,
    /// Replacements applied in order after blocking and redaction.
    pub replacements: Vec<WordReplacement>,
}

/// Media notification filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFilterConfig {
    /// Whether media notifications are suppressed.
    pub enabled: bool,
    /// Apps whose media notifications are still spoken.
    pub excepted_apps: Vec<String>,
    /// Media notifications containing one of these keywords are still spoken.
    pub important_keywords: Vec<String>,
}

impl Default for MediaFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            excepted_apps: Vec::new(),
            important_keywords: [
                "reply", "replied", "mention", "mentioned", "live", "comment", "message",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
        }
    }
}

/// Independently toggled persistent/silent notification categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceFilterConfig {
    /// Ongoing or non-clearable notifications.
    pub persistent: bool,
    /// Notifications with neither sound nor vibration.
    pub silent: bool,
    /// Foreground-service notifications.
    pub foreground_service: bool,
    /// Notifications below default priority.
    pub low_priority: bool,
    /// Notifications posted by the operating system itself.
    pub system: bool,
}

impl Default for PersistenceFilterConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            silent: false,
            foreground_service: true,
            low_priority: false,
            system: true,
        }
    }
}

/// Arbitration policy for a new readout while another is pending.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorMode {
    /// Stop whatever is speaking and read the new notification.
    #[default]
    Interrupt,
    /// Read notifications one after another in arrival order.
    Queue,
    /// Drop new notifications while something is speaking.
    Skip,
    /// Priority apps interrupt, everything else queues.
    Smart,
}

/// Delivery behavior settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Arbitration policy.
    pub mode: BehaviorMode,
    /// Apps treated as priority in [`BehaviorMode::Smart`].
    pub priority_apps: Vec<String>,
    /// Seconds to wait before reading a notification (0 = immediately).
    pub delay_seconds: u32,
}

/// What to do with a readout while external media is playing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    /// Speak over the media.
    #[default]
    Ignore,
    /// Ask the platform for transient exclusive focus.
    Pause,
    /// Lower media volume while speaking.
    Duck,
    /// Do not speak while media is playing.
    Silence,
}

/// Media coexistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaCoexistenceConfig {
    /// Coexistence policy.
    pub mode: MediaMode,
    /// Target media volume while ducked, as a percentage of the maximum.
    pub ducking_percent: u8,
}

impl Default for MediaCoexistenceConfig {
    fn default() -> Self {
        Self {
            mode: MediaMode::Ignore,
            ducking_percent: 30,
        }
    }
}

/// Listener health monitor and watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Backoff after a successful connection or forced rebind.
    pub base_backoff_ms: u64,
    /// Upper bound for the doubling backoff.
    pub max_backoff_ms: u64,
    /// Length of the rebind attempt-counting window.
    pub attempt_window_ms: u64,
    /// Non-forced rebind attempts allowed per window.
    pub max_attempts_per_window: u32,
    /// Silence after which the listener is considered stale.
    pub stale_threshold_ms: u64,
    /// Watchdog poll interval.
    pub watchdog_interval_secs: u64,
    /// Minimum spacing between watchdog interventions.
    pub watchdog_cooldown_ms: u64,
    /// Minimum spacing between repeated "stale" log lines.
    pub log_throttle_ms: u64,
    /// A connection this soon after a rebind attempt counts as a recovery.
    pub recovery_window_ms: u64,
    /// Where the health state is persisted (None = default location).
    pub state_path: Option<PathBuf>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 5_000,
            max_backoff_ms: 5 * 60_000,
            attempt_window_ms: 10 * 60_000,
            max_attempts_per_window: 6,
            stale_threshold_ms: 30 * 60_000,
            watchdog_interval_secs: 300,
            watchdog_cooldown_ms: 10 * 60_000,
            log_throttle_ms: 30 * 60_000,
            recovery_window_ms: 60_000,
            state_path: None,
        }
    }
}

/// Delivery coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Hard ceiling on one utterance before its resources are force-released.
    pub safety_timeout_secs: u64,
    /// Capacity of the coordinator inbox.
    pub inbox_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            safety_timeout_secs: 30,
            inbox_capacity: 64,
        }
    }
}

/// Recent notification history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of recent filter decisions kept in memory.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

/// Conditional rule storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// JSON rule file (None = default location).
    pub path: Option<PathBuf>,
}

impl HeraldConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| HeraldError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HeraldError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.media.ducking_percent > 100 {
            return Err(HeraldError::Config(format!(
                "media.ducking_percent must be 0-100, got {}",
                self.media.ducking_percent
            )));
        }
        if self.health.base_backoff_ms == 0 {
            return Err(HeraldError::Config(
                "health.base_backoff_ms must be positive".to_owned(),
            ));
        }
        if self.health.base_backoff_ms > self.health.max_backoff_ms {
            return Err(HeraldError::Config(format!(
                "health.base_backoff_ms ({}) exceeds health.max_backoff_ms ({})",
                self.health.base_backoff_ms, self.health.max_backoff_ms
            )));
        }
        if self.delivery.inbox_capacity == 0 {
            return Err(HeraldError::Config(
                "delivery.inbox_capacity must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/herald/config.toml`.
    pub fn default_config_path() -> PathBuf {
        data_root().join("config.toml")
    }

    /// Resolved health state path.
    pub fn health_state_path(&self) -> PathBuf {
        self.health
            .state_path
            .clone()
            .unwrap_or_else(|| data_root().join("listener_health.json"))
    }

    /// Resolved rule file path.
    pub fn rules_path(&self) -> PathBuf {
        self.rules
            .path
            .clone()
            .unwrap_or_else(|| data_root().join("rules.json"))
    }
}

fn data_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp/herald-config"))
        .join("herald")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HeraldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.behavior.mode, BehaviorMode::Interrupt);
        assert_eq!(config.media.mode, MediaMode::Ignore);
        assert!(config.media_filter.enabled);
        assert!(config.health.base_backoff_ms <= config.health.max_backoff_ms);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = HeraldConfig::default();
        config.filter.blocked_words = vec!["otp".to_owned()];
        config.filter.replacements = vec![WordReplacement {
            from: "lol".to_owned(),
            to: "laughing".to_owned(),
        }];
        config.behavior.mode = BehaviorMode::Smart;
        config.media.mode = MediaMode::Duck;

        config.save_to_file(&path).unwrap();
        let loaded = HeraldConfig::from_file(&path).unwrap();
        assert_eq!(loaded.filter.blocked_words, vec!["otp".to_owned()]);
        assert_eq!(loaded.filter.replacements[0].to, "laughing");
        assert_eq!(loaded.behavior.mode, BehaviorMode::Smart);
        assert_eq!(loaded.media.mode, MediaMode::Duck);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = HeraldConfig::from_file(Path::new("/nonexistent/herald/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            HeraldConfig::from_file(&path),
            Err(HeraldError::Config(_))
        ));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[behavior]
mode = "queue"
delay_seconds = 3

[filter]
app_list_mode = "deny"
apps = ["com.example.chat"]
"#;
        let config: HeraldConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.behavior.mode, BehaviorMode::Queue);
        assert_eq!(config.behavior.delay_seconds, 3);
        assert_eq!(config.filter.app_list_mode, AppListMode::Deny);
        assert_eq!(config.media.ducking_percent, 30);
        assert_eq!(config.health.max_attempts_per_window, 6);
    }

    #[test]
    fn ducking_above_hundred_is_rejected() {
        let mut config = HeraldConfig::default();
        config.media.ducking_percent = 140;
        assert!(config.validate().is_err());
    }

    #[test]
    fn base_backoff_above_max_is_rejected() {
        let mut config = HeraldConfig::default();
        config.health.base_backoff_ms = 10_000;
        config.health.max_backoff_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn behavior_mode_deserializes() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: BehaviorMode,
        }

        for (raw, expected) in [
            ("interrupt", BehaviorMode::Interrupt),
            ("queue", BehaviorMode::Queue),
            ("skip", BehaviorMode::Skip),
            ("smart", BehaviorMode::Smart),
        ] {
            let parsed: Wrapper = toml::from_str(&format!("mode = \"{raw}\"")).unwrap();
            assert_eq!(parsed.mode, expected);
        }
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = HeraldConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("herald"));
    }
}
