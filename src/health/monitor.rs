//! Listener health state and the rebind protocol.
//!
//! Pure logic over epoch-millisecond timestamps. Every public operation has
//! an `*_at(now_ms)` form so tests can drive the clock; the plain forms read
//! the wall clock. State lives behind one mutex and is persisted as JSON
//! after each change.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{NotificationSource, now_epoch_millis};
use crate::config::HealthConfig;
use crate::error::Result;
use crate::persist::{read_json_lenient, write_json_atomic};
use crate::stats::PipelineStats;

/// Heartbeats are persisted at most this often.
const HEARTBEAT_PERSIST_INTERVAL_MS: u64 = 60_000;

/// Persisted listener connection history. All timestamps are epoch ms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerHealthState {
    pub last_connect: Option<u64>,
    pub last_disconnect: Option<u64>,
    pub last_rebind_attempt: Option<u64>,
    pub last_rebind_success: Option<u64>,
    pub last_heartbeat: Option<u64>,
    pub current_backoff_ms: u64,
    pub attempt_window_start: Option<u64>,
    pub attempts_in_window: u32,
}

/// Why a rebind request was not issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PermissionMissing,
    LimitReached,
    Cooldown,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PermissionMissing => "permission_missing",
            Self::LimitReached => "limit_reached",
            Self::Cooldown => "cooldown",
        })
    }
}

/// Result of [`HealthMonitor::request_rebind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebindOutcome {
    Requested,
    Skipped(SkipReason),
}

pub struct HealthMonitor {
    config: HealthConfig,
    source: Arc<dyn NotificationSource>,
    state: Mutex<ListenerHealthState>,
    path: Option<PathBuf>,
    stats: Option<Arc<PipelineStats>>,
}

impl HealthMonitor {
    /// In-memory monitor starting from a blank history.
    pub fn new(config: HealthConfig, source: Arc<dyn NotificationSource>) -> Self {
        let state = ListenerHealthState {
            current_backoff_ms: config.base_backoff_ms,
            ..ListenerHealthState::default()
        };
        Self {
            config,
            source,
            state: Mutex::new(state),
            path: None,
            stats: None,
        }
    }

    /// Load state from `path` (if present) and persist every change there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn with_persistence(mut self, path: PathBuf) -> Result<Self> {
        if let Some(mut loaded) = read_json_lenient::<ListenerHealthState>(&path)? {
            loaded.current_backoff_ms = loaded
                .current_backoff_ms
                .clamp(self.config.base_backoff_ms, self.config.max_backoff_ms);
            debug!(path = %path.display(), "loaded listener health state");
            *self.lock() = loaded;
        }
        self.path = Some(path);
        Ok(self)
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Copy of the current state.
    pub fn state(&self) -> ListenerHealthState {
        self.lock().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy_at(now_epoch_millis())
    }

    /// Permission granted, not disconnected since the last connect, not stale.
    pub fn is_healthy_at(&self, now_ms: u64) -> bool {
        if !self.source.is_authorized() {
            return false;
        }
        let state = self.lock();
        !disconnected(&state) && !self.stale(&state, now_ms)
    }

    /// No connect or heartbeat within the stale threshold. Never having
    /// connected counts as stale.
    pub fn is_stale_at(&self, now_ms: u64) -> bool {
        self.stale(&self.lock(), now_ms)
    }

    pub fn request_rebind(&self, reason: &str, force: bool) -> RebindOutcome {
        self.request_rebind_at(reason, force, now_epoch_millis())
    }

    /// Ask the host to rebind unless permission, the attempt cap or the
    /// backoff says otherwise. `force` bypasses cap and backoff and resets
    /// the backoff to its base.
    pub fn request_rebind_at(&self, reason: &str, force: bool, now_ms: u64) -> RebindOutcome {
        let authorized = self.source.is_authorized();
        let outcome = {
            let mut state = self.lock();
            let outcome = self.decide(&mut state, authorized, force, now_ms);
            if let RebindOutcome::Requested = outcome {
                state.current_backoff_ms = if force {
                    self.config.base_backoff_ms
                } else {
                    state
                        .current_backoff_ms
                        .saturating_mul(2)
                        .min(self.config.max_backoff_ms)
                };
                state.attempts_in_window += 1;
                if state.attempt_window_start.is_none() {
                    state.attempt_window_start = Some(now_ms);
                }
            }
            self.persist(&state);
            outcome
        };

        match outcome {
            RebindOutcome::Requested => {
                let issued = self.source.request_resubscribe();
                info!(reason, force, issued, "listener rebind requested");
                if let Some(stats) = &self.stats {
                    stats.record_rebind_requested();
                }
            }
            RebindOutcome::Skipped(skip) => {
                debug!(reason, %skip, "listener rebind skipped");
                if let Some(stats) = &self.stats {
                    stats.record_rebind_skipped();
                }
            }
        }
        outcome
    }

    pub fn record_connection(&self) -> bool {
        self.record_connection_at(now_epoch_millis())
    }

    /// The listener connected. Resets backoff and the attempt window.
    /// Returns whether this counts as recovery from a recent rebind attempt.
    pub fn record_connection_at(&self, now_ms: u64) -> bool {
        let recovered = {
            let mut state = self.lock();
            let recovered = state
                .last_rebind_attempt
                .is_some_and(|at| now_ms >= at && now_ms - at <= self.config.recovery_window_ms);
            state.last_connect = Some(now_ms);
            state.last_rebind_success = Some(now_ms);
            state.current_backoff_ms = self.config.base_backoff_ms;
            state.attempt_window_start = None;
            state.attempts_in_window = 0;
            self.persist(&state);
            recovered
        };
        info!(recovered, "listener connected");
        if recovered {
            if let Some(stats) = &self.stats {
                stats.record_rebind_recovered();
            }
        }
        recovered
    }

    pub fn record_disconnect(&self) {
        self.record_disconnect_at(now_epoch_millis());
    }

    pub fn record_disconnect_at(&self, now_ms: u64) {
        let mut state = self.lock();
        state.last_disconnect = Some(now_ms);
        self.persist(&state);
        warn!("listener disconnected");
    }

    pub fn record_heartbeat(&self) {
        self.record_heartbeat_at(now_epoch_millis());
    }

    /// An event arrived, so the listener is alive.
    pub fn record_heartbeat_at(&self, now_ms: u64) {
        let mut state = self.lock();
        let previous = state.last_heartbeat.replace(now_ms);
        let due =
            previous.is_none_or(|p| now_ms.saturating_sub(p) >= HEARTBEAT_PERSIST_INTERVAL_MS);
        if due {
            self.persist(&state);
        }
    }

    fn decide(
        &self,
        state: &mut ListenerHealthState,
        authorized: bool,
        force: bool,
        now_ms: u64,
    ) -> RebindOutcome {
        if !authorized {
            state.last_rebind_attempt = Some(now_ms);
            return RebindOutcome::Skipped(SkipReason::PermissionMissing);
        }
        if !force {
            let window_open = state
                .attempt_window_start
                .is_some_and(|start| now_ms.saturating_sub(start) < self.config.attempt_window_ms);
            if !window_open {
                state.attempt_window_start = Some(now_ms);
                state.attempts_in_window = 0;
            }
            if state.attempts_in_window >= self.config.max_attempts_per_window {
                return RebindOutcome::Skipped(SkipReason::LimitReached);
            }
            if state
                .last_rebind_attempt
                .is_some_and(|last| now_ms.saturating_sub(last) < state.current_backoff_ms)
            {
                return RebindOutcome::Skipped(SkipReason::Cooldown);
            }
        }
        state.last_rebind_attempt = Some(now_ms);
        RebindOutcome::Requested
    }

    fn stale(&self, state: &ListenerHealthState, now_ms: u64) -> bool {
        match state.last_connect.max(state.last_heartbeat) {
            None => true,
            Some(seen) => now_ms.saturating_sub(seen) > self.config.stale_threshold_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListenerHealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &ListenerHealthState) {
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, state) {
                warn!(path = %path.display(), "failed to persist listener health: {e}");
            }
        }
    }
}

fn disconnected(state: &ListenerHealthState) -> bool {
    match (state.last_disconnect, state.last_connect) {
        (Some(disconnect), Some(connect)) => disconnect > connect,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeSource {
        authorized: AtomicBool,
        requests: AtomicU32,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                authorized: AtomicBool::new(true),
                requests: AtomicU32::new(0),
            })
        }
    }

    impl NotificationSource for FakeSource {
        fn is_authorized(&self) -> bool {
            self.authorized.load(Ordering::SeqCst)
        }

        fn request_resubscribe(&self) -> bool {
            self.requests.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    const T0: u64 = 1_700_000_000_000;

    fn monitor(source: &Arc<FakeSource>) -> HealthMonitor {
        HealthMonitor::new(HealthConfig::default(), source.clone())
    }

    #[test]
    fn never_connected_is_unhealthy() {
        let m = monitor(&FakeSource::new());
        assert!(m.is_stale_at(T0));
        assert!(!m.is_healthy_at(T0));
    }

    #[test]
    fn connection_then_disconnect_then_reconnect() {
        let m = monitor(&FakeSource::new());
        m.record_connection_at(T0);
        assert!(m.is_healthy_at(T0 + 1_000));
        m.record_disconnect_at(T0 + 2_000);
        assert!(!m.is_healthy_at(T0 + 3_000));
        m.record_connection_at(T0 + 4_000);
        assert!(m.is_healthy_at(T0 + 5_000));
    }

    #[test]
    fn heartbeat_keeps_listener_fresh() {
        let m = monitor(&FakeSource::new());
        let threshold = HealthConfig::default().stale_threshold_ms;
        m.record_connection_at(T0);
        assert!(!m.is_healthy_at(T0 + threshold + 1));
        m.record_heartbeat_at(T0 + threshold);
        assert!(m.is_healthy_at(T0 + threshold + 1));
    }

    #[test]
    fn missing_permission_is_unhealthy_and_skips() {
        let source = FakeSource::new();
        let m = monitor(&source);
        m.record_connection_at(T0);
        source.authorized.store(false, Ordering::SeqCst);
        assert!(!m.is_healthy_at(T0 + 1));

        let before = m.state().current_backoff_ms;
        assert_eq!(
            m.request_rebind_at("test", false, T0 + 10),
            RebindOutcome::Skipped(SkipReason::PermissionMissing)
        );
        let state = m.state();
        assert_eq!(state.last_rebind_attempt, Some(T0 + 10));
        assert_eq!(state.current_backoff_ms, before);
        assert_eq!(source.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn request_within_backoff_is_cooldown() {
        let m = monitor(&FakeSource::new());
        {
            let mut state = m.lock();
            state.last_rebind_attempt = Some(T0);
            state.current_backoff_ms = 15_000;
        }
        assert_eq!(
            m.request_rebind_at("test", false, T0 + 10_000),
            RebindOutcome::Skipped(SkipReason::Cooldown)
        );
        assert_eq!(
            m.request_rebind_at("test", false, T0 + 15_000),
            RebindOutcome::Requested
        );
    }

    #[test]
    fn backoff_doubles_to_max_and_resets_on_connection() {
        let source = FakeSource::new();
        let config = HealthConfig {
            max_attempts_per_window: 100,
            ..HealthConfig::default()
        };
        let m = HealthMonitor::new(config.clone(), source.clone());

        let mut now = T0;
        let mut expected = config.base_backoff_ms;
        for _ in 0..10 {
            assert_eq!(m.request_rebind_at("test", false, now), RebindOutcome::Requested);
            expected = (expected * 2).min(config.max_backoff_ms);
            assert_eq!(m.state().current_backoff_ms, expected);
            now += m.state().current_backoff_ms;
        }
        assert_eq!(m.state().current_backoff_ms, config.max_backoff_ms);

        m.record_connection_at(now);
        assert_eq!(m.state().current_backoff_ms, config.base_backoff_ms);
        assert_eq!(m.state().attempts_in_window, 0);
    }

    #[test]
    fn attempt_cap_then_new_window() {
        let config = HealthConfig {
            base_backoff_ms: 1_000,
            max_backoff_ms: 4_000,
            ..HealthConfig::default()
        };
        let m = HealthMonitor::new(config.clone(), FakeSource::new());
        let mut now = T0;
        for _ in 0..config.max_attempts_per_window {
            assert_eq!(m.request_rebind_at("test", false, now), RebindOutcome::Requested);
            now += m.state().current_backoff_ms;
        }
        assert!(now - T0 < config.attempt_window_ms);
        assert_eq!(
            m.request_rebind_at("test", false, now),
            RebindOutcome::Skipped(SkipReason::LimitReached)
        );

        let next_window = T0 + config.attempt_window_ms + m.state().current_backoff_ms;
        assert_eq!(
            m.request_rebind_at("test", false, next_window),
            RebindOutcome::Requested
        );
        assert_eq!(m.state().attempts_in_window, 1);
    }

    #[test]
    fn force_bypasses_cooldown_and_resets_backoff() {
        let source = FakeSource::new();
        let m = monitor(&source);
        m.request_rebind_at("test", false, T0);
        m.request_rebind_at("test", false, T0 + 10_000);
        assert!(m.state().current_backoff_ms > HealthConfig::default().base_backoff_ms);

        assert_eq!(m.request_rebind_at("user", true, T0 + 10_001), RebindOutcome::Requested);
        assert_eq!(
            m.state().current_backoff_ms,
            HealthConfig::default().base_backoff_ms
        );
        assert_eq!(source.requests.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn connection_soon_after_attempt_counts_as_recovery() {
        let stats = Arc::new(PipelineStats::new());
        let m = monitor(&FakeSource::new()).with_stats(Arc::clone(&stats));
        m.request_rebind_at("test", false, T0);
        assert!(m.record_connection_at(T0 + 30_000));
        assert!(!m.record_connection_at(T0 + 10 * 60_000));
        let snap = stats.snapshot();
        assert_eq!(snap.rebinds_recovered, 1);
        assert_eq!(snap.rebinds_requested, 1);
    }

    #[test]
    fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health").join("listener_health.json");
        let source = FakeSource::new();

        let m = monitor(&source).with_persistence(path.clone()).unwrap();
        m.record_connection_at(T0);
        m.request_rebind_at("test", false, T0 + 1);
        drop(m);

        let reloaded = monitor(&source).with_persistence(path).unwrap();
        let state = reloaded.state();
        assert_eq!(state.last_connect, Some(T0));
        assert_eq!(state.last_rebind_attempt, Some(T0 + 1));
        assert_eq!(state.attempts_in_window, 1);
    }

    #[test]
    fn corrupt_state_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listener_health.json");
        std::fs::write(&path, "{not json").unwrap();
        let m = monitor(&FakeSource::new()).with_persistence(path).unwrap();
        assert_eq!(m.state().last_connect, None);
        assert_eq!(
            m.state().current_backoff_ms,
            HealthConfig::default().base_backoff_ms
        );
    }
}
