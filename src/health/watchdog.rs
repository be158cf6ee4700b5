//! Periodic watchdog that rebinds a listener that has gone quiet.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HealthMonitor, RebindOutcome, now_epoch_millis};

/// What one watchdog tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTick {
    /// Healthy, or unhealthy but not stale.
    NoOp,
    /// Stale, but the watchdog intervened too recently.
    CoolingDown,
    /// Stale; a rebind was requested through the monitor.
    Rebind(RebindOutcome),
}

pub struct Watchdog {
    monitor: Arc<HealthMonitor>,
    cancel: CancellationToken,
    interval: Duration,
    cooldown_ms: u64,
    log_throttle_ms: u64,
    last_intervention: Option<u64>,
    last_stale_log: Option<u64>,
    stale_logs: u64,
}

impl Watchdog {
    pub fn new(monitor: Arc<HealthMonitor>, cancel: CancellationToken) -> Self {
        let config = monitor.config();
        let interval = Duration::from_secs(config.watchdog_interval_secs.max(1));
        let cooldown_ms = config.watchdog_cooldown_ms;
        let log_throttle_ms = config.log_throttle_ms;
        Self {
            monitor,
            cancel,
            interval,
            cooldown_ms,
            log_throttle_ms,
            last_intervention: None,
            last_stale_log: None,
            stale_logs: 0,
        }
    }

    /// Override the poll interval (useful for testing).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// How many stale warnings were emitted. At most one per throttle window.
    pub fn stale_logs(&self) -> u64 {
        self.stale_logs
    }

    /// Run until the cancellation token is cancelled.
    pub async fn run(mut self) {
        info!(interval = ?self.interval, "listener watchdog started");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("listener watchdog cancelled");
                    break;
                }
                () = tokio::time::sleep(self.interval) => {
                    let tick = self.tick_at(now_epoch_millis());
                    debug!(?tick, "watchdog tick");
                }
            }
        }
    }

    /// One check at `now_ms`.
    pub fn tick_at(&mut self, now_ms: u64) -> WatchdogTick {
        if self.monitor.is_healthy_at(now_ms) || !self.monitor.is_stale_at(now_ms) {
            return WatchdogTick::NoOp;
        }

        let log_due = self
            .last_stale_log
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.log_throttle_ms);
        if log_due {
            warn!("notification listener is stale");
            self.last_stale_log = Some(now_ms);
            self.stale_logs += 1;
        }

        if self
            .last_intervention
            .is_some_and(|at| now_ms.saturating_sub(at) < self.cooldown_ms)
        {
            return WatchdogTick::CoolingDown;
        }
        self.last_intervention = Some(now_ms);
        WatchdogTick::Rebind(self.monitor.request_rebind_at("watchdog", false, now_ms))
    }
}
