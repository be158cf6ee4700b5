//! Keeping the upstream notification subscription alive.
//!
//! The host can silently drop the listener. [`HealthMonitor`] tracks connect,
//! disconnect and heartbeat timestamps and rations reconnection requests with
//! an exponential backoff and a per-window attempt cap. [`Watchdog`] is an
//! independent low-frequency task that asks for a rebind when the listener
//! has been stale for too long.

pub mod monitor;
pub mod watchdog;

pub use monitor::{HealthMonitor, ListenerHealthState, RebindOutcome, SkipReason};
pub use watchdog::{Watchdog, WatchdogTick};

/// The host's notification subscription.
///
/// Calls are synchronous platform queries; the monitor never holds its lock
/// across them.
pub trait NotificationSource: Send + Sync {
    /// Whether the user has granted notification access.
    fn is_authorized(&self) -> bool;

    /// Ask the host to rebind the listener. Returns whether the request was
    /// issued.
    fn request_resubscribe(&self) -> bool;
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
