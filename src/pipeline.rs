//! Wiring: one inbound event from the host to a delivery decision.
//!
//! [`NotificationPipeline`] owns the snapshot store, the filter engine, the
//! delivery coordinator and the listener watchdog. Each event records a
//! heartbeat, reads exactly one snapshot, runs the filters and, if it
//! passes, is handed to the coordinator as a [`QueuedItem`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HeraldConfig;
use crate::delivery::{AudioSystem, DeliveryCoordinator, DeliveryHandle, QueuedItem, SpeechEngine};
use crate::error::Result;
use crate::event::InboundEvent;
use crate::filter::{FilterEngine, FilterResult};
use crate::health::{HealthMonitor, NotificationSource, Watchdog, now_epoch_millis};
use crate::history::{HistoryEntry, RecentHistory};
use crate::rules::{AmbientProbes, RuleStore};
use crate::snapshot::SnapshotStore;
use crate::stats::{PipelineStats, StatsSnapshot};

/// Everything the host platform supplies.
pub struct Collaborators {
    pub speech: Arc<dyn SpeechEngine>,
    pub audio: Arc<dyn AudioSystem>,
    pub source: Arc<dyn NotificationSource>,
    pub probes: Arc<dyn AmbientProbes>,
    pub rules: Arc<dyn RuleStore>,
}

pub struct NotificationPipeline {
    snapshots: Arc<SnapshotStore>,
    engine: FilterEngine,
    delivery: DeliveryHandle,
    health: Arc<HealthMonitor>,
    rules: Arc<dyn RuleStore>,
    stats: Arc<PipelineStats>,
    history: RecentHistory,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NotificationPipeline {
    /// Build the pipeline and spawn its background tasks on the current
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted listener health state exists but
    /// cannot be read.
    pub fn start(config: &HeraldConfig, host: Collaborators) -> Result<Self> {
        let cancel = CancellationToken::new();
        let stats = Arc::new(PipelineStats::new());

        let rules = host.rules.list().unwrap_or_else(|e| {
            warn!("failed to load rules, starting without any: {e}");
            Vec::new()
        });
        let snapshots = Arc::new(SnapshotStore::new(config, rules));

        let health = Arc::new(
            HealthMonitor::new(config.health.clone(), host.source)
                .with_persistence(config.health_state_path())?
                .with_stats(Arc::clone(&stats)),
        );

        let (delivery, delivery_task) = DeliveryCoordinator::spawn(
            &config.delivery,
            host.speech,
            host.audio,
            Arc::clone(&stats),
            cancel.child_token(),
        );
        let watchdog = Watchdog::new(Arc::clone(&health), cancel.child_token());
        let watchdog_task = tokio::spawn(watchdog.run());

        info!(
            version = snapshots.current().version,
            "notification pipeline started"
        );
        Ok(Self {
            snapshots,
            engine: FilterEngine::new(host.probes),
            delivery,
            health,
            rules: host.rules,
            stats,
            history: RecentHistory::new(config.history.capacity),
            cancel,
            tasks: vec![delivery_task, watchdog_task],
        })
    }

    /// Filter `event` and, if it passes, queue it for speech.
    ///
    /// # Errors
    ///
    /// Returns an error only if the delivery coordinator has stopped.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<FilterResult> {
        self.health.record_heartbeat();
        self.stats.record_received();

        let snapshot = self.snapshots.current();
        let result = self.engine.evaluate(&event, &snapshot);
        self.history.record(HistoryEntry {
            at_ms: now_epoch_millis(),
            source_id: event.source_id.clone(),
            app_name: event.display_name().to_owned(),
            spoken: result.should_speak,
            text: result.processed_text.clone(),
            reason: result.reason.clone(),
        });

        if !result.should_speak {
            debug!(source = %event.source_id, reason = %result.reason, "notification filtered");
            self.stats.record_filtered(&result.reason);
            return Ok(result);
        }
        self.stats.record_passed();

        if result.processed_text.trim().is_empty() {
            debug!(source = %event.source_id, "nothing to speak");
            self.stats.record_dropped();
            return Ok(result);
        }

        let item = QueuedItem::from_result(Arc::new(event), result.clone(), &snapshot);
        self.delivery.submit(item).await?;
        Ok(result)
    }

    /// Run the filters without recording or speaking anything.
    pub fn evaluate(&self, event: &InboundEvent) -> FilterResult {
        self.engine.evaluate(event, &self.snapshots.current())
    }

    /// Stop the current readout and everything waiting behind it.
    pub async fn cancel_readout(&self) -> Result<()> {
        self.delivery.cancel().await
    }

    /// A setting changed; rebuild the snapshot. Returns the new version.
    pub fn apply_setting_change(&self, key: &str, config: &HeraldConfig) -> u64 {
        self.snapshots.apply_setting_change(key, config)
    }

    /// Re-read the rule store and swap the rules in.
    ///
    /// # Errors
    ///
    /// Returns the rule store's error; the current rules stay in effect.
    pub fn reload_rules(&self) -> Result<u64> {
        let rules = self.rules.list()?;
        Ok(self.snapshots.replace_rules(rules))
    }

    pub fn on_listener_connected(&self) {
        self.health.record_connection();
    }

    pub fn on_listener_disconnected(&self) {
        self.health.record_disconnect();
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn delivery(&self) -> &DeliveryHandle {
        &self.delivery
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Recent decisions, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.recent()
    }

    /// Stop background tasks and wait for them.
    pub async fn shutdown(self) {
        if let Err(e) = self.delivery.shutdown().await {
            debug!("delivery already stopped: {e}");
        }
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("pipeline task ended abnormally: {e}");
            }
        }
        info!("notification pipeline stopped");
    }
}
