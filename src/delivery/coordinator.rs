//! The delivery task.
//!
//! One [`DeliveryCoordinator`] owns the scheduler state, the media negotiator
//! and the speech executor. Everything that can change scheduler state
//! arrives as a message: commands on the inbox and speech progress on the
//! engine's event lane. Timers are spawned tasks that post back into the
//! inbox, so no state is shared across tasks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::executor::{SpeakMode, SpeechEngine, SpeechEvent, SpeechEventSender, SpeechExecutor};
use super::media::{AudioSystem, MediaDecision, MediaNegotiator};
use super::scheduler::{Directive, SchedulerPhase, SchedulerState};
use super::QueuedItem;
use crate::config::DeliveryConfig;
use crate::error::{HeraldError, Result};
use crate::stats::PipelineStats;

/// Messages accepted by the coordinator inbox.
#[derive(Debug)]
pub enum DeliveryCommand {
    /// An item passed the filters.
    Submit(QueuedItem),
    /// The user asked to stop all readouts.
    Cancel,
    DelayElapsed { item_id: String },
    SafetyTimeout { utterance_id: String },
    Shutdown,
}

/// Observable coordinator state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub phase: SchedulerPhase,
    pub queued: usize,
}

impl DeliveryStatus {
    pub fn is_idle(&self) -> bool {
        self.phase == SchedulerPhase::Idle
    }
}

/// Cloneable front door to a running coordinator.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    tx: mpsc::Sender<DeliveryCommand>,
    status: watch::Receiver<DeliveryStatus>,
}

impl DeliveryHandle {
    pub async fn submit(&self, item: QueuedItem) -> Result<()> {
        self.send(DeliveryCommand::Submit(item)).await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.send(DeliveryCommand::Cancel).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(DeliveryCommand::Shutdown).await
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeliveryStatus> {
        self.status.clone()
    }

    async fn send(&self, command: DeliveryCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|e| HeraldError::Channel(format!("delivery coordinator gone: {e}")))
    }
}

/// A timer task posting back into the inbox unless cancelled.
struct Timer {
    key: String,
    cancel: CancellationToken,
}

impl Timer {
    fn disarm(self) {
        self.cancel.cancel();
    }
}

pub struct DeliveryCoordinator {
    state: SchedulerState,
    executor: SpeechExecutor,
    media: MediaNegotiator,
    stats: Arc<PipelineStats>,
    inbox_tx: mpsc::Sender<DeliveryCommand>,
    inbox_rx: mpsc::Receiver<DeliveryCommand>,
    speech_rx: mpsc::UnboundedReceiver<SpeechEvent>,
    status_tx: watch::Sender<DeliveryStatus>,
    safety_timeout: Duration,
    delay_timer: Option<Timer>,
    safety_timer: Option<Timer>,
    cancel: CancellationToken,
}

impl DeliveryCoordinator {
    /// Spawn the coordinator task on the current runtime.
    pub fn spawn(
        config: &DeliveryConfig,
        engine: Arc<dyn SpeechEngine>,
        audio: Arc<dyn AudioSystem>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> (DeliveryHandle, JoinHandle<()>) {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (speech_tx, speech_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(DeliveryStatus::default());

        let coordinator = Self {
            state: SchedulerState::new(),
            executor: SpeechExecutor::new(engine, SpeechEventSender::new(speech_tx)),
            media: MediaNegotiator::new(audio),
            stats,
            inbox_tx: inbox_tx.clone(),
            inbox_rx,
            speech_rx,
            status_tx,
            safety_timeout: Duration::from_secs(config.safety_timeout_secs),
            delay_timer: None,
            safety_timer: None,
            cancel,
        };
        let handle = DeliveryHandle {
            tx: inbox_tx,
            status: status_rx,
        };
        (handle, tokio::spawn(coordinator.run()))
    }

    async fn run(mut self) {
        info!("delivery coordinator started");
        loop {
            // Commands are handled before speech events that arrived at the
            // same time, so a submit is never reordered behind a completion.
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.inbox_rx.recv() => match command {
                    Some(DeliveryCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.speech_rx.recv() => self.handle_speech(event).await,
            }
        }
        self.wind_down().await;
        info!("delivery coordinator stopped");
    }

    async fn handle_command(&mut self, command: DeliveryCommand) {
        let directives = match command {
            DeliveryCommand::Submit(item) => self.state.on_filter_passed(item),
            DeliveryCommand::Cancel => {
                info!("readout cancelled by user");
                self.state.on_user_cancel()
            }
            DeliveryCommand::DelayElapsed { item_id } => {
                if self.delay_timer.as_ref().is_some_and(|t| t.key == item_id) {
                    self.delay_timer = None;
                }
                self.state.on_delay_elapsed(&item_id)
            }
            DeliveryCommand::SafetyTimeout { utterance_id } => {
                let live = self.state.has_started(&utterance_id);
                let directives = self.state.on_safety_timeout(&utterance_id);
                if !directives.is_empty() {
                    if live {
                        warn!(%utterance_id, "utterance outlived safety timeout, releasing media");
                    } else {
                        warn!(%utterance_id, "engine never started utterance, moving on");
                    }
                    self.safety_timer = None;
                }
                directives
            }
            DeliveryCommand::Shutdown => Vec::new(),
        };
        self.apply(directives).await;
    }

    async fn handle_speech(&mut self, event: SpeechEvent) {
        let directives = match event {
            SpeechEvent::Started { utterance_id } => {
                debug!(%utterance_id, "speech started");
                self.state.on_speech_started(&utterance_id);
                Vec::new()
            }
            SpeechEvent::Done { utterance_id } => {
                let directives = self.state.on_speech_complete(&utterance_id);
                if !directives.is_empty() {
                    self.stats.record_spoken();
                    self.disarm_safety(&utterance_id);
                }
                directives
            }
            SpeechEvent::Error {
                utterance_id,
                message,
            } => {
                let directives = self.state.on_speech_error(&utterance_id);
                if !directives.is_empty() {
                    warn!(%utterance_id, "speech engine error: {message}");
                    self.stats.record_speech_error();
                    self.disarm_safety(&utterance_id);
                }
                directives
            }
        };
        self.apply(directives).await;
    }

    /// Carry out directives in order, including any they produce.
    async fn apply(&mut self, directives: Vec<Directive>) {
        let mut pending = VecDeque::from(directives);
        while let Some(directive) = pending.pop_front() {
            match directive {
                Directive::Speak { item, mode } => pending.extend(self.dispatch(item, mode).await),
                Directive::StartDelay { item_id, delay } => {
                    debug!(%item_id, ?delay, "readout delayed");
                    if let Some(timer) = self.delay_timer.take() {
                        timer.disarm();
                    }
                    let command = DeliveryCommand::DelayElapsed {
                        item_id: item_id.clone(),
                    };
                    self.delay_timer = Some(self.arm(item_id, delay, command));
                }
                Directive::CancelDelay => {
                    if let Some(timer) = self.delay_timer.take() {
                        timer.disarm();
                    }
                }
                Directive::StopSpeech => {
                    if let Some(timer) = self.safety_timer.take() {
                        timer.disarm();
                    }
                    if let Err(e) = self.executor.stop().await {
                        warn!("failed to stop speech engine: {e}");
                    }
                }
                Directive::ReleaseMedia => self.media.release(),
                Directive::Dropped { item, reason } => {
                    debug!(id = %item.id, app = %item.app_name, %reason, "readout dropped");
                    self.stats.record_dropped();
                }
            }
        }
        self.publish();
    }

    /// Negotiate media for `item` and hand it to the engine. Returns the
    /// follow-up directives when the item never reaches the engine.
    async fn dispatch(&mut self, item: QueuedItem, mode: SpeakMode) -> Vec<Directive> {
        if let MediaDecision::Silence(reason) = self.media.prepare(&item) {
            info!(id = %item.id, app = %item.app_name, %reason, "readout silenced");
            self.stats.record_silenced();
            return self.state.on_speech_complete(&item.id);
        }

        if let Some(timer) = self.safety_timer.take() {
            timer.disarm();
        }
        let command = DeliveryCommand::SafetyTimeout {
            utterance_id: item.id.clone(),
        };
        self.safety_timer = Some(self.arm(item.id.clone(), self.safety_timeout, command));

        match self.executor.speak(&item, mode).await {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(id = %item.id, "speech engine rejected utterance: {e}");
                self.stats.record_speech_error();
                self.disarm_safety(&item.id);
                self.state.on_speech_error(&item.id)
            }
        }
    }

    fn arm(&self, key: String, after: Duration, command: DeliveryCommand) -> Timer {
        let cancel = self.cancel.child_token();
        let timer_cancel = cancel.clone();
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = timer_cancel.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    let _ = tx.send(command).await;
                }
            }
        });
        Timer { key, cancel }
    }

    fn disarm_safety(&mut self, utterance_id: &str) {
        let armed_for_this = self
            .safety_timer
            .as_ref()
            .is_some_and(|t| t.key == utterance_id);
        if armed_for_this {
            if let Some(timer) = self.safety_timer.take() {
                timer.disarm();
            }
        }
    }

    fn publish(&self) {
        let status = DeliveryStatus {
            phase: self.state.phase().clone(),
            queued: self.state.queue_len(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    async fn wind_down(&mut self) {
        let directives = self.state.on_user_cancel();
        self.apply(directives).await;
        if let Some(timer) = self.safety_timer.take() {
            timer.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::{BehaviorMode, MediaMode};
    use crate::rules::VoiceParams;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Records each utterance and leaves completion to the test.
    struct ManualEngine {
        report_started: bool,
        started: mpsc::UnboundedSender<(String, String)>,
        events: Mutex<Option<SpeechEventSender>>,
        stops: Mutex<u32>,
    }

    #[async_trait]
    impl SpeechEngine for ManualEngine {
        async fn speak(
            &self,
            text: &str,
            _mode: SpeakMode,
            utterance_id: &str,
            _voice: Option<&VoiceParams>,
            events: SpeechEventSender,
        ) -> Result<()> {
            if self.report_started {
                events.started(utterance_id)?;
            }
            *self.events.lock().unwrap() = Some(events);
            let _ = self.started.send((utterance_id.to_owned(), text.to_owned()));
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            *self.stops.lock().unwrap() += 1;
            Ok(())
        }
    }

    impl ManualEngine {
        fn finish(&self, utterance_id: &str) {
            let events = self.events.lock().unwrap().clone().unwrap();
            events.done(utterance_id).unwrap();
        }
    }

    struct QuietAudio {
        playing: bool,
    }

    impl AudioSystem for QuietAudio {
        fn is_playback_active(&self) -> bool {
            self.playing
        }
        fn volume(&self) -> Result<u32> {
            Ok(5)
        }
        fn max_volume(&self) -> Result<u32> {
            Ok(10)
        }
        fn set_volume(&self, _volume: u32) -> Result<()> {
            Ok(())
        }
        fn request_focus(&self) -> Result<bool> {
            Ok(true)
        }
        fn abandon_focus(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        handle: DeliveryHandle,
        engine: Arc<ManualEngine>,
        spoken: mpsc::UnboundedReceiver<(String, String)>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    }

    fn harness(playing: bool) -> Harness {
        harness_with(playing, true)
    }

    fn harness_with(playing: bool, report_started: bool) -> Harness {
        let (started, spoken) = mpsc::unbounded_channel();
        let engine = Arc::new(ManualEngine {
            report_started,
            started,
            events: Mutex::new(None),
            stops: Mutex::new(0),
        });
        let stats = Arc::new(PipelineStats::new());
        let cancel = CancellationToken::new();
        let (handle, _task) = DeliveryCoordinator::spawn(
            &DeliveryConfig::default(),
            engine.clone(),
            Arc::new(QuietAudio { playing }),
            Arc::clone(&stats),
            cancel.clone(),
        );
        Harness {
            handle,
            engine,
            spoken,
            stats,
            cancel,
        }
    }

    fn item(text: &str, mode: BehaviorMode) -> QueuedItem {
        let mut item = QueuedItem::new("Chat", text);
        item.settings.behavior_mode = mode;
        item
    }

    async fn wait_idle(handle: &DeliveryHandle) {
        let mut rx = handle.subscribe();
        rx.wait_for(DeliveryStatus::is_idle).await.unwrap();
    }

    #[tokio::test]
    async fn queue_mode_reads_in_order() {
        let mut h = harness(false);
        for text in ["A", "B", "C"] {
            h.handle.submit(item(text, BehaviorMode::Queue)).await.unwrap();
        }
        for expected in ["A", "B", "C"] {
            let (id, text) = h.spoken.recv().await.unwrap();
            assert_eq!(text, expected);
            h.engine.finish(&id);
        }
        wait_idle(&h.handle).await;
        assert_eq!(h.stats.snapshot().spoken, 3);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn interrupt_replaces_current_readout() {
        let mut h = harness(false);
        h.handle.submit(item("A", BehaviorMode::Interrupt)).await.unwrap();
        let (old_id, _) = h.spoken.recv().await.unwrap();
        h.handle.submit(item("B", BehaviorMode::Interrupt)).await.unwrap();
        let (new_id, text) = h.spoken.recv().await.unwrap();
        assert_eq!(text, "B");
        assert_eq!(*h.engine.stops.lock().unwrap(), 1);

        // The interrupted utterance reports completion late; it must not end B.
        h.engine.finish(&old_id);
        h.engine.finish(&new_id);
        wait_idle(&h.handle).await;
        assert_eq!(h.stats.snapshot().spoken, 1);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn skip_mode_drops_while_busy() {
        let mut h = harness(false);
        h.handle.submit(item("A", BehaviorMode::Skip)).await.unwrap();
        let (id, _) = h.spoken.recv().await.unwrap();
        h.handle.submit(item("B", BehaviorMode::Skip)).await.unwrap();
        h.engine.finish(&id);
        wait_idle(&h.handle).await;
        assert!(h.spoken.try_recv().is_err());
        assert_eq!(h.stats.snapshot().dropped, 1);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_item_waits_for_timer() {
        let mut h = harness(false);
        let mut delayed = item("later", BehaviorMode::Queue);
        delayed.conditional_delay_seconds = 5;
        let submitted = Instant::now();
        h.handle.submit(delayed).await.unwrap();
        let (_, text) = h.spoken.recv().await.unwrap();
        assert_eq!(text, "later");
        assert!(submitted.elapsed() >= Duration::from_secs(5));
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_delay_drops_item() {
        let mut h = harness(false);
        let mut delayed = item("later", BehaviorMode::Queue);
        delayed.settings.delay_seconds = 5;
        h.handle.submit(delayed).await.unwrap();
        let mut status = h.handle.subscribe();
        status
            .wait_for(|s| matches!(s.phase, SchedulerPhase::Delaying { .. }))
            .await
            .unwrap();

        h.handle.cancel().await.unwrap();
        wait_idle(&h.handle).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.spoken.try_recv().is_err());
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn safety_timeout_moves_on_when_engine_never_starts() {
        let mut h = harness_with(false, false);
        h.handle.submit(item("stuck", BehaviorMode::Queue)).await.unwrap();
        h.handle.submit(item("next", BehaviorMode::Queue)).await.unwrap();
        let started = Instant::now();
        let (_, first) = h.spoken.recv().await.unwrap();
        assert_eq!(first, "stuck");
        let (_, second) = h.spoken.recv().await.unwrap();
        assert_eq!(second, "next");
        assert!(started.elapsed() >= Duration::from_secs(30));
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn long_readout_outlives_safety_timeout() {
        let mut h = harness(false);
        h.handle
            .submit(item("long email body", BehaviorMode::Queue))
            .await
            .unwrap();
        h.handle.submit(item("second", BehaviorMode::Queue)).await.unwrap();
        let (long_id, text) = h.spoken.recv().await.unwrap();
        assert_eq!(text, "long email body");

        // Still rendering well past the 30s ceiling.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(h.spoken.try_recv().is_err());
        assert_eq!(*h.engine.stops.lock().unwrap(), 0);
        assert_eq!(h.handle.status().queued, 1);

        h.engine.finish(&long_id);
        let (_, next) = h.spoken.recv().await.unwrap();
        assert_eq!(next, "second");
        assert_eq!(*h.engine.stops.lock().unwrap(), 0);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn silence_mode_never_reaches_engine() {
        let mut h = harness(true);
        for text in ["hello", "again"] {
            let mut quiet = item(text, BehaviorMode::Queue);
            quiet.settings.media_mode = MediaMode::Silence;
            h.handle.submit(quiet).await.unwrap();
        }
        h.handle.submit(item("spoken", BehaviorMode::Queue)).await.unwrap();

        let (_, text) = h.spoken.recv().await.unwrap();
        assert_eq!(text, "spoken");
        assert_eq!(h.stats.snapshot().silenced, 2);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn handle_errors_after_shutdown() {
        let h = harness(false);
        h.handle.shutdown().await.unwrap();
        let mut closed = false;
        for _ in 0..50 {
            if h.handle.submit(item("x", BehaviorMode::Queue)).await.is_err() {
                closed = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed);
    }
}
