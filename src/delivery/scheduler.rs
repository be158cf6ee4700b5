//! Queueing state machine for readouts.
//!
//! [`SchedulerState`] never performs I/O. Each transition returns the
//! [`Directive`]s the coordinator must carry out, in order. Completion,
//! error and timer events carry the id they refer to; events for anything
//! other than the current item are stale and ignored.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use super::QueuedItem;
use super::executor::SpeakMode;
use crate::config::BehaviorMode;

/// Where the scheduler currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    #[default]
    Idle,
    /// An item is waiting on its delay timer. Counts as busy.
    Delaying { item_id: String },
    /// An utterance is with the speech engine.
    Speaking { utterance_id: String },
}

/// Why a passing item was not spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Skip mode while busy.
    Busy,
    /// Removed from the queue by an interrupt.
    Preempted,
    /// Removed by a user cancel.
    Cancelled,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Busy => "busy",
            Self::Preempted => "preempted",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone)]
pub enum Directive {
    /// Negotiate media, then hand the item to the executor.
    Speak { item: QueuedItem, mode: SpeakMode },
    /// Arm the delay timer for `item_id`.
    StartDelay { item_id: String, delay: Duration },
    CancelDelay,
    StopSpeech,
    /// Restore volume and abandon focus held for the previous item.
    ReleaseMedia,
    Dropped { item: QueuedItem, reason: DropReason },
}

/// Scheduler state owned by the delivery coordinator.
#[derive(Debug, Default)]
pub struct SchedulerState {
    phase: SchedulerPhase,
    queue: VecDeque<QueuedItem>,
    /// The item behind the delay timer, with the mode it will speak in.
    delayed: Option<(QueuedItem, SpeakMode)>,
    /// The engine reported `Started` for the current utterance.
    started: bool,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &SchedulerPhase {
        &self.phase
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Busy means speaking or waiting on a delay.
    pub fn is_busy(&self) -> bool {
        self.phase != SchedulerPhase::Idle
    }

    /// A new item passed the filters.
    pub fn on_filter_passed(&mut self, item: QueuedItem) -> Vec<Directive> {
        let mode = match item.settings.behavior_mode {
            BehaviorMode::Smart if item.is_priority => BehaviorMode::Interrupt,
            BehaviorMode::Smart => BehaviorMode::Queue,
            other => other,
        };
        debug!(id = %item.id, ?mode, busy = self.is_busy(), "item passed filters");

        match mode {
            BehaviorMode::Interrupt => self.interrupt_with(item),
            BehaviorMode::Skip if self.is_busy() => vec![Directive::Dropped {
                item,
                reason: DropReason::Busy,
            }],
            BehaviorMode::Skip => self.begin(item, SpeakMode::Flush),
            BehaviorMode::Queue | BehaviorMode::Smart => {
                self.queue.push_back(item);
                if self.is_busy() {
                    Vec::new()
                } else {
                    self.start_next()
                }
            }
        }
    }

    /// The engine began rendering `utterance_id`.
    pub fn on_speech_started(&mut self, utterance_id: &str) {
        if self.is_speaking(utterance_id) {
            self.started = true;
        }
    }

    /// Whether `utterance_id` is current and the engine has started it.
    pub fn has_started(&self, utterance_id: &str) -> bool {
        self.started && self.is_speaking(utterance_id)
    }

    /// The engine finished `utterance_id`.
    pub fn on_speech_complete(&mut self, utterance_id: &str) -> Vec<Directive> {
        self.finish(utterance_id)
    }

    /// The engine failed on `utterance_id`. Treated like completion.
    pub fn on_speech_error(&mut self, utterance_id: &str) -> Vec<Directive> {
        self.finish(utterance_id)
    }

    /// No completion arrived in time for `utterance_id`.
    ///
    /// An utterance the engine has started is still live: only the media
    /// resources are released and the scheduler keeps waiting for its
    /// completion. One that never started is stopped and the queue moves on.
    pub fn on_safety_timeout(&mut self, utterance_id: &str) -> Vec<Directive> {
        if !self.is_speaking(utterance_id) {
            return Vec::new();
        }
        if self.started {
            return vec![Directive::ReleaseMedia];
        }
        let mut directives = vec![Directive::StopSpeech];
        directives.extend(self.finish(utterance_id));
        directives
    }

    /// The delay timer for `item_id` fired.
    pub fn on_delay_elapsed(&mut self, item_id: &str) -> Vec<Directive> {
        let pending = matches!(
            &self.phase,
            SchedulerPhase::Delaying { item_id: id } if id == item_id
        );
        if !pending {
            return Vec::new();
        }
        match self.delayed.take() {
            Some((item, mode)) => self.speak(item, mode),
            None => {
                self.phase = SchedulerPhase::Idle;
                self.start_next()
            }
        }
    }

    /// Stop everything: speech, delay, queue and media.
    pub fn on_user_cancel(&mut self) -> Vec<Directive> {
        let mut directives = self.halt(DropReason::Cancelled);
        directives.extend(
            self.queue
                .drain(..)
                .map(|item| Directive::Dropped {
                    item,
                    reason: DropReason::Cancelled,
                }),
        );
        directives
    }

    fn is_speaking(&self, utterance_id: &str) -> bool {
        matches!(&self.phase, SchedulerPhase::Speaking { utterance_id: id } if id == utterance_id)
    }

    fn interrupt_with(&mut self, item: QueuedItem) -> Vec<Directive> {
        let mut directives = self.halt(DropReason::Preempted);
        directives.extend(self.queue.drain(..).map(|item| Directive::Dropped {
            item,
            reason: DropReason::Preempted,
        }));
        directives.extend(self.begin(item, SpeakMode::Flush));
        directives
    }

    /// Leave whatever is active and return to Idle.
    fn halt(&mut self, reason: DropReason) -> Vec<Directive> {
        let mut directives = Vec::new();
        self.started = false;
        match std::mem::take(&mut self.phase) {
            SchedulerPhase::Idle => {}
            SchedulerPhase::Delaying { .. } => {
                directives.push(Directive::CancelDelay);
                if let Some((item, _)) = self.delayed.take() {
                    directives.push(Directive::Dropped { item, reason });
                }
            }
            SchedulerPhase::Speaking { .. } => {
                directives.push(Directive::StopSpeech);
                directives.push(Directive::ReleaseMedia);
            }
        }
        directives
    }

    fn finish(&mut self, utterance_id: &str) -> Vec<Directive> {
        if !self.is_speaking(utterance_id) {
            debug!(utterance_id, "ignoring stale speech event");
            return Vec::new();
        }
        self.phase = SchedulerPhase::Idle;
        self.started = false;
        let mut directives = vec![Directive::ReleaseMedia];
        directives.extend(self.start_next());
        directives
    }

    fn start_next(&mut self) -> Vec<Directive> {
        match self.queue.pop_front() {
            Some(item) => self.begin(item, SpeakMode::Enqueue),
            None => Vec::new(),
        }
    }

    fn begin(&mut self, item: QueuedItem, mode: SpeakMode) -> Vec<Directive> {
        let delay = item.effective_delay_seconds();
        if delay > 0 {
            let item_id = item.id.clone();
            self.phase = SchedulerPhase::Delaying {
                item_id: item_id.clone(),
            };
            self.delayed = Some((item, mode));
            return vec![Directive::StartDelay {
                item_id,
                delay: Duration::from_secs(u64::from(delay)),
            }];
        }
        self.speak(item, mode)
    }

    fn speak(&mut self, item: QueuedItem, mode: SpeakMode) -> Vec<Directive> {
        self.started = false;
        self.phase = SchedulerPhase::Speaking {
            utterance_id: item.id.clone(),
        };
        vec![Directive::Speak { item, mode }]
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn item(text: &str, mode: BehaviorMode) -> QueuedItem {
        let mut item = QueuedItem::new("App", text);
        item.settings.behavior_mode = mode;
        item
    }

    fn spoken(directives: &[Directive]) -> Vec<String> {
        directives
            .iter()
            .filter_map(|d| match d {
                Directive::Speak { item, .. } => Some(item.text.clone()),
                _ => None,
            })
            .collect()
    }

    fn speaking_id(state: &SchedulerState) -> String {
        match state.phase() {
            SchedulerPhase::Speaking { utterance_id } => utterance_id.clone(),
            other => panic!("expected speaking, got {other:?}"),
        }
    }

    #[test]
    fn queue_mode_speaks_in_arrival_order() {
        let mut state = SchedulerState::new();
        let mut order = Vec::new();
        order.extend(spoken(&state.on_filter_passed(item("A", BehaviorMode::Queue))));
        order.extend(spoken(&state.on_filter_passed(item("B", BehaviorMode::Queue))));
        order.extend(spoken(&state.on_filter_passed(item("C", BehaviorMode::Queue))));
        assert_eq!(state.queue_len(), 2);

        for _ in 0..3 {
            let id = speaking_id(&state);
            order.extend(spoken(&state.on_speech_complete(&id)));
        }
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(state.phase(), &SchedulerPhase::Idle);
    }

    #[test]
    fn interrupt_clears_queue_and_speaks_new_item() {
        let mut state = SchedulerState::new();
        state.on_filter_passed(item("A", BehaviorMode::Queue));
        state.on_filter_passed(item("B", BehaviorMode::Queue));
        assert_eq!(state.queue_len(), 1);

        let directives = state.on_filter_passed(item("C", BehaviorMode::Interrupt));
        assert!(matches!(directives[0], Directive::StopSpeech));
        assert!(directives.iter().any(|d| matches!(
            d,
            Directive::Dropped { reason: DropReason::Preempted, .. }
        )));
        assert_eq!(spoken(&directives), vec!["C"]);
        assert!(directives.iter().any(|d| matches!(
            d,
            Directive::Speak { mode: SpeakMode::Flush, .. }
        )));
        assert_eq!(state.queue_len(), 0);
    }

    #[test]
    fn skip_drops_while_speaking() {
        let mut state = SchedulerState::new();
        assert_eq!(spoken(&state.on_filter_passed(item("A", BehaviorMode::Skip))), vec!["A"]);
        let directives = state.on_filter_passed(item("B", BehaviorMode::Skip));
        assert!(matches!(
            directives.as_slice(),
            [Directive::Dropped { reason: DropReason::Busy, .. }]
        ));
        let id = speaking_id(&state);
        assert!(spoken(&state.on_speech_complete(&id)).is_empty());
        assert_eq!(state.phase(), &SchedulerPhase::Idle);
    }

    #[test]
    fn skip_drops_while_delay_pending() {
        let mut state = SchedulerState::new();
        let mut delayed = item("A", BehaviorMode::Skip);
        delayed.conditional_delay_seconds = 5;
        state.on_filter_passed(delayed);
        let directives = state.on_filter_passed(item("B", BehaviorMode::Skip));
        assert!(matches!(directives[0], Directive::Dropped { .. }));
    }

    #[test]
    fn smart_priority_preempts_and_normal_enqueues() {
        let mut state = SchedulerState::new();
        state.on_filter_passed(item("A", BehaviorMode::Smart));
        let directives = state.on_filter_passed(item("B", BehaviorMode::Smart));
        assert!(directives.is_empty());
        assert_eq!(state.queue_len(), 1);

        let mut urgent = item("P", BehaviorMode::Smart);
        urgent.is_priority = true;
        let directives = state.on_filter_passed(urgent);
        assert!(matches!(directives[0], Directive::StopSpeech));
        assert_eq!(spoken(&directives), vec!["P"]);
        assert_eq!(state.queue_len(), 0);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut state = SchedulerState::new();
        state.on_filter_passed(item("A", BehaviorMode::Interrupt));
        let old = speaking_id(&state);
        state.on_filter_passed(item("B", BehaviorMode::Interrupt));
        let current = speaking_id(&state);

        assert!(state.on_speech_complete(&old).is_empty());
        assert_eq!(speaking_id(&state), current);
        assert!(state.on_safety_timeout(&old).is_empty());
    }

    #[test]
    fn delay_holds_queue_until_elapsed() {
        let mut state = SchedulerState::new();
        let mut first = item("A", BehaviorMode::Queue);
        first.settings.delay_seconds = 3;
        let first_id = first.id.clone();

        let directives = state.on_filter_passed(first);
        assert!(matches!(
            &directives[..],
            [Directive::StartDelay { delay, .. }] if *delay == Duration::from_secs(3)
        ));
        assert!(state.is_busy());
        assert!(state.on_filter_passed(item("B", BehaviorMode::Queue)).is_empty());

        assert!(state.on_delay_elapsed("someone-else").is_empty());
        assert_eq!(spoken(&state.on_delay_elapsed(&first_id)), vec!["A"]);
        assert_eq!(state.queue_len(), 1);
    }

    #[test]
    fn cancel_stops_everything() {
        let mut state = SchedulerState::new();
        state.on_filter_passed(item("A", BehaviorMode::Queue));
        state.on_filter_passed(item("B", BehaviorMode::Queue));
        let directives = state.on_user_cancel();
        assert!(matches!(directives[0], Directive::StopSpeech));
        assert!(matches!(directives[1], Directive::ReleaseMedia));
        assert_eq!(state.queue_len(), 0);
        assert_eq!(state.phase(), &SchedulerPhase::Idle);

        let mut delayed = item("C", BehaviorMode::Queue);
        delayed.conditional_delay_seconds = 10;
        state.on_filter_passed(delayed);
        let directives = state.on_user_cancel();
        assert!(matches!(directives[0], Directive::CancelDelay));
        assert!(!state.is_busy());
    }

    #[test]
    fn safety_timeout_stops_and_drains() {
        let mut state = SchedulerState::new();
        state.on_filter_passed(item("A", BehaviorMode::Queue));
        state.on_filter_passed(item("B", BehaviorMode::Queue));
        let id = speaking_id(&state);
        let directives = state.on_safety_timeout(&id);
        assert!(matches!(directives[0], Directive::StopSpeech));
        assert!(matches!(directives[1], Directive::ReleaseMedia));
        assert_eq!(spoken(&directives), vec!["B"]);
    }

    #[test]
    fn safety_timeout_on_started_utterance_only_releases_media() {
        let mut state = SchedulerState::new();
        state.on_filter_passed(item("A", BehaviorMode::Queue));
        state.on_filter_passed(item("B", BehaviorMode::Queue));
        let id = speaking_id(&state);
        state.on_speech_started(&id);

        let directives = state.on_safety_timeout(&id);
        assert!(matches!(directives.as_slice(), [Directive::ReleaseMedia]));
        assert_eq!(speaking_id(&state), id);
        assert_eq!(state.queue_len(), 1);

        assert_eq!(spoken(&state.on_speech_complete(&id)), vec!["B"]);
        let next = speaking_id(&state);
        assert!(!state.has_started(&next));
    }

    #[test]
    fn error_releases_and_drains_like_completion() {
        let mut state = SchedulerState::new();
        state.on_filter_passed(item("A", BehaviorMode::Queue));
        state.on_filter_passed(item("B", BehaviorMode::Queue));
        let id = speaking_id(&state);
        let directives = state.on_speech_error(&id);
        assert!(matches!(directives[0], Directive::ReleaseMedia));
        assert_eq!(spoken(&directives), vec!["B"]);
    }
}
