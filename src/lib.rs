//! Herald: reads incoming notifications aloud.
//!
//! The crate sits between a host platform's notification stream and its
//! text-to-speech engine:
//!
//! Notification → Filter engine → Delivery scheduler → Media negotiator → Speech engine
//!
//! # Architecture
//!
//! - **Config snapshot** ([`snapshot`]): every setting, compiled into an
//!   immutable versioned snapshot and swapped atomically on change
//! - **Filter engine** ([`filter`]): ordered, short-circuiting stages (app
//!   list, media detection, persistent/silent categories, word filters,
//!   conditional rules) that fail open
//! - **Rules** ([`rules`]): user-defined triggers, exceptions and actions
//!   evaluated against ambient device state
//! - **Delivery** ([`delivery`]): a single coordinator task arbitrating
//!   readouts under four behavior modes, with delays and media coexistence
//! - **Health** ([`health`]): staleness detection and rate-limited rebinds of
//!   the upstream notification listener, plus a periodic watchdog
//!
//! Host integration points are traits: [`NotificationSource`],
//! [`SpeechEngine`], [`AudioSystem`], [`AmbientProbes`] and [`RuleStore`].

pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod filter;
pub mod health;
pub mod history;
mod persist;
pub mod pipeline;
pub mod rules;
pub mod snapshot;
pub mod stats;

pub use config::HeraldConfig;
pub use delivery::{AudioSystem, DeliveryHandle, QueuedItem, SpeakMode, SpeechEngine, SpeechEvent};
pub use error::{EvaluationError, HeraldError, Result};
pub use event::InboundEvent;
pub use filter::{FilterEngine, FilterResult};
pub use health::{HealthMonitor, NotificationSource, RebindOutcome, SkipReason};
pub use pipeline::{Collaborators, NotificationPipeline};
pub use rules::{AmbientProbes, JsonRuleStore, Rule, RuleStore};
pub use snapshot::{ConfigSnapshot, SnapshotStore};
