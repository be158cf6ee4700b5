//! Error types for the herald notification pipeline.

/// Top-level error type for the notification-to-speech system.
#[derive(Debug, thiserror::Error)]
pub enum HeraldError {
    /// Configuration load/parse/validation error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error for persisted state.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Speech engine error.
    #[error("speech error: {0}")]
    Speech(String),

    /// Audio system error (volume, focus).
    #[error("audio error: {0}")]
    Audio(String),

    /// Listener health persistence or reconnection error.
    #[error("health error: {0}")]
    Health(String),

    /// Rule store error.
    #[error("rules error: {0}")]
    Rules(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HeraldError>;

/// Failure while evaluating a single filter stage or rule.
///
/// Stage errors never reject an event: the engine skips the failing stage,
/// and an error at the outer boundary folds to "allow".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// An ambient-state probe could not answer.
    #[error("probe '{probe}' unavailable: {detail}")]
    ProbeUnavailable {
        /// Probe name (e.g. `screen`, `bluetooth`).
        probe: &'static str,
        /// Why the probe failed.
        detail: String,
    },

    /// Event metadata was malformed for the stage that read it.
    #[error("malformed event metadata: {0}")]
    MalformedEvent(String),

    /// Catch-all for unexpected stage failures.
    #[error("stage '{stage}' failed: {detail}")]
    Stage {
        /// Stage name.
        stage: &'static str,
        /// Failure detail.
        detail: String,
    },
}
