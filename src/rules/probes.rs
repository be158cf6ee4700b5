//! Ambient device-state probes consulted by rule conditions.

use chrono::NaiveDateTime;

use crate::error::EvaluationError;

/// Point-in-time queries for the device state rules depend on.
///
/// Implementations are supplied by the host platform. Every query may fail;
/// a failure skips only the rule that asked.
pub trait AmbientProbes: Send + Sync {
    /// Identifiers of currently connected paired devices.
    fn connected_devices(&self) -> Result<Vec<String>, EvaluationError>;

    /// Whether the screen is on.
    fn screen_on(&self) -> Result<bool, EvaluationError>;

    /// Current local wall-clock time.
    fn local_time(&self) -> Result<NaiveDateTime, EvaluationError>;

    /// Identity of the current network, if connected to one.
    fn network_identity(&self) -> Result<Option<String>, EvaluationError>;
}

/// Fixed probe answers. Used by tests and the replay tool.
#[derive(Debug, Clone)]
pub struct StaticProbes {
    pub devices: Vec<String>,
    pub screen_on: bool,
    pub time: NaiveDateTime,
    pub network: Option<String>,
}

impl StaticProbes {
    /// Screen off, nothing connected, at the current local time.
    pub fn now() -> Self {
        Self::at(chrono::Local::now().naive_local())
    }

    /// Screen off, nothing connected, at `time`.
    pub fn at(time: NaiveDateTime) -> Self {
        Self {
            devices: Vec::new(),
            screen_on: false,
            time,
            network: None,
        }
    }
}

impl AmbientProbes for StaticProbes {
    fn connected_devices(&self) -> Result<Vec<String>, EvaluationError> {
        Ok(self.devices.clone())
    }

    fn screen_on(&self) -> Result<bool, EvaluationError> {
        Ok(self.screen_on)
    }

    fn local_time(&self) -> Result<NaiveDateTime, EvaluationError> {
        Ok(self.time)
    }

    fn network_identity(&self) -> Result<Option<String>, EvaluationError> {
        Ok(self.network.clone())
    }
}
