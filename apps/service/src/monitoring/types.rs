use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::MonitorId;

/// Status of a monitor as recorded in a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Down,
    Up,
    Pending,
    Maintenance,
}

impl MonitorStatus {
    /// Numeric code used in storage: DOWN=0, UP=1, PENDING=2, MAINTENANCE=3
    pub fn code(self) -> i64 {
        match self {
            MonitorStatus::Down => 0,
            MonitorStatus::Up => 1,
            MonitorStatus::Pending => 2,
            MonitorStatus::Maintenance => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MonitorStatus::Down),
            1 => Some(MonitorStatus::Up),
            2 => Some(MonitorStatus::Pending),
            3 => Some(MonitorStatus::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Pending => write!(f, "pending"),
            MonitorStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// One recorded check result for a monitor. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Storage row id, `None` until persisted
    pub id: Option<i64>,
    pub monitor_id: MonitorId,
    pub time: DateTime<Utc>,
    pub status: MonitorStatus,
    pub msg: String,
    /// Latency in milliseconds
    pub ping: Option<u64>,
    /// Seconds since the previous heartbeat, 0 for the first one
    pub duration: i64,
    /// Consecutive retry counter at the time of this result
    pub retries: u32,
    /// True iff this heartbeat is a status transition worth notifying about
    pub important: bool,
    /// Captured numeric value for threshold style checks
    pub value: Option<f64>,
    /// Captured response payload
    pub response: Option<String>,
}

/// What a checker reports for a check that did not fail.
///
/// Failures are reported through `Err(CheckError)` only; there is no soft
/// failure path.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    /// `Up`, or `Pending` for checkers that cannot decide yet (empty group)
    pub status: MonitorStatus,
    pub msg: String,
    pub ping: Option<u64>,
    pub value: Option<f64>,
    pub response: Option<String>,
}

impl CheckOutcome {
    /// Mark the check as successful
    pub fn up(msg: impl Into<String>) -> Self {
        Self { status: MonitorStatus::Up, msg: msg.into(), ping: None, value: None, response: None }
    }

    /// The checker could not decide yet
    pub fn pending(msg: impl Into<String>) -> Self {
        Self { status: MonitorStatus::Pending, ..Self::up(msg) }
    }

    pub fn with_ping(mut self, ping_ms: u64) -> Self {
        self.ping = Some(ping_ms);
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}
