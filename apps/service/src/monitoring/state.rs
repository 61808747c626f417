//! Heartbeat state machine.
//!
//! A pure function of the monitor snapshot, the previous heartbeat, the
//! current retry counter and what the tick observed. The scheduler threads
//! the returned retry counter into the next tick.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::{CheckOutcome, Heartbeat, MonitorStatus};
use crate::checkers::CheckError;
use crate::database::models::Monitor;

pub const MAINTENANCE_MESSAGE: &str = "Monitor under maintenance";
pub const FLIPPED_MESSAGE: &str = "Flip UP to DOWN";

/// What a tick observed for a monitor
#[derive(Debug)]
pub enum CheckVerdict {
    /// A maintenance window covers the monitor; no check was run
    Maintenance,
    /// The checker ran to completion, or failed
    Completed(Result<CheckOutcome, CheckError>),
}

/// Result of deriving one heartbeat
#[derive(Debug, Clone)]
pub struct Transition {
    pub heartbeat: Heartbeat,
    /// Retry counter to carry into the next tick
    pub retries: u32,
    /// Delay until the next tick
    pub next_interval: Duration,
}

/// Derive the next heartbeat for `monitor`.
pub fn derive_heartbeat(
    monitor: &Monitor,
    previous: Option<&Heartbeat>,
    retries: u32,
    verdict: CheckVerdict,
    now: DateTime<Utc>,
) -> Transition {
    let mut outcome = Outcome::default();

    match verdict {
        CheckVerdict::Maintenance => {
            outcome.status = MonitorStatus::Maintenance;
            outcome.msg = MAINTENANCE_MESSAGE.to_string();
        }
        CheckVerdict::Completed(Err(error)) if monitor.upside_down => {
            outcome.status = MonitorStatus::Up;
            outcome.msg = error.to_string();
        }
        CheckVerdict::Completed(Err(error)) => {
            outcome.msg = error.to_string();
            let previously_down = previous.is_some_and(|hb| hb.status == MonitorStatus::Down);
            let attempt = retries.saturating_add(1);

            if !previously_down && attempt <= monitor.max_retries {
                outcome.status = MonitorStatus::Pending;
                outcome.retries = attempt;
            } else {
                outcome.status = MonitorStatus::Down;
            }
        }
        CheckVerdict::Completed(Ok(check)) => {
            outcome.ping = check.ping;
            outcome.value = check.value;
            outcome.response = check.response;

            match check.status {
                // The checker cannot decide yet; the retry cycle is left untouched
                MonitorStatus::Pending => {
                    outcome.status = MonitorStatus::Pending;
                    outcome.msg = check.msg;
                    outcome.retries = retries;
                }
                _ if monitor.upside_down => {
                    outcome.status = MonitorStatus::Down;
                    outcome.msg = FLIPPED_MESSAGE.to_string();
                }
                _ => {
                    outcome.status = MonitorStatus::Up;
                    outcome.msg = check.msg;
                }
            }
        }
    }

    let important = previous.is_none_or(|hb| hb.status != outcome.status);
    let duration = previous.map_or(0, |hb| (now - hb.time).num_seconds().max(0));
    let next_interval = if outcome.status == MonitorStatus::Pending {
        monitor.retry_interval()
    } else {
        monitor.interval()
    };

    Transition {
        heartbeat: Heartbeat {
            id: None,
            monitor_id: monitor.id,
            time: now,
            status: outcome.status,
            msg: outcome.msg,
            ping: outcome.ping,
            duration,
            retries: outcome.retries,
            important,
            value: outcome.value,
            response: outcome.response,
        },
        retries: outcome.retries,
        next_interval,
    }
}

struct Outcome {
    status: MonitorStatus,
    msg: String,
    ping: Option<u64>,
    value: Option<f64>,
    response: Option<String>,
    retries: u32,
}

impl Default for Outcome {
    fn default() -> Self {
        Self {
            status: MonitorStatus::Down,
            msg: String::new(),
            ping: None,
            value: None,
            response: None,
            retries: 0,
        }
    }
}
