use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type MonitorId = Uuid;

/// Monitor model - a configured check target plus its scheduling parameters.
///
/// The scheduling core only ever reads monitors; they are created and edited
/// by the API layer and re-read from storage at the start of every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: MonitorId,
    pub name: String,
    /// Discriminates which checker handles this monitor
    pub monitor_type: String,
    /// Protocol-specific target fields
    pub target: MonitorTarget,
    pub interval_seconds: u64,
    /// Interval used while the monitor is PENDING; 0 falls back to `interval_seconds`
    pub retry_interval_seconds: u64,
    pub max_retries: u32,
    /// Per-check timeout; `None` means 80% of the interval
    pub timeout_seconds: Option<u64>,
    pub upside_down: bool,
    pub active: bool,
    pub parent: Option<MonitorId>,
    /// JSON encoded condition tree, `"[]"` when none is configured
    pub conditions: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new monitor
    pub fn new(name: impl Into<String>, monitor_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            monitor_type: monitor_type.into(),
            target: MonitorTarget::default(),
            interval_seconds: 60,
            retry_interval_seconds: 60,
            max_retries: 0,
            timeout_seconds: None,
            upside_down: false,
            active: true,
            parent: None,
            conditions: "[]".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_target(mut self, target: MonitorTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_interval(mut self, interval_seconds: u64, retry_interval_seconds: u64) -> Self {
        self.interval_seconds = interval_seconds;
        self.retry_interval_seconds = retry_interval_seconds;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_conditions(mut self, conditions: impl Into<String>) -> Self {
        self.conditions = conditions.into();
        self
    }

    pub fn with_parent(mut self, parent: MonitorId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn upside_down(mut self, upside_down: bool) -> Self {
        self.upside_down = upside_down;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        if self.retry_interval_seconds == 0 {
            self.interval()
        } else {
            Duration::from_secs(self.retry_interval_seconds)
        }
    }

    /// Timeout for a single check, capped at `max`.
    pub fn check_timeout(&self, max: Duration) -> Duration {
        let timeout = match self.timeout_seconds {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds),
            _ => self.interval().mul_f64(0.8),
        };
        timeout.clamp(Duration::from_millis(500), max.max(Duration::from_millis(500)))
    }
}

/// Protocol-specific target fields, persisted as one JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    // http / keyword / json-query
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accepted_status_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub invert_keyword: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_path_operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,

    // dns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_resolve_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_resolve_server: Option<String>,

    // mqtt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_check_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_success_message: Option<String>,

    // sqlite / libsql
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_connection_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_auth_token: Option<String>,

    // remote-probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_location: Option<String>,
}

/// A scheduled maintenance window. `monitor_id = None` covers every monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Option<i64>,
    pub monitor_id: Option<MonitorId>,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub active: bool,
}

impl MaintenanceWindow {
    pub fn covers(&self, monitor_id: MonitorId, now: DateTime<Utc>) -> bool {
        self.active
            && self.monitor_id.is_none_or(|id| id == monitor_id)
            && self.starts_at <= now
            && now < self.ends_at
    }
}

/// Convert a timestamp to unix milliseconds for storage
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert unix milliseconds back to a timestamp
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
