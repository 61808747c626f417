//! Notification-trigger collaborators.
//!
//! The scheduler hands every important heartbeat to a [`NotificationSink`]
//! on a separate task; errors are logged and never affect scheduling.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::database::models::Monitor;
use crate::monitoring::types::{Heartbeat, MonitorStatus};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_important_heartbeat(&self, monitor: &Monitor, heartbeat: &Heartbeat) -> Result<()>;
}

/// One line per status change: `[name] [Up] msg`
pub fn format_heartbeat(monitor: &Monitor, heartbeat: &Heartbeat) -> String {
    let status = match heartbeat.status {
        MonitorStatus::Up => "Up",
        MonitorStatus::Down => "Down",
        MonitorStatus::Pending => "Pending",
        MonitorStatus::Maintenance => "Maintenance",
    };
    format!("[{}] [{}] {}", monitor.name, status, heartbeat.msg)
}

/// Writes important heartbeats to the log
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn on_important_heartbeat(&self, monitor: &Monitor, heartbeat: &Heartbeat) -> Result<()> {
        info!(target: "uptime_engine::notify", monitor = %monitor.id, "{}", format_heartbeat(monitor, heartbeat));
        Ok(())
    }
}

/// Important heartbeat published to boundary layers
#[derive(Debug, Clone)]
pub struct HeartbeatEvent {
    pub monitor: Monitor,
    pub heartbeat: Heartbeat,
}

/// Publishes important heartbeats on a broadcast channel
pub struct BroadcastNotifier {
    tx: broadcast::Sender<HeartbeatEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn on_important_heartbeat(&self, monitor: &Monitor, heartbeat: &Heartbeat) -> Result<()> {
        let event = HeartbeatEvent { monitor: monitor.clone(), heartbeat: heartbeat.clone() };
        // Ignore errors if there are no receivers
        if self.tx.send(event).is_err() {
            debug!(monitor = %monitor.id, "No subscribers for heartbeat event");
        }
        Ok(())
    }
}

/// Fans a heartbeat out to several sinks. Every sink is called even if one fails.
#[derive(Default, Clone)]
pub struct Notifiers {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl NotificationSink for Notifiers {
    async fn on_important_heartbeat(&self, monitor: &Monitor, heartbeat: &Heartbeat) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.on_important_heartbeat(monitor, heartbeat).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
