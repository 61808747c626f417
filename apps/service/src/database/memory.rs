use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::{MaintenanceWindow, Monitor, MonitorId};
use super::repository::Database;
use crate::monitoring::types::Heartbeat;

/// In-process storage with the same contract as [`DatabaseImpl`](super::DatabaseImpl).
///
/// Heartbeat saves can be made to fail on demand to exercise the scheduler's
/// persistence error path.
#[derive(Default)]
pub struct MemoryDatabase {
    monitors: RwLock<HashMap<MonitorId, Monitor>>,
    heartbeats: RwLock<Vec<Heartbeat>>,
    windows: RwLock<Vec<MaintenanceWindow>>,
    next_id: AtomicI64,
    fail_heartbeat_saves: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save_heartbeat` call fail (or succeed again)
    pub fn set_fail_heartbeat_saves(&self, fail: bool) {
        self.fail_heartbeat_saves.store(fail, Ordering::SeqCst);
    }

    /// All persisted heartbeats of a monitor, oldest first
    pub async fn heartbeats_for(&self, monitor_id: MonitorId) -> Vec<Heartbeat> {
        self.heartbeats
            .read()
            .await
            .iter()
            .filter(|hb| hb.monitor_id == monitor_id)
            .cloned()
            .collect()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<Monitor>> {
        Ok(self.monitors.read().await.get(&id).cloned())
    }

    async fn list_active_monitors(&self) -> Result<Vec<Monitor>> {
        let mut monitors: Vec<Monitor> =
            self.monitors.read().await.values().filter(|m| m.active).cloned().collect();
        monitors.sort_by_key(|m| m.created_at);
        Ok(monitors)
    }

    async fn get_children(&self, parent: MonitorId) -> Result<Vec<Monitor>> {
        let mut children: Vec<Monitor> = self
            .monitors
            .read()
            .await
            .values()
            .filter(|m| m.parent == Some(parent))
            .cloned()
            .collect();
        children.sort_by_key(|m| m.created_at);
        Ok(children)
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        self.monitors.write().await.insert(monitor.id, monitor.clone());
        Ok(())
    }

    async fn delete_monitor(&self, id: MonitorId) -> Result<()> {
        self.monitors.write().await.remove(&id);
        self.heartbeats.write().await.retain(|hb| hb.monitor_id != id);
        Ok(())
    }

    async fn get_last_heartbeat(&self, monitor_id: MonitorId) -> Result<Option<Heartbeat>> {
        Ok(self
            .heartbeats
            .read()
            .await
            .iter()
            .rev()
            .find(|hb| hb.monitor_id == monitor_id)
            .cloned())
    }

    async fn save_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64> {
        if self.fail_heartbeat_saves.load(Ordering::SeqCst) {
            bail!("database is locked");
        }
        let id = self.next_id();
        let mut stored = heartbeat.clone();
        stored.id = Some(id);
        self.heartbeats.write().await.push(stored);
        Ok(id)
    }

    async fn get_recent_heartbeats(&self, monitor_id: MonitorId, limit: usize) -> Result<Vec<Heartbeat>> {
        Ok(self
            .heartbeats
            .read()
            .await
            .iter()
            .rev()
            .filter(|hb| hb.monitor_id == monitor_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_heartbeats_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut heartbeats = self.heartbeats.write().await;
        let len = heartbeats.len();
        heartbeats.retain(|hb| hb.time >= before);
        Ok((len - heartbeats.len()) as u64)
    }

    async fn list_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>> {
        Ok(self.windows.read().await.clone())
    }

    async fn save_maintenance_window(&self, window: &MaintenanceWindow) -> Result<i64> {
        let mut windows = self.windows.write().await;
        if let Some(id) = window.id {
            if let Some(existing) = windows.iter_mut().find(|w| w.id == Some(id)) {
                *existing = window.clone();
                return Ok(id);
            }
        }
        let id = self.next_id();
        windows.push(MaintenanceWindow { id: Some(id), ..window.clone() });
        Ok(id)
    }
}
