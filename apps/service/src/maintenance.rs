//! Maintenance-window collaborator consulted once per tick.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::Database;
use crate::database::models::MonitorId;

#[async_trait]
pub trait MaintenanceWindows: Send + Sync {
    async fn is_under_maintenance(&self, monitor_id: MonitorId, now: DateTime<Utc>) -> Result<bool>;
}

/// Never reports maintenance
pub struct NoMaintenance;

#[async_trait]
impl MaintenanceWindows for NoMaintenance {
    async fn is_under_maintenance(&self, _: MonitorId, _: DateTime<Utc>) -> Result<bool> {
        Ok(false)
    }
}

/// Windows stored in the database. A window on a group also covers
/// every monitor below it.
pub struct StoredMaintenance {
    database: Arc<dyn Database>,
}

impl StoredMaintenance {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl MaintenanceWindows for StoredMaintenance {
    async fn is_under_maintenance(&self, monitor_id: MonitorId, now: DateTime<Utc>) -> Result<bool> {
        let windows: Vec<_> = self
            .database
            .list_maintenance_windows()
            .await?
            .into_iter()
            .filter(|w| w.active && w.starts_at <= now && now < w.ends_at)
            .collect();
        if windows.is_empty() {
            return Ok(false);
        }

        let mut seen = HashSet::new();
        let mut current = Some(monitor_id);
        while let Some(id) = current {
            if !seen.insert(id) {
                // parent cycle
                break;
            }
            if windows.iter().any(|w| w.covers(id, now)) {
                return Ok(true);
            }
            current = self.database.get_monitor(id).await?.and_then(|m| m.parent);
        }
        Ok(false)
    }
}
