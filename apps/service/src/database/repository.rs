use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::models::{
    MaintenanceWindow, Monitor, MonitorId, MonitorTarget, i64_to_timestamp, timestamp_to_i64,
};
use crate::monitoring::types::{Heartbeat, MonitorStatus};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Storage collaborator used by the scheduler, checkers and retention job.
///
/// Calls are expected to be fast but may fail transiently.
#[async_trait]
pub trait Database: Send + Sync {
    /// Get a monitor by id
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<Monitor>>;

    /// Get all monitors flagged active
    async fn list_active_monitors(&self) -> Result<Vec<Monitor>>;

    /// Get the direct children of a group monitor
    async fn get_children(&self, parent: MonitorId) -> Result<Vec<Monitor>>;

    /// Insert or update a monitor
    async fn save_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Delete a monitor and its heartbeats
    async fn delete_monitor(&self, id: MonitorId) -> Result<()>;

    /// Most recent heartbeat of a monitor
    async fn get_last_heartbeat(&self, monitor_id: MonitorId) -> Result<Option<Heartbeat>>;

    /// Persist a heartbeat, returning its row id
    async fn save_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64>;

    /// Recent heartbeats of a monitor, newest first
    async fn get_recent_heartbeats(&self, monitor_id: MonitorId, limit: usize) -> Result<Vec<Heartbeat>>;

    /// Delete heartbeats older than `before`, returning how many were removed
    async fn delete_heartbeats_before(&self, before: DateTime<Utc>) -> Result<u64>;

    /// All maintenance windows
    async fn list_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>>;

    /// Insert or update a maintenance window, returning its row id
    async fn save_maintenance_window(&self, window: &MaintenanceWindow) -> Result<i64>;
}

const MONITOR_COLUMNS: &str = "uuid, name, monitor_type, target, interval_seconds, retry_interval_seconds, max_retries, timeout_seconds, upside_down, active, parent_uuid, conditions, created_at, updated_at";

const HEARTBEAT_COLUMNS: &str =
    "id, monitor_uuid, time, status, msg, ping, duration, retries, important, value, response";

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("failed to get database connection: {e}"))
    }

    async fn query_monitors(&self, filter: &str, params: Vec<libsql::Value>) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors {filter}");
        let mut rows = conn.query(&sql, params).await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    let uuid: String = row.get(0)?;
    let target: String = row.get(3)?;
    let parent: Option<String> = row.get(10)?;

    Ok(Monitor {
        id: Uuid::parse_str(&uuid)?,
        name: row.get(1)?,
        monitor_type: row.get(2)?,
        target: serde_json::from_str::<MonitorTarget>(&target)?,
        interval_seconds: row.get::<i64>(4)? as u64,
        retry_interval_seconds: row.get::<i64>(5)? as u64,
        max_retries: row.get::<i64>(6)? as u32,
        timeout_seconds: row.get::<Option<i64>>(7)?.map(|v| v as u64),
        upside_down: row.get::<i64>(8)? != 0,
        active: row.get::<i64>(9)? != 0,
        parent: parent.as_deref().map(Uuid::parse_str).transpose()?,
        conditions: row.get(11)?,
        created_at: i64_to_timestamp(row.get(12)?),
        updated_at: i64_to_timestamp(row.get(13)?),
    })
}

fn heartbeat_from_row(row: &Row) -> Result<Heartbeat> {
    let monitor_uuid: String = row.get(1)?;
    let status: i64 = row.get(3)?;

    Ok(Heartbeat {
        id: Some(row.get(0)?),
        monitor_id: Uuid::parse_str(&monitor_uuid)?,
        time: i64_to_timestamp(row.get(2)?),
        status: MonitorStatus::from_code(status).ok_or_else(|| anyhow!("invalid heartbeat status {status}"))?,
        msg: row.get(4)?,
        ping: row.get::<Option<i64>>(5)?.map(|v| v as u64),
        duration: row.get(6)?,
        retries: row.get::<i64>(7)? as u32,
        important: row.get::<i64>(8)? != 0,
        value: row.get(9)?,
        response: row.get(10)?,
    })
}

fn window_from_row(row: &Row) -> Result<MaintenanceWindow> {
    let monitor_uuid: Option<String> = row.get(1)?;

    Ok(MaintenanceWindow {
        id: Some(row.get(0)?),
        monitor_id: monitor_uuid.as_deref().map(Uuid::parse_str).transpose()?,
        title: row.get(2)?,
        starts_at: i64_to_timestamp(row.get(3)?),
        ends_at: i64_to_timestamp(row.get(4)?),
        active: row.get::<i64>(5)? != 0,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<Monitor>> {
        let mut monitors = self
            .query_monitors("WHERE uuid = ?", vec![id.to_string().into()])
            .await?;
        Ok(monitors.pop())
    }

    async fn list_active_monitors(&self) -> Result<Vec<Monitor>> {
        self.query_monitors("WHERE active = 1 ORDER BY created_at", Vec::new()).await
    }

    async fn get_children(&self, parent: MonitorId) -> Result<Vec<Monitor>> {
        self.query_monitors("WHERE parent_uuid = ? ORDER BY created_at", vec![parent.to_string().into()])
            .await
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        let target = serde_json::to_string(&monitor.target)?;

        conn.execute(
            &format!(
                "INSERT INTO monitors ({MONITOR_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(uuid) DO UPDATE SET
                    name = excluded.name,
                    monitor_type = excluded.monitor_type,
                    target = excluded.target,
                    interval_seconds = excluded.interval_seconds,
                    retry_interval_seconds = excluded.retry_interval_seconds,
                    max_retries = excluded.max_retries,
                    timeout_seconds = excluded.timeout_seconds,
                    upside_down = excluded.upside_down,
                    active = excluded.active,
                    parent_uuid = excluded.parent_uuid,
                    conditions = excluded.conditions,
                    updated_at = excluded.updated_at"
            ),
            params![
                monitor.id.to_string(),
                monitor.name.clone(),
                monitor.monitor_type.clone(),
                target,
                monitor.interval_seconds as i64,
                monitor.retry_interval_seconds as i64,
                monitor.max_retries as i64,
                monitor.timeout_seconds.map(|v| v as i64),
                if monitor.upside_down { 1 } else { 0 },
                if monitor.active { 1 } else { 0 },
                monitor.parent.map(|p| p.to_string()),
                monitor.conditions.clone(),
                timestamp_to_i64(monitor.created_at),
                timestamp_to_i64(monitor.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_monitor(&self, id: MonitorId) -> Result<()> {
        let conn = self.get_conn().await?;

        // Foreign keys are not enforced on every connection, so clear heartbeats explicitly
        conn.execute("DELETE FROM heartbeats WHERE monitor_uuid = ?", params![id.to_string()]).await?;
        conn.execute("DELETE FROM monitors WHERE uuid = ?", params![id.to_string()]).await?;
        Ok(())
    }

    async fn get_last_heartbeat(&self, monitor_id: MonitorId) -> Result<Option<Heartbeat>> {
        Ok(self.get_recent_heartbeats(monitor_id, 1).await?.pop())
    }

    async fn save_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO heartbeats (monitor_uuid, time, status, msg, ping, duration, retries, important, value, response) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                heartbeat.monitor_id.to_string(),
                timestamp_to_i64(heartbeat.time),
                heartbeat.status.code(),
                heartbeat.msg.clone(),
                heartbeat.ping.map(|v| v as i64),
                heartbeat.duration,
                heartbeat.retries as i64,
                if heartbeat.important { 1 } else { 0 },
                heartbeat.value,
                heartbeat.response.clone()
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_recent_heartbeats(&self, monitor_id: MonitorId, limit: usize) -> Result<Vec<Heartbeat>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE monitor_uuid = ? ORDER BY time DESC, id DESC LIMIT ?"
        );
        let mut rows = conn.query(&sql, params![monitor_id.to_string(), limit as i64]).await?;

        let mut heartbeats = Vec::new();
        while let Some(row) = rows.next().await? {
            heartbeats.push(heartbeat_from_row(&row)?);
        }
        Ok(heartbeats)
    }

    async fn delete_heartbeats_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM heartbeats WHERE time < ?", params![timestamp_to_i64(before)])
            .await?;
        Ok(deleted)
    }

    async fn list_maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, monitor_uuid, title, starts_at, ends_at, active FROM maintenance_windows ORDER BY starts_at",
                (),
            )
            .await?;

        let mut windows = Vec::new();
        while let Some(row) = rows.next().await? {
            windows.push(window_from_row(&row)?);
        }
        Ok(windows)
    }

    async fn save_maintenance_window(&self, window: &MaintenanceWindow) -> Result<i64> {
        let conn = self.get_conn().await?;
        let monitor_uuid = window.monitor_id.map(|id| id.to_string());

        if let Some(id) = window.id {
            conn.execute(
                "UPDATE maintenance_windows SET monitor_uuid = ?, title = ?, starts_at = ?, ends_at = ?, active = ? WHERE id = ?",
                params![
                    monitor_uuid,
                    window.title.clone(),
                    timestamp_to_i64(window.starts_at),
                    timestamp_to_i64(window.ends_at),
                    if window.active { 1 } else { 0 },
                    id
                ],
            )
            .await?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO maintenance_windows (monitor_uuid, title, starts_at, ends_at, active) VALUES (?, ?, ?, ?, ?)",
                params![
                    monitor_uuid,
                    window.title.clone(),
                    timestamp_to_i64(window.starts_at),
                    timestamp_to_i64(window.ends_at),
                    if window.active { 1 } else { 0 }
                ],
            )
            .await?;
            Ok(conn.last_insert_rowid())
        }
    }
}
