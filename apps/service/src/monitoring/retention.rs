//! Periodic deletion of old heartbeats.
//!
//! Heartbeats older than `keep_days` are removed every `cleanup_interval`.
//! The task stops when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::Database;

/// How long heartbeats are kept
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep heartbeats
    pub keep_days: i64,
    /// Time between cleanup runs
    pub cleanup_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep_days: 180, cleanup_interval: Duration::from_secs(3600) }
    }
}

impl RetentionPolicy {
    fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.keep_days)
    }
}

/// Cleanup manager for expired heartbeats
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Delete heartbeats past the retention period, returning how many went
    pub async fn cleanup_expired_heartbeats(&self) -> Result<u64> {
        if self.policy.keep_days <= 0 {
            debug!("Heartbeat retention disabled, keeping everything");
            return Ok(0);
        }

        let cutoff = Utc::now() - self.policy.retention();
        debug!(keep_days = self.policy.keep_days, cutoff = %cutoff, "Cleaning up heartbeats");

        let deleted = self.database.delete_heartbeats_before(cutoff).await?;
        info!(deleted, "Retention cleanup completed");
        Ok(deleted)
    }

    /// Start the background cleanup task. The first run happens immediately.
    pub fn start_periodic_cleanup(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.cleanup_interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Retention cleanup stopped");
                        break;
                    }
                    _ = interval.tick() => {}
                }

                if let Err(e) = self.cleanup_expired_heartbeats().await {
                    warn!("Periodic heartbeat cleanup failed: {}", e);
                }
            }
        })
    }
}
