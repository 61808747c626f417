use async_trait::async_trait;

use super::{CheckContext, CheckError, Checker};
use crate::database::models::Monitor;
use crate::monitoring::types::{CheckOutcome, MonitorStatus};

/// Aggregates the last known status of a group's children
pub struct GroupChecker;

#[async_trait]
impl Checker for GroupChecker {
    fn name(&self) -> &'static str {
        "group"
    }

    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let children = ctx.database.get_children(monitor.id).await?;
        if children.is_empty() {
            return Ok(CheckOutcome::pending("Group empty"));
        }

        let mut worst = MonitorStatus::Up;
        let mut down = Vec::new();
        let mut pending = Vec::new();

        for child in children.iter().filter(|child| child.active) {
            let last = ctx.database.get_last_heartbeat(child.id).await?;
            match last.map(|hb| hb.status) {
                Some(MonitorStatus::Down) => {
                    worst = MonitorStatus::Down;
                    down.push(child.name.as_str());
                }
                None | Some(MonitorStatus::Pending) => {
                    if worst != MonitorStatus::Down {
                        worst = MonitorStatus::Pending;
                    }
                    pending.push(child.name.as_str());
                }
                Some(MonitorStatus::Up | MonitorStatus::Maintenance) => {}
            }
        }

        match worst {
            MonitorStatus::Down => {
                let mut msg = format!("Child monitors down: {}", down.join(", "));
                if !pending.is_empty() {
                    msg.push_str(&format!("; pending: {}", pending.join(", ")));
                }
                Err(CheckError::Failed(msg))
            }
            MonitorStatus::Pending => {
                Ok(CheckOutcome::pending(format!("Pending child monitors: {}", pending.join(", "))))
            }
            _ => Ok(CheckOutcome::up("All children up and running")),
        }
    }
}
