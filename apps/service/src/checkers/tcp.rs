use std::time::Instant;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{CheckContext, CheckError, Checker};
use crate::database::models::Monitor;
use crate::monitoring::types::CheckOutcome;

/// TCP port checker
pub struct TcpChecker;

#[async_trait]
impl Checker for TcpChecker {
    fn name(&self) -> &'static str {
        "port"
    }

    async fn check(&self, monitor: &Monitor, ctx: &CheckContext) -> Result<CheckOutcome, CheckError> {
        let hostname = monitor
            .target
            .hostname
            .as_deref()
            .ok_or_else(|| CheckError::failed("Monitor has no hostname configured"))?;
        let port = monitor.target.port.ok_or_else(|| CheckError::failed("Monitor has no port configured"))?;

        let start = Instant::now();
        let stream = timeout(ctx.timeout, TcpStream::connect((hostname, port)))
            .await
            .map_err(|_| CheckError::Timeout(ctx.timeout))?
            .map_err(|e| CheckError::Failed(format!("Connection failed: {e}")))?;
        let ping = start.elapsed().as_millis() as u64;
        drop(stream);

        Ok(CheckOutcome::up(format!("{ping} ms")).with_ping(ping))
    }
}
