use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::time::timeout;

use super::types::CheckOutcome;
use crate::checkers::{CheckContext, CheckError, CheckerRegistry};
use crate::database::Database;
use crate::database::models::Monitor;

/// Slack on top of a check's own budget before the executor gives up on it
const TIMEOUT_SLACK: Duration = Duration::from_secs(1);

/// Monitoring executor - runs one check for a monitor snapshot.
///
/// The checker is resolved from the registry on every call so a type change
/// takes effect on the next tick.
pub struct MonitoringExecutor {
    registry: Arc<CheckerRegistry>,
    database: Arc<dyn Database>,
    max_timeout: Duration,
}

impl MonitoringExecutor {
    pub fn new(registry: Arc<CheckerRegistry>, database: Arc<dyn Database>, max_timeout: Duration) -> Self {
        Self { registry, database, max_timeout }
    }

    pub fn registry(&self) -> &CheckerRegistry {
        &self.registry
    }

    /// Execute a check. Timeouts and panics inside the checker come back as errors.
    pub async fn execute(&self, monitor: &Monitor) -> Result<CheckOutcome, CheckError> {
        let checker = self
            .registry
            .get(&monitor.monitor_type)
            .ok_or_else(|| CheckError::UnknownType(monitor.monitor_type.clone()))?;

        let budget = monitor.check_timeout(self.max_timeout);
        let ctx = CheckContext { database: self.database.clone(), timeout: budget };

        let start = Instant::now();
        let check = AssertUnwindSafe(checker.check(monitor, &ctx)).catch_unwind();
        let result = match timeout(budget + TIMEOUT_SLACK, check).await {
            Err(_) => Err(CheckError::Timeout(budget)),
            Ok(Err(panic)) => Err(CheckError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        };

        result.map(|mut outcome| {
            if outcome.ping.is_none() {
                outcome.ping = Some(start.elapsed().as_millis() as u64);
            }
            outcome
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::checkers::Checker;
    use crate::database::MemoryDatabase;
    use crate::monitoring::types::MonitorStatus;

    struct Hanging;

    #[async_trait]
    impl Checker for Hanging {
        fn name(&self) -> &'static str {
            "hang"
        }

        async fn check(&self, _: &Monitor, _: &CheckContext) -> Result<CheckOutcome, CheckError> {
            std::future::pending().await
        }
    }

    struct Panicking;

    #[async_trait]
    impl Checker for Panicking {
        fn name(&self) -> &'static str {
            "panic"
        }

        async fn check(&self, _: &Monitor, _: &CheckContext) -> Result<CheckOutcome, CheckError> {
            panic!("index out of bounds")
        }
    }

    struct Instant200;

    #[async_trait]
    impl Checker for Instant200 {
        fn name(&self) -> &'static str {
            "ok"
        }

        async fn check(&self, _: &Monitor, _: &CheckContext) -> Result<CheckOutcome, CheckError> {
            Ok(CheckOutcome::up("200 - OK"))
        }
    }

    fn executor() -> MonitoringExecutor {
        let mut registry = CheckerRegistry::new();
        registry.register(Hanging).register(Panicking).register(Instant200);
        MonitoringExecutor::new(Arc::new(registry), Arc::new(MemoryDatabase::new()), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_unknown_type_fails() {
        let err = executor().execute(&Monitor::new("ftp", "ftp")).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown monitor type: ftp");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_check_times_out() {
        let monitor = Monitor::new("slow", "hang").with_interval(10, 10);
        let err = executor().execute(&monitor).await.unwrap_err();
        assert!(matches!(err, CheckError::Timeout(d) if d == Duration::from_secs(8)));
        assert_eq!(err.to_string(), "Timeout after 8s");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let err = executor().execute(&Monitor::new("buggy", "panic")).await.unwrap_err();
        assert_eq!(err.to_string(), "Check panicked: index out of bounds");
    }

    #[tokio::test]
    async fn test_ping_is_filled_in() {
        let outcome = executor().execute(&Monitor::new("api", "ok")).await.unwrap();
        assert_eq!(outcome.status, MonitorStatus::Up);
        assert!(outcome.ping.is_some());
    }
}
