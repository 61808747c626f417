//! Monitoring engine module - decides when checks run and what they mean
//!
//! This module is responsible for:
//! - Scheduling each active monitor on its own timer
//! - Executing checks within a time budget
//! - Deriving heartbeats from check results
//! - Pruning old heartbeats

pub mod executor;
pub mod retention;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod validation;

pub use executor::MonitoringExecutor;
pub use retention::{RetentionCleanup, RetentionPolicy};
pub use scheduler::{MonitorScheduler, SchedulePhase, SchedulerOptions};
pub use types::{CheckOutcome, Heartbeat, MonitorStatus};
pub use validation::{IntervalBounds, validate_monitor};
