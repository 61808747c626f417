//! Per-monitor scheduling.
//!
//! Every active monitor gets its own task that alternates between running a
//! tick and sleeping for the delay the state machine returned. Ticks of one
//! monitor are serialized through that monitor's state mutex; ticks of
//! different monitors never wait on each other.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::executor::MonitoringExecutor;
use super::state::{CheckVerdict, derive_heartbeat};
use super::types::{Heartbeat, MonitorStatus};
use super::validation::{IntervalBounds, validate_monitor};
use crate::checkers::CheckerRegistry;
use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::database::models::{Monitor, MonitorId};
use crate::maintenance::{MaintenanceWindows, NoMaintenance};
use crate::notification::{LogNotifier, NotificationSink};

/// Where a monitor is in its scheduling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    /// Not scheduled: never activated, paused, deleted or stopped
    Inactive,
    /// Waiting for its next tick
    Scheduled,
    /// A check is in flight
    Running,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub bounds: IntervalBounds,
    /// How long `stop` waits for in-flight ticks
    pub shutdown_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self { bounds: IntervalBounds::default(), shutdown_grace: Duration::from_secs(10) }
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self { bounds: config.bounds(), shutdown_grace: config.shutdown_grace() }
    }
}

/// State carried from one tick to the next
struct MonitorState {
    /// Last snapshot read from storage, used when storage is unavailable
    monitor: Monitor,
    previous: Option<Heartbeat>,
    retries: u32,
    /// Last notification task; the next one waits for it so sinks see status changes in order
    notification: Option<JoinHandle<()>>,
}

/// Runtime bookkeeping for one monitor
struct SchedulingHandle {
    /// Held for the whole tick; at most one check per monitor is in flight
    state: Arc<Mutex<MonitorState>>,
    /// Cancels the pending timer; `None` once paused
    timer: Option<CancellationToken>,
    running: Arc<AtomicBool>,
    generation: u64,
}

impl SchedulingHandle {
    fn is_live(&self) -> bool {
        self.timer.as_ref().is_some_and(|token| !token.is_cancelled())
    }
}

struct Inner {
    database: Arc<dyn Database>,
    executor: MonitoringExecutor,
    maintenance: Arc<dyn MaintenanceWindows>,
    notifier: Arc<dyn NotificationSink>,
    options: SchedulerOptions,
    handles: DashMap<MonitorId, SchedulingHandle>,
    generation: AtomicU64,
    root: CancellationToken,
    tracker: TaskTracker,
}

/// Builder for [`MonitorScheduler`]
pub struct SchedulerBuilder {
    database: Arc<dyn Database>,
    registry: Arc<CheckerRegistry>,
    maintenance: Arc<dyn MaintenanceWindows>,
    notifier: Arc<dyn NotificationSink>,
    options: SchedulerOptions,
}

impl SchedulerBuilder {
    pub fn maintenance(mut self, maintenance: Arc<dyn MaintenanceWindows>) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> MonitorScheduler {
        let executor =
            MonitoringExecutor::new(self.registry, self.database.clone(), self.options.bounds.max_timeout);
        MonitorScheduler {
            inner: Arc::new(Inner {
                database: self.database,
                executor,
                maintenance: self.maintenance,
                notifier: self.notifier,
                options: self.options,
                handles: DashMap::new(),
                generation: AtomicU64::new(0),
                root: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }
}

/// Owns the set of active monitors and their timers.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct MonitorScheduler {
    inner: Arc<Inner>,
}

impl MonitorScheduler {
    pub fn builder(database: Arc<dyn Database>, registry: Arc<CheckerRegistry>) -> SchedulerBuilder {
        SchedulerBuilder {
            database,
            registry,
            maintenance: Arc::new(NoMaintenance),
            notifier: Arc::new(LogNotifier),
            options: SchedulerOptions::default(),
        }
    }

    /// Schedule every active monitor in storage. The first check of each fires right away.
    pub async fn start(&self) -> Result<usize> {
        let monitors = self.inner.database.list_active_monitors().await?;
        let total = monitors.len();
        let mut scheduled = 0;

        for monitor in monitors {
            match self.schedule(monitor) {
                Ok(()) => scheduled += 1,
                Err(e) => warn!("{}", e),
            }
        }

        info!(scheduled, total, "Scheduler started");
        Ok(scheduled)
    }

    /// Activate (or re-activate after an edit) a monitor.
    ///
    /// Any pending timer is replaced; a check already in flight finishes first.
    pub fn schedule(&self, monitor: Monitor) -> Result<()> {
        if self.inner.root.is_cancelled() {
            bail!("Scheduler is stopped");
        }
        validate_monitor(&monitor, self.inner.executor.registry(), &self.inner.options.bounds)
            .map_err(|e| anyhow!("Refusing to schedule monitor {} ({}): {e}", monitor.name, monitor.id))?;

        let id = monitor.id;
        let token = self.inner.root.child_token();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let (state, running) = {
            let mut handle = self.inner.handles.entry(id).or_insert_with(|| SchedulingHandle {
                state: Arc::new(Mutex::new(MonitorState {
                    monitor: monitor.clone(),
                    previous: None,
                    retries: 0,
                    notification: None,
                })),
                timer: None,
                running: Arc::new(AtomicBool::new(false)),
                generation,
            });
            if let Some(old) = handle.timer.replace(token.clone()) {
                debug!(monitor = %id, "Replacing pending timer");
                old.cancel();
            }
            handle.generation = generation;
            (handle.state.clone(), handle.running.clone())
        };

        info!(target: "uptime_engine::audit", monitor = %id, name = %monitor.name, r#type = %monitor.monitor_type, interval = monitor.interval_seconds, "Monitor scheduled");

        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            inner.run(id, monitor, state, running, token, generation).await;
        });
        Ok(())
    }

    /// Pause a monitor. A check in flight is recorded, but nothing further runs.
    pub fn unschedule(&self, id: MonitorId) -> bool {
        let cancelled = match self.inner.handles.get_mut(&id) {
            Some(mut handle) => handle.timer.take().map(|token| token.cancel()).is_some(),
            None => false,
        };
        if cancelled {
            info!(target: "uptime_engine::audit", monitor = %id, "Monitor unscheduled");
        }
        cancelled
    }

    /// Forget a deleted monitor
    pub fn delete(&self, id: MonitorId) {
        self.unschedule(id);
        info!(target: "uptime_engine::audit", monitor = %id, "Monitor deleted");
    }

    /// Re-read a monitor from storage and apply its active flag
    pub async fn reload(&self, id: MonitorId) -> Result<()> {
        match self.inner.database.get_monitor(id).await? {
            Some(monitor) if monitor.active => self.schedule(monitor),
            Some(_) => {
                self.unschedule(id);
                Ok(())
            }
            None => {
                self.delete(id);
                Ok(())
            }
        }
    }

    pub fn phase(&self, id: MonitorId) -> SchedulePhase {
        match self.inner.handles.get(&id) {
            Some(handle) if handle.running.load(Ordering::SeqCst) => SchedulePhase::Running,
            Some(handle) if handle.is_live() => SchedulePhase::Scheduled,
            _ => SchedulePhase::Inactive,
        }
    }

    /// Number of monitors with a live timer
    pub fn scheduled_count(&self) -> usize {
        self.inner.handles.iter().filter(|handle| handle.is_live()).count()
    }

    /// Cancel every timer and wait up to the grace period for in-flight ticks
    pub async fn stop(&self) {
        info!("Stopping scheduler");
        self.inner.root.cancel();
        self.inner.tracker.close();

        let grace = self.inner.options.shutdown_grace;
        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_err() {
            warn!(grace_seconds = grace.as_secs(), "Shutdown grace period elapsed with checks still in flight");
        }
        info!("Scheduler stopped");
    }

    /// Token cancelled when the scheduler stops, for companion background tasks
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.root.clone()
    }
}

impl Inner {
    /// The life of one activation: tick, sleep, repeat until cancelled or stopped.
    async fn run(
        self: Arc<Self>,
        id: MonitorId,
        monitor: Monitor,
        state: Arc<Mutex<MonitorState>>,
        running: Arc<AtomicBool>,
        token: CancellationToken,
        generation: u64,
    ) {
        let mut first = true;
        let mut snapshot = Some(monitor);

        loop {
            if token.is_cancelled() {
                break;
            }

            let next = self.tick(id, &state, &running, &token, first, snapshot.take()).await;
            first = false;

            let Some(next) = next else {
                break;
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(next) => {}
            }
        }

        // A newer activation owns the handle once the generation moved on
        self.handles.remove_if(&id, |_, handle| handle.generation == generation);
        debug!(monitor = %id, "Monitor task finished");
    }

    /// Run one tick under the monitor's lock. Returns the delay to the next
    /// tick, or `None` when the monitor should no longer be scheduled.
    async fn tick(
        &self,
        id: MonitorId,
        state: &Mutex<MonitorState>,
        running: &AtomicBool,
        token: &CancellationToken,
        activation: bool,
        snapshot: Option<Monitor>,
    ) -> Option<Duration> {
        let mut state = state.lock().await;
        if token.is_cancelled() {
            return None;
        }
        if let Some(monitor) = snapshot {
            state.monitor = monitor;
        }

        running.store(true, Ordering::SeqCst);
        let result = AssertUnwindSafe(self.tick_locked(id, &mut state, activation)).catch_unwind().await;
        running.store(false, Ordering::SeqCst);

        match result {
            Ok(next) => next,
            Err(_) => {
                error!(monitor = %id, "Tick panicked; rescheduling with the normal interval");
                Some(state.monitor.interval())
            }
        }
    }

    async fn tick_locked(&self, id: MonitorId, state: &mut MonitorState, activation: bool) -> Option<Duration> {
        let monitor = match self.database.get_monitor(id).await {
            Ok(Some(monitor)) => monitor,
            Ok(None) => {
                info!(target: "uptime_engine::audit", monitor = %id, "Monitor no longer exists, stopping");
                return None;
            }
            Err(e) => {
                warn!(monitor = %id, error = %e, "Failed to read monitor, using last known configuration");
                state.monitor.clone()
            }
        };
        if !monitor.active {
            info!(target: "uptime_engine::audit", monitor = %id, "Monitor is paused, stopping");
            return None;
        }
        if let Err(e) = validate_monitor(&monitor, self.executor.registry(), &self.options.bounds) {
            error!(target: "uptime_engine::audit", monitor = %id, error = %e, "Stored monitor is invalid, stopping");
            return None;
        }

        if activation {
            match self.database.get_last_heartbeat(id).await {
                Ok(previous) => {
                    state.retries = previous.as_ref().map_or(0, |hb| hb.retries);
                    state.previous = previous;
                }
                Err(e) => warn!(monitor = %id, error = %e, "Failed to load last heartbeat"),
            }
        }

        let verdict = match self.maintenance.is_under_maintenance(id, Utc::now()).await {
            Ok(true) => CheckVerdict::Maintenance,
            Ok(false) => CheckVerdict::Completed(self.executor.execute(&monitor).await),
            Err(e) => {
                warn!(monitor = %id, error = %e, "Failed to check maintenance windows");
                CheckVerdict::Completed(self.executor.execute(&monitor).await)
            }
        };

        let transition = derive_heartbeat(&monitor, state.previous.as_ref(), state.retries, verdict, Utc::now());
        let heartbeat = transition.heartbeat;
        log_heartbeat(&monitor, &heartbeat);

        if let Err(e) = self.database.save_heartbeat(&heartbeat).await {
            error!(monitor = %id, error = %e, heartbeat = ?heartbeat, "Failed to save heartbeat");
        }

        if heartbeat.important {
            let notifier = self.notifier.clone();
            let (monitor, heartbeat) = (monitor.clone(), heartbeat.clone());
            let earlier = state.notification.take();
            state.notification = Some(self.tracker.spawn(async move {
                if let Some(earlier) = earlier {
                    let _ = earlier.await;
                }
                if let Err(e) = notifier.on_important_heartbeat(&monitor, &heartbeat).await {
                    warn!(monitor = %monitor.id, error = %e, "Notification failed");
                }
            }));
        }

        state.retries = transition.retries;
        state.previous = Some(heartbeat);
        state.monitor = monitor;
        Some(transition.next_interval)
    }
}

fn log_heartbeat(monitor: &Monitor, heartbeat: &Heartbeat) {
    match heartbeat.status {
        MonitorStatus::Up | MonitorStatus::Maintenance => info!(
            monitor = %monitor.id,
            name = %monitor.name,
            status = %heartbeat.status,
            ping = ?heartbeat.ping,
            important = heartbeat.important,
            "{}", heartbeat.msg
        ),
        MonitorStatus::Pending | MonitorStatus::Down => warn!(
            monitor = %monitor.id,
            name = %monitor.name,
            status = %heartbeat.status,
            retries = heartbeat.retries,
            important = heartbeat.important,
            "{}", heartbeat.msg
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::checkers::{CheckContext, CheckError, Checker};
    use crate::database::MemoryDatabase;
    use crate::monitoring::types::CheckOutcome;

    /// Replays a fixed list of results, then reports UP forever
    #[derive(Default)]
    struct ScriptedChecker {
        script: std::sync::Mutex<VecDeque<Result<CheckOutcome, String>>>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedChecker {
        fn failing(msg: &str, times: usize) -> Self {
            let script = (0..times).map(|_| Err(msg.to_string())).collect();
            Self { script: std::sync::Mutex::new(script), ..Default::default() }
        }

        fn slow(delay: Duration) -> Self {
            Self { delay, ..Default::default() }
        }
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn check(&self, _: &Monitor, _: &CheckContext) -> Result<CheckOutcome, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(msg)) => Err(CheckError::failed(msg)),
                None => Ok(CheckOutcome::up("ok")),
            }
        }
    }

    struct PanickingChecker;

    #[async_trait]
    impl Checker for PanickingChecker {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn check(&self, _: &Monitor, _: &CheckContext) -> Result<CheckOutcome, CheckError> {
            panic!("boom")
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: std::sync::Mutex<Vec<MonitorStatus>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn on_important_heartbeat(&self, _: &Monitor, heartbeat: &Heartbeat) -> Result<()> {
            self.seen.lock().unwrap().push(heartbeat.status);
            Ok(())
        }
    }

    fn test_options() -> SchedulerOptions {
        SchedulerOptions {
            bounds: IntervalBounds {
                min_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(3600),
                max_timeout: Duration::from_secs(60),
            },
            shutdown_grace: Duration::from_secs(5),
        }
    }

    fn build(db: &Arc<MemoryDatabase>, registry: CheckerRegistry) -> (MonitorScheduler, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = MonitorScheduler::builder(db.clone(), Arc::new(registry))
            .notifier(notifier.clone())
            .options(test_options())
            .build();
        (scheduler, notifier)
    }

    fn registry_with(checker: Arc<dyn Checker>) -> CheckerRegistry {
        let mut registry = CheckerRegistry::new();
        registry.insert("scripted", checker);
        registry
    }

    async fn saved_monitor(db: &MemoryDatabase, monitor: Monitor) -> Monitor {
        db.save_monitor(&monitor).await.unwrap();
        monitor
    }

    fn statuses(heartbeats: &[Heartbeat]) -> Vec<MonitorStatus> {
        heartbeats.iter().map(|hb| hb.status).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_refused_goes_pending_then_down() {
        let db = Arc::new(MemoryDatabase::new());
        let checker = Arc::new(ScriptedChecker::failing("connect ECONNREFUSED 127.0.0.1:9", 100));
        let (scheduler, notifier) = build(&db, registry_with(checker));
        let monitor = saved_monitor(
            &db,
            Monitor::new("refused", "scripted").with_interval(1, 1).with_max_retries(1),
        )
        .await;

        scheduler.schedule(monitor.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        scheduler.stop().await;

        let heartbeats = db.heartbeats_for(monitor.id).await;
        assert!(heartbeats.len() >= 3, "got {} heartbeats", heartbeats.len());
        assert_eq!(
            statuses(&heartbeats[..3]),
            vec![MonitorStatus::Pending, MonitorStatus::Down, MonitorStatus::Down]
        );
        assert_eq!(heartbeats[0].retries, 1);
        assert_eq!(heartbeats[1].retries, 0);
        assert!(heartbeats[0].important);
        assert!(heartbeats[1].important);
        assert!(!heartbeats[2].important);
        assert_eq!(heartbeats[0].msg, "connect ECONNREFUSED 127.0.0.1:9");
        assert_eq!(*notifier.seen.lock().unwrap(), vec![MonitorStatus::Pending, MonitorStatus::Down]);
    }

    /// Takes longer for the first heartbeat than for the ones after it
    #[derive(Default)]
    struct SlowFirstNotifier {
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<MonitorStatus>>,
    }

    #[async_trait]
    impl NotificationSink for SlowFirstNotifier {
        async fn on_important_heartbeat(&self, _: &Monitor, heartbeat: &Heartbeat) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            self.seen.lock().unwrap().push(heartbeat.status);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_keep_heartbeat_order() {
        let db = Arc::new(MemoryDatabase::new());
        let checker = Arc::new(ScriptedChecker::failing("connect ECONNREFUSED 127.0.0.1:9", 100));
        let notifier = Arc::new(SlowFirstNotifier::default());
        let scheduler = MonitorScheduler::builder(db.clone(), Arc::new(registry_with(checker)))
            .notifier(notifier.clone())
            .options(test_options())
            .build();
        let monitor = saved_monitor(
            &db,
            Monitor::new("ordered", "scripted").with_interval(1, 1).with_max_retries(1),
        )
        .await;

        scheduler.schedule(monitor.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        // the DOWN beat is recorded while the PENDING notification is still running
        assert!(notifier.seen.lock().unwrap().is_empty());
        scheduler.stop().await;

        assert_eq!(*notifier.seen.lock().unwrap(), vec![MonitorStatus::Pending, MonitorStatus::Down]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_check_in_flight() {
        let db = Arc::new(MemoryDatabase::new());
        let checker = Arc::new(ScriptedChecker::slow(Duration::from_secs(5)));
        let (scheduler, _) = build(&db, registry_with(checker.clone()));
        let mut monitor = Monitor::new("slow", "scripted").with_interval(1, 1);
        monitor.timeout_seconds = Some(30);
        let monitor = saved_monitor(&db, monitor).await;

        scheduler.schedule(monitor.clone()).unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(700)).await;
            scheduler.schedule(monitor.clone()).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.stop().await;

        assert!(checker.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(checker.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_checker_does_not_affect_others() {
        let db = Arc::new(MemoryDatabase::new());
        let mut registry = registry_with(Arc::new(ScriptedChecker::default()));
        registry.register(PanickingChecker);
        let (scheduler, _) = build(&db, registry);

        let bad = saved_monitor(&db, Monitor::new("bad", "panicking").with_interval(1, 1)).await;
        let good = saved_monitor(&db, Monitor::new("good", "scripted").with_interval(1, 1)).await;

        assert_eq!(scheduler.start().await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        scheduler.stop().await;

        let bad_beats = db.heartbeats_for(bad.id).await;
        assert!(bad_beats.len() >= 2);
        assert!(bad_beats.iter().all(|hb| hb.status == MonitorStatus::Down));
        assert_eq!(bad_beats[0].msg, "Check panicked: boom");

        let good_beats = db.heartbeats_for(good.id).await;
        assert!(good_beats.len() >= 2);
        assert!(good_beats.iter().all(|hb| hb.status == MonitorStatus::Up));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_saves_do_not_stop_scheduling() {
        let db = Arc::new(MemoryDatabase::new());
        let (scheduler, _) = build(&db, registry_with(Arc::new(ScriptedChecker::default())));
        let monitor = saved_monitor(&db, Monitor::new("flaky storage", "scripted").with_interval(1, 1)).await;

        db.set_fail_heartbeat_saves(true);
        scheduler.schedule(monitor.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(db.heartbeats_for(monitor.id).await.is_empty());
        assert_eq!(scheduler.phase(monitor.id), SchedulePhase::Scheduled);

        db.set_fail_heartbeat_saves(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.stop().await;

        let heartbeats = db.heartbeats_for(monitor.id).await;
        assert!(!heartbeats.is_empty());
        // The first UP was never persisted but still counts as the previous beat
        assert!(heartbeats.iter().all(|hb| !hb.important));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_records_in_flight_check_and_stops() {
        let db = Arc::new(MemoryDatabase::new());
        let checker = Arc::new(ScriptedChecker::slow(Duration::from_secs(3)));
        let (scheduler, _) = build(&db, registry_with(checker.clone()));
        let mut monitor = Monitor::new("paused", "scripted").with_interval(1, 1);
        monitor.timeout_seconds = Some(10);
        let monitor = saved_monitor(&db, monitor).await;

        scheduler.schedule(monitor.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.phase(monitor.id), SchedulePhase::Running);
        assert!(scheduler.unschedule(monitor.id));
        assert!(!scheduler.unschedule(monitor.id));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(db.heartbeats_for(monitor.id).await.len(), 1);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.phase(monitor.id), SchedulePhase::Inactive);
        assert_eq!(scheduler.scheduled_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_restores_state_from_storage() {
        let db = Arc::new(MemoryDatabase::new());
        let checker = Arc::new(ScriptedChecker::failing("still broken", 10));
        let (scheduler, notifier) = build(&db, registry_with(checker));
        let monitor =
            saved_monitor(&db, Monitor::new("resumed", "scripted").with_interval(30, 30).with_max_retries(2)).await;

        let last = Heartbeat {
            id: None,
            monitor_id: monitor.id,
            time: Utc::now() - chrono::Duration::minutes(5),
            status: MonitorStatus::Down,
            msg: "still broken".into(),
            ping: None,
            duration: 0,
            retries: 0,
            important: true,
            value: None,
            response: None,
        };
        db.save_heartbeat(&last).await.unwrap();

        scheduler.schedule(monitor.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.stop().await;

        let heartbeats = db.heartbeats_for(monitor.id).await;
        assert_eq!(heartbeats.len(), 2);
        assert_eq!(heartbeats[1].status, MonitorStatus::Down);
        assert!(!heartbeats[1].important);
        assert!(heartbeats[1].duration >= 300);
        assert!(notifier.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_monitor_stops_on_next_tick() {
        let db = Arc::new(MemoryDatabase::new());
        let (scheduler, _) = build(&db, registry_with(Arc::new(ScriptedChecker::default())));
        let monitor = saved_monitor(&db, Monitor::new("deleted", "scripted").with_interval(1, 1)).await;

        scheduler.schedule(monitor.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        db.delete_monitor(monitor.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(scheduler.phase(monitor.id), SchedulePhase::Inactive);
        assert_eq!(scheduler.scheduled_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_stored_edit_stops_the_monitor() {
        let db = Arc::new(MemoryDatabase::new());
        let checker = Arc::new(ScriptedChecker::default());
        let (scheduler, _) = build(&db, registry_with(checker.clone()));
        let mut monitor = saved_monitor(&db, Monitor::new("edited", "scripted").with_interval(1, 1)).await;

        scheduler.schedule(monitor.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);

        monitor.interval_seconds = 0;
        db.save_monitor(&monitor).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(db.heartbeats_for(monitor.id).await.len(), 1);
        assert_eq!(scheduler.phase(monitor.id), SchedulePhase::Inactive);
        assert_eq!(scheduler.scheduled_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_applies_active_flag() {
        let db = Arc::new(MemoryDatabase::new());
        let (scheduler, _) = build(&db, registry_with(Arc::new(ScriptedChecker::default())));
        let mut monitor = saved_monitor(&db, Monitor::new("toggled", "scripted").with_interval(5, 5)).await;

        scheduler.reload(monitor.id).await.unwrap();
        assert_eq!(scheduler.scheduled_count(), 1);

        monitor.active = false;
        db.save_monitor(&monitor).await.unwrap();
        scheduler.reload(monitor.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.phase(monitor.id), SchedulePhase::Inactive);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_skips_invalid_monitors() {
        let db = Arc::new(MemoryDatabase::new());
        let (scheduler, _) = build(&db, registry_with(Arc::new(ScriptedChecker::default())));
        saved_monitor(&db, Monitor::new("valid", "scripted").with_interval(5, 5)).await;
        saved_monitor(&db, Monitor::new("unknown", "carrier-pigeon").with_interval(5, 5)).await;
        let mut too_fast = saved_monitor(&db, Monitor::new("too fast", "scripted").with_interval(5, 5)).await;
        too_fast.interval_seconds = 0;
        db.save_monitor(&too_fast).await.unwrap();

        assert_eq!(scheduler.start().await.unwrap(), 1);
        assert_eq!(scheduler.scheduled_count(), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_stop_is_rejected() {
        let db = Arc::new(MemoryDatabase::new());
        let (scheduler, _) = build(&db, registry_with(Arc::new(ScriptedChecker::default())));
        let monitor = saved_monitor(&db, Monitor::new("late", "scripted").with_interval(5, 5)).await;

        scheduler.stop().await;
        assert!(scheduler.schedule(monitor).is_err());
        assert_eq!(scheduler.scheduled_count(), 0);
    }
}
