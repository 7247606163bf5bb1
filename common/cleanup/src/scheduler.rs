use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use health::ComponentHealth;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::metrics_constants::*;
use crate::task::{CleanupResult, CleanupTask, RegisteredTask, TaskStatus};
use crate::unwind::catch_panics;

#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    /// Consecutive failures of a single task after which the scheduler reports `Degraded`.
    pub failure_threshold: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

impl SchedulerOptions {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }
}

/// Outcome of [`CleanupScheduler::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Tasks still executing when the grace period ran out. They were not awaited further.
    pub abandoned: Vec<String>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

struct Inner {
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    /// Sorted by priority, then registration order.
    tasks: Mutex<Vec<Arc<RegisteredTask>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Owns the cleanup tasks and their timers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CleanupScheduler {
    inner: Arc<Inner>,
}

impl Default for CleanupScheduler {
    fn default() -> Self {
        Self::new(SchedulerOptions::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CleanupScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                state: Mutex::new(SchedulerState::Idle),
                tasks: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Adds a task. If the scheduler is already running, the task's timer starts now.
    pub fn register_task(&self, task: CleanupTask) -> Result<(), SchedulerError> {
        if task.interval.is_zero() {
            return Err(SchedulerError::InvalidInterval {
                name: task.name,
                interval: task.interval,
            });
        }

        let state = lock(&self.inner.state);
        if *state == SchedulerState::Stopped {
            return Err(SchedulerError::Stopped);
        }

        let registered = Arc::new(RegisteredTask::new(task));
        {
            let mut tasks = lock(&self.inner.tasks);
            if tasks.iter().any(|t| t.name == registered.name) {
                return Err(SchedulerError::DuplicateTask(registered.name.clone()));
            }
            let position = tasks
                .iter()
                .position(|t| t.priority > registered.priority)
                .unwrap_or(tasks.len());
            tasks.insert(position, registered.clone());
        }

        debug!(
            task = %registered.name,
            priority = %registered.priority,
            interval_ms = registered.interval.as_millis() as u64,
            "Cleanup: task registered"
        );

        if *state == SchedulerState::Running {
            self.spawn_ticker(registered);
        }
        Ok(())
    }

    /// Starts one timer per registered task. The first run of each task happens
    /// one interval from now. Calling it on a running scheduler does nothing.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = lock(&self.inner.state);
        match *state {
            SchedulerState::Running => {
                debug!("Cleanup: scheduler already running");
                return Ok(());
            }
            SchedulerState::Stopped => return Err(SchedulerError::Stopped),
            SchedulerState::Idle => *state = SchedulerState::Running,
        }

        let tasks = lock(&self.inner.tasks).clone();
        info!(tasks = tasks.len(), "Cleanup: scheduler started");
        for task in tasks {
            self.spawn_ticker(task);
        }
        Ok(())
    }

    fn spawn_ticker(&self, task: Arc<RegisteredTask>) {
        let shutdown = self.inner.shutdown.clone();
        let tracker = self.inner.tracker.clone();

        self.inner.tracker.spawn(async move {
            let mut ticks = interval_at(Instant::now() + task.interval, task.interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticks.tick() => {}
                }

                match task.try_begin() {
                    Some(guard) => {
                        tracker.spawn(async move {
                            execute(guard.task()).await;
                        });
                    }
                    None => record_skip(&task),
                }
            }
        });
    }

    /// Runs a task immediately, outside its schedule, and waits for the result.
    pub async fn run_now(&self, name: &str) -> Result<CleanupResult, SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }
        let task = self
            .find(name)
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
        let guard = task
            .try_begin()
            .ok_or_else(|| SchedulerError::AlreadyRunning(name.to_string()))?;
        Ok(execute(guard.task()).await)
    }

    /// Runs every task once, one after the other in priority order. Tasks that are
    /// already running are skipped.
    pub async fn run_all_now(&self) -> Result<Vec<(String, CleanupResult)>, SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }
        let tasks = lock(&self.inner.tasks).clone();

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let Some(guard) = task.try_begin() else {
                record_skip(&task);
                continue;
            };
            let result = execute(guard.task()).await;
            results.push((task.name.clone(), result));
        }
        Ok(results)
    }

    /// Cancels every timer and waits up to `grace` for in-flight runs. Runs still
    /// going after that are abandoned: logged, reported, never awaited again.
    pub async fn stop(&self, grace: Duration) -> StopReport {
        {
            let mut state = lock(&self.inner.state);
            if *state == SchedulerState::Stopped {
                return StopReport::default();
            }
            *state = SchedulerState::Stopped;
        }

        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok()
        {
            info!("Cleanup: scheduler stopped");
            return StopReport::default();
        }

        let abandoned: Vec<String> = lock(&self.inner.tasks)
            .iter()
            .filter(|t| t.is_running())
            .map(|t| t.name.clone())
            .collect();
        for name in &abandoned {
            common_metrics::inc(TASKS_ABANDONED, &[("task".to_string(), name.clone())], 1);
        }
        warn!(
            grace_ms = grace.as_millis() as u64,
            abandoned = ?abandoned,
            "Cleanup: grace period elapsed, abandoning in-flight tasks"
        );
        StopReport { abandoned }
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.inner.state) == SchedulerState::Running
    }

    pub fn is_stopped(&self) -> bool {
        *lock(&self.inner.state) == SchedulerState::Stopped
    }

    /// Status of every task, in priority order.
    pub fn statuses(&self) -> Vec<TaskStatus> {
        lock(&self.inner.tasks).iter().map(|t| t.status()).collect()
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.find(name).map(|t| t.status())
    }

    pub fn health(&self) -> ComponentHealth {
        let mut health = ComponentHealth::healthy();
        for status in self.statuses() {
            if status.consecutive_failures >= self.inner.options.failure_threshold {
                let last_error = status
                    .last_result
                    .as_ref()
                    .and_then(|r| r.error.as_deref())
                    .unwrap_or("unknown error");
                health.degrade(
                    format!(
                        "cleanup-task-failing: {} failed {} runs in a row ({last_error})",
                        status.name, status.consecutive_failures
                    ),
                    Some("check the failing task's dependencies; other tasks keep running"),
                );
            }
        }
        if self.is_stopped() {
            health.note("cleanup-scheduler-stopped");
        }
        health
    }

    fn find(&self, name: &str) -> Option<Arc<RegisteredTask>> {
        lock(&self.inner.tasks)
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }
}

fn record_skip(task: &RegisteredTask) {
    task.stats().skipped += 1;
    common_metrics::inc(TASK_SKIPPED, &task_labels(task), 1);
    warn!(
        task = %task.name,
        "Cleanup: previous run still in flight, skipping this tick"
    );
}

fn task_labels(task: &RegisteredTask) -> [(String, String); 2] {
    [
        ("task".to_string(), task.name.clone()),
        ("priority".to_string(), task.priority.as_str().to_string()),
    ]
}

/// Runs the action once and records the outcome. Callers hold the task's run guard.
async fn execute(task: &RegisteredTask) -> CleanupResult {
    let labels = task_labels(task);
    let _timer = common_metrics::timing_guard(TASK_DURATION, &labels);
    let start = Instant::now();

    let outcome = catch_panics(task.action.run()).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let result = match outcome {
        Ok(Ok(items)) => CleanupResult::succeeded(items, duration_ms),
        Ok(Err(e)) => CleanupResult::failed(format!("{e:#}"), duration_ms),
        Err(panic) => CleanupResult::failed(
            format!("panicked: {}", panic_message(panic.as_ref())),
            duration_ms,
        ),
    };

    common_metrics::inc(TASK_RUNS, &labels, 1);
    let mut stats = task.stats();
    stats.runs += 1;
    stats.last_run_at_ms = Some(common_metrics::now_ms());
    match &result.error {
        None => {
            stats.consecutive_failures = 0;
            common_metrics::inc(ITEMS_RECLAIMED, &labels, result.items_reclaimed);
            debug!(
                task = %task.name,
                items_reclaimed = result.items_reclaimed,
                duration_ms,
                "Cleanup: task finished"
            );
        }
        Some(err) => {
            stats.failures += 1;
            stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
            common_metrics::inc(TASK_FAILURES, &labels, 1);
            error!(
                task = %task.name,
                consecutive_failures = stats.consecutive_failures,
                duration_ms,
                "Cleanup: task failed: {err}"
            );
        }
    }
    stats.last_result = Some(result.clone());

    result
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
