use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl CleanupPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupPriority::Critical => "critical",
            CleanupPriority::High => "high",
            CleanupPriority::Normal => "normal",
            CleanupPriority::Low => "low",
        }
    }
}

impl fmt::Display for CleanupPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The work a cleanup task does on every run. Returns how many items it reclaimed.
///
/// Implemented for any `Fn() -> impl Future<Output = anyhow::Result<u64>>`, so a
/// closure returning an async block is enough for most tasks.
#[async_trait]
pub trait CleanupAction: Send + Sync {
    async fn run(&self) -> anyhow::Result<u64>;
}

#[async_trait]
impl<F, Fut> CleanupAction for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<u64>> + Send + 'static,
{
    async fn run(&self) -> anyhow::Result<u64> {
        (self)().await
    }
}

pub struct CleanupTask {
    pub name: String,
    pub priority: CleanupPriority,
    pub interval: Duration,
    pub action: Arc<dyn CleanupAction>,
}

impl CleanupTask {
    pub fn new<A>(
        name: impl Into<String>,
        priority: CleanupPriority,
        interval: Duration,
        action: A,
    ) -> Self
    where
        A: CleanupAction + 'static,
    {
        Self {
            name: name.into(),
            priority,
            interval,
            action: Arc::new(action),
        }
    }
}

impl fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupTask")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub items_reclaimed: u64,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CleanupResult {
    pub fn succeeded(items_reclaimed: u64, duration_ms: f64) -> Self {
        Self {
            items_reclaimed,
            duration_ms,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            items_reclaimed: 0,
            duration_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Point-in-time copy of a task's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub name: String,
    pub priority: CleanupPriority,
    pub interval_ms: u64,
    pub last_run_at_ms: Option<i64>,
    pub last_result: Option<CleanupResult>,
    pub runs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub skipped: u64,
    pub running: bool,
}

#[derive(Default)]
pub(crate) struct TaskStats {
    pub last_run_at_ms: Option<i64>,
    pub last_result: Option<CleanupResult>,
    pub runs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub skipped: u64,
}

/// A task owned by the scheduler, plus its mutable state.
pub(crate) struct RegisteredTask {
    pub name: String,
    pub priority: CleanupPriority,
    pub interval: Duration,
    pub action: Arc<dyn CleanupAction>,
    running: AtomicBool,
    stats: Mutex<TaskStats>,
}

impl RegisteredTask {
    pub fn new(task: CleanupTask) -> Self {
        Self {
            name: task.name,
            priority: task.priority,
            interval: task.interval,
            action: task.action,
            running: AtomicBool::new(false),
            stats: Mutex::new(TaskStats::default()),
        }
    }

    /// Marks the task as running; `None` if a run is already in flight.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { task: self.clone() })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MutexGuard<'_, TaskStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> TaskStatus {
        let stats = self.stats();
        TaskStatus {
            name: self.name.clone(),
            priority: self.priority,
            interval_ms: self.interval.as_millis() as u64,
            last_run_at_ms: stats.last_run_at_ms,
            last_result: stats.last_result.clone(),
            runs: stats.runs,
            failures: stats.failures,
            consecutive_failures: stats.consecutive_failures,
            skipped: stats.skipped,
            running: self.is_running(),
        }
    }
}

/// Exclusive right to run a task. Clears the running flag when dropped.
pub(crate) struct RunGuard {
    task: Arc<RegisteredTask>,
}

impl RunGuard {
    pub fn task(&self) -> &RegisteredTask {
        &self.task
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.task.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_critical_first() {
        let mut priorities = vec![
            CleanupPriority::Low,
            CleanupPriority::Critical,
            CleanupPriority::Normal,
            CleanupPriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                CleanupPriority::Critical,
                CleanupPriority::High,
                CleanupPriority::Normal,
                CleanupPriority::Low,
            ]
        );
    }

    #[test]
    fn run_guard_is_exclusive() {
        let task = Arc::new(RegisteredTask::new(CleanupTask::new(
            "noop",
            CleanupPriority::Normal,
            Duration::from_secs(1),
            || async { anyhow::Ok(0u64) },
        )));

        let guard = task.try_begin();
        assert!(guard.is_some());
        assert!(task.try_begin().is_none());
        assert!(task.status().running);

        drop(guard);
        assert!(!task.is_running());
        assert!(task.try_begin().is_some());
    }

    #[test]
    fn result_serializes_camel_case() {
        let value = serde_json::to_value(CleanupResult::succeeded(5, 1.5)).unwrap();
        assert_eq!(value["itemsReclaimed"], 5);
        assert!(value.get("error").is_none());
    }
}
