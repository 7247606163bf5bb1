pub const TASK_RUNS: &str = "cleanup_task_runs_total";
pub const TASK_FAILURES: &str = "cleanup_task_failures_total";
pub const TASK_SKIPPED: &str = "cleanup_task_skipped_total";
pub const TASK_DURATION: &str = "cleanup_task_duration_ms";
pub const ITEMS_RECLAIMED: &str = "cleanup_items_reclaimed_total";
pub const TASKS_ABANDONED: &str = "cleanup_tasks_abandoned_total";
