//! Periodic, priority-ordered maintenance tasks.
//!
//! Every registered task runs on its own timer, so a slow low-priority task never
//! delays a critical one. Executions of the same task never overlap: a tick that
//! finds the previous run still in flight is skipped and logged. A failing or
//! panicking action only marks its own result as failed.

mod error;
mod metrics_constants;
mod scheduler;
mod task;
mod unwind;

pub use error::SchedulerError;
pub use scheduler::{CleanupScheduler, SchedulerOptions, StopReport};
pub use task::{CleanupAction, CleanupPriority, CleanupResult, CleanupTask, TaskStatus};
pub use unwind::{catch_panics, panic_is_caught};
