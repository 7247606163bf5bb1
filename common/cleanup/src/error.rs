use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("cleanup task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("cleanup task '{0}' is not registered")]
    UnknownTask(String),

    #[error("cleanup task '{0}' is already running")]
    AlreadyRunning(String),

    #[error("cleanup task '{name}' has an invalid interval {interval:?}")]
    InvalidInterval { name: String, interval: Duration },

    #[error("cleanup scheduler has been stopped")]
    Stopped,
}
