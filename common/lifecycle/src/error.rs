//! Lifecycle and fault supervision error types.

use thiserror::Error;

use crate::events::HostSignal;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The startup closure passed to [`Coordinator::initialize_with`](crate::Coordinator::initialize_with) failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// A host signal handler failed while the process was still initializing.
    #[error("handler for {signal} failed: {reason}")]
    SignalFailed { signal: HostSignal, reason: String },

    /// The coordinator already shut down, or never finished initializing.
    #[error("lifecycle already terminated")]
    Terminated,

    #[error("cleanup scheduler error: {0}")]
    Scheduler(#[from] cleanup::SchedulerError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FaultError {
    /// The process-wide panic hook can only be installed once.
    #[error("fault hooks already installed for this process")]
    AlreadyInstalled,
}
