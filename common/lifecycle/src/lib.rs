//! Process lifecycle coordination for shiftlog services.
//!
//! A single [`Coordinator`] per process owns the metrics recorder, the connection
//! pool monitor, the cleanup scheduler and the fault supervisor. It moves through
//! [`LifecyclePhase`]s in one direction only, reacts to [`HostSignal`]s raised by
//! the application while it boots, and runs registered shutdown handlers in
//! order under a per-handler and an aggregate timeout.
//!
//! ```ignore
//! let coordinator = Coordinator::builder("shiftlog")
//!     .with_shutdown_timeout(Duration::from_secs(30))
//!     .build();
//!
//! coordinator
//!     .initialize_with(|c| async move {
//!         c.notify(HostSignal::ModelReady)?;
//!         Ok(())
//!     })
//!     .await?;
//!
//! coordinator
//!     .register_shutdown_handler("close-db-pool", move || async move {
//!         pool.close().await;
//!         Ok(())
//!     })
//!     .await;
//!
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(coordinator.shutdown_signal())
//!     .await?;
//! coordinator.wait_terminated().await;
//! ```

mod coordinator;
mod error;
mod events;
mod faults;
mod metrics;
mod phase;
mod readiness;
mod signals;

pub use coordinator::{
    Coordinator, CoordinatorBuilder, CoordinatorHealth, CoordinatorOptions, HandlerOutcome,
    HealthComponents, HealthDetails, Registration, ShutdownReport, TERMINATION_GUARANTEE,
};
pub use error::{FaultError, LifecycleError};
pub use events::{HostSignal, LifecycleEvent};
pub use faults::{
    install_panic_hook, FaultCounters, FaultKind, FaultSupervisor, FaultThresholds,
    ShutdownReason, ShutdownTrigger,
};
pub use metrics::{
    METRIC_FAULTS, METRIC_HANDLER_DURATION, METRIC_HANDLER_RESULT, METRIC_PHASE,
    METRIC_SHUTDOWN_COMPLETED, METRIC_SHUTDOWN_INITIATED, METRIC_SIGNAL_FAILURES,
};
pub use phase::LifecyclePhase;
pub use readiness::ReadinessHandler;
