//! Fault supervision: counts faults nobody else handled and turns a threshold
//! breach, or a termination signal, into exactly one shutdown request.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::future::Future;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::FaultError;
use crate::metrics;
use crate::signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// A panic that no caller catches.
    UncaughtFault,
    /// A detached task that returned an error nobody was waiting for.
    UnhandledRejection,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::UncaughtFault => "uncaught_fault",
            FaultKind::UnhandledRejection => "unhandled_rejection",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultCounters {
    pub uncaught_faults: u64,
    pub unhandled_rejections: u64,
}

/// A counter reaching its maximum requests shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultThresholds {
    pub max_uncaught: u64,
    pub max_unhandled_rejections: u64,
}

impl Default for FaultThresholds {
    fn default() -> Self {
        Self {
            max_uncaught: 5,
            max_unhandled_rejections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// OS termination signal, by name.
    Signal(&'static str),
    FaultThreshold { kind: FaultKind, count: u64 },
    Requested(String),
}

impl ShutdownReason {
    pub fn kind(&self) -> &'static str {
        match self {
            ShutdownReason::Signal(_) => "signal",
            ShutdownReason::FaultThreshold { .. } => "fault_threshold",
            ShutdownReason::Requested(_) => "requested",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {name}"),
            ShutdownReason::FaultThreshold { kind, count } => {
                write!(f, "{count} {} faults", kind.as_str())
            }
            ShutdownReason::Requested(why) => f.write_str(why),
        }
    }
}

/// Whatever the supervisor asks to shut down. Implemented by the coordinator;
/// tests substitute a counting mock.
pub trait ShutdownTrigger: Send + Sync {
    fn trigger_shutdown(&self, reason: ShutdownReason);
}

struct SupervisorInner {
    thresholds: FaultThresholds,
    uncaught: AtomicU64,
    rejections: AtomicU64,
    escalated: AtomicBool,
    trigger: Arc<dyn ShutdownTrigger>,
}

/// Cheap to clone; clones share counters and the escalation guard.
#[derive(Clone)]
pub struct FaultSupervisor {
    inner: Arc<SupervisorInner>,
}

impl FaultSupervisor {
    pub fn new(thresholds: FaultThresholds, trigger: Arc<dyn ShutdownTrigger>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                thresholds,
                uncaught: AtomicU64::new(0),
                rejections: AtomicU64::new(0),
                escalated: AtomicBool::new(false),
                trigger,
            }),
        }
    }

    pub fn report_uncaught(&self, message: &str, location: Option<&str>, backtrace: Option<&str>) {
        let count = self.inner.uncaught.fetch_add(1, Ordering::SeqCst) + 1;
        let max = self.inner.thresholds.max_uncaught;
        metrics::emit_fault(FaultKind::UncaughtFault.as_str());
        error!(
            fault.kind = FaultKind::UncaughtFault.as_str(),
            count,
            max,
            location = location.unwrap_or("unknown"),
            backtrace = backtrace.unwrap_or("unavailable"),
            "Faults: uncaught fault: {message}"
        );
        if count >= max {
            self.escalate(ShutdownReason::FaultThreshold {
                kind: FaultKind::UncaughtFault,
                count,
            });
        }
    }

    pub fn report_unhandled_rejection(&self, message: &str) {
        let count = self.inner.rejections.fetch_add(1, Ordering::SeqCst) + 1;
        let max = self.inner.thresholds.max_unhandled_rejections;
        metrics::emit_fault(FaultKind::UnhandledRejection.as_str());
        error!(
            fault.kind = FaultKind::UnhandledRejection.as_str(),
            count,
            max,
            "Faults: unhandled rejection: {message}"
        );
        if count >= max {
            self.escalate(ShutdownReason::FaultThreshold {
                kind: FaultKind::UnhandledRejection,
                count,
            });
        }
    }

    /// Requests shutdown unless a signal or threshold already did. Returns whether
    /// this call was the one that fired.
    pub fn escalate(&self, reason: ShutdownReason) -> bool {
        if self.inner.escalated.swap(true, Ordering::SeqCst) {
            info!(reason = %reason, "Faults: shutdown already requested, ignoring");
            return false;
        }
        warn!(reason = %reason, trigger_reason = reason.kind(), "Faults: requesting shutdown");
        self.inner.trigger.trigger_shutdown(reason);
        true
    }

    pub fn counters(&self) -> FaultCounters {
        FaultCounters {
            uncaught_faults: self.inner.uncaught.load(Ordering::SeqCst),
            unhandled_rejections: self.inner.rejections.load(Ordering::SeqCst),
        }
    }

    pub fn thresholds(&self) -> FaultThresholds {
        self.inner.thresholds
    }

    pub fn has_escalated(&self) -> bool {
        self.inner.escalated.load(Ordering::SeqCst)
    }

    /// Operator reset of both counters. An escalation that already fired stays fired.
    pub fn reset(&self) {
        self.inner.uncaught.store(0, Ordering::SeqCst);
        self.inner.rejections.store(0, Ordering::SeqCst);
        info!("Faults: counters reset");
    }

    /// Spawns a task whose result nobody awaits. An `Err` is counted as an
    /// unhandled rejection.
    pub fn spawn_detached<F>(&self, name: &str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let supervisor = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                supervisor.report_unhandled_rejection(&format!("{name}: {e:#}"));
            }
        })
    }

    /// Spawns a task escalating to shutdown on SIGINT or SIGTERM.
    pub fn trap_signals(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let signal = signals::wait_for_shutdown_signal().await;
            supervisor.escalate(ShutdownReason::Signal(signal));
        })
    }
}

static PANIC_SUPERVISOR: OnceLock<FaultSupervisor> = OnceLock::new();

/// Routes every panic in the process to `supervisor` as an uncaught fault.
/// Panics raised under [`cleanup::catch_panics`] are already handled and are
/// not counted.
///
/// Installed at most once per process; the previously installed hook still
/// runs after the fault is recorded.
pub fn install_panic_hook(supervisor: &FaultSupervisor) -> Result<(), FaultError> {
    PANIC_SUPERVISOR
        .set(supervisor.clone())
        .map_err(|_| FaultError::AlreadyInstalled)?;

    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if cleanup::panic_is_caught() {
            debug!("Faults: panic inside a supervised scope, not counted");
        } else if let Some(supervisor) = PANIC_SUPERVISOR.get() {
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
            let backtrace = Backtrace::capture();
            let backtrace = (backtrace.status() == BacktraceStatus::Captured)
                .then(|| backtrace.to_string());
            supervisor.report_uncaught(
                &payload_message(info.payload()),
                location.as_deref(),
                backtrace.as_deref(),
            );
        }
        previous(info);
    }));
    Ok(())
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingTrigger {
        reasons: Mutex<Vec<ShutdownReason>>,
    }

    impl ShutdownTrigger for RecordingTrigger {
        fn trigger_shutdown(&self, reason: ShutdownReason) {
            self.reasons.lock().unwrap().push(reason);
        }
    }

    #[test]
    fn reason_names_the_threshold() {
        let trigger = Arc::new(RecordingTrigger::default());
        let supervisor = FaultSupervisor::new(
            FaultThresholds {
                max_uncaught: 2,
                max_unhandled_rejections: 5,
            },
            trigger.clone(),
        );

        supervisor.report_uncaught("index out of bounds", Some("src/lib.rs:1:1"), None);
        supervisor.report_uncaught("index out of bounds", None, None);

        let reasons = trigger.reasons.lock().unwrap();
        assert_eq!(
            *reasons,
            vec![ShutdownReason::FaultThreshold {
                kind: FaultKind::UncaughtFault,
                count: 2
            }]
        );
        assert_eq!(reasons[0].to_string(), "2 uncaught_fault faults");
    }

    #[test]
    fn signals_and_thresholds_share_one_guard() {
        let trigger = Arc::new(RecordingTrigger::default());
        let supervisor = FaultSupervisor::new(FaultThresholds::default(), trigger.clone());

        assert!(supervisor.escalate(ShutdownReason::Signal("SIGTERM")));
        for _ in 0..10 {
            supervisor.report_unhandled_rejection("connection reset");
        }
        assert!(!supervisor.escalate(ShutdownReason::Signal("SIGINT")));

        assert_eq!(
            *trigger.reasons.lock().unwrap(),
            vec![ShutdownReason::Signal("SIGTERM")]
        );
        assert_eq!(supervisor.counters().unhandled_rejections, 10);
    }
}
