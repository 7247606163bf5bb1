//! Lifecycle coordinator: phase tracking, host signal wiring, ordered and time-bounded
//! shutdown, and the combined health view of the components it owns.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use cleanup::{catch_panics, CleanupScheduler};
use common_database::PoolMonitor;
use common_metrics::MetricsRecorder;
use futures::future::BoxFuture;
use futures::FutureExt;
use health::{ComponentHealth, HealthStatus};
use serde::Serialize;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::events::{HostSignal, LifecycleEvent};
use crate::faults::{
    self, FaultCounters, FaultSupervisor, FaultThresholds, ShutdownReason, ShutdownTrigger,
};
use crate::metrics;
use crate::phase::{LifecyclePhase, PhaseCell};
use crate::readiness::ReadinessHandler;

/// Only a best effort: a handler that ignores its timeout keeps running after
/// it has been abandoned, nothing preempts it.
pub const TERMINATION_GUARANTEE: &str = "best-effort";

#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub name: String,
    /// Ceiling on the whole shutdown sequence.
    pub shutdown_timeout: Duration,
    /// Ceiling on a single shutdown handler, clamped to what is left of `shutdown_timeout`.
    pub handler_timeout: Duration,
    /// Ceiling on waiting for in-flight cleanup runs once handlers are done.
    pub cleanup_grace: Duration,
    pub fault_thresholds: FaultThresholds,
    /// Install SIGINT/SIGTERM handlers on initialize (default: true).
    pub trap_signals: bool,
    /// Route panics to the fault supervisor on initialize (default: true).
    pub install_panic_hook: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            shutdown_timeout: Duration::from_millis(30_000),
            handler_timeout: Duration::from_millis(10_000),
            cleanup_grace: Duration::from_millis(5_000),
            fault_thresholds: FaultThresholds::default(),
            trap_signals: true,
            install_panic_hook: true,
        }
    }
}

pub struct CoordinatorBuilder {
    options: CoordinatorOptions,
    metrics: Option<Arc<MetricsRecorder>>,
    pool_monitor: Option<Arc<PoolMonitor>>,
    scheduler: Option<CleanupScheduler>,
}

impl CoordinatorBuilder {
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options.shutdown_timeout = timeout;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.options.handler_timeout = timeout;
        self
    }

    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.options.cleanup_grace = grace;
        self
    }

    pub fn with_fault_thresholds(mut self, thresholds: FaultThresholds) -> Self {
        self.options.fault_thresholds = thresholds;
        self
    }

    pub fn with_trap_signals(mut self, trap: bool) -> Self {
        self.options.trap_signals = trap;
        self
    }

    pub fn with_panic_hook(mut self, install: bool) -> Self {
        self.options.install_panic_hook = install;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_pool_monitor(mut self, monitor: Arc<PoolMonitor>) -> Self {
        self.pool_monitor = Some(monitor);
        self
    }

    pub fn with_scheduler(mut self, scheduler: CleanupScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator::new(
            self.options,
            self.metrics.unwrap_or_default(),
            self.pool_monitor.unwrap_or_default(),
            self.scheduler.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

impl HandlerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Completed => "completed",
            HandlerOutcome::Failed(_) => "failed",
            HandlerOutcome::TimedOut => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Will run during shutdown; `position` is 1-based.
    Queued { position: usize },
    /// Shutdown had already started, so the handler ran on the spot.
    RanImmediately(HandlerOutcome),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reason: String,
    pub completed: Vec<String>,
    /// Handler name and error.
    pub failed: Vec<(String, String)>,
    pub timed_out: Vec<String>,
    /// Handlers never started because the aggregate timeout ran out first.
    pub abandoned: Vec<String>,
    pub abandoned_cleanup_tasks: Vec<String>,
    pub elapsed: Duration,
    pub clean: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    pub performance: ComponentHealth,
    pub resource_pool: ComponentHealth,
    pub cleanup: ComponentHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    pub uptime_secs: f64,
    pub faults: FaultCounters,
    pub listeners: u32,
    pub wired_signals: usize,
    pub termination_guarantee: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorHealth {
    /// False iff performance or the resource pool is unhealthy.
    pub healthy: bool,
    pub status: HealthStatus,
    pub phase: LifecyclePhase,
    pub components: HealthComponents,
    pub details: HealthDetails,
}

type SignalHook = Arc<dyn Fn(HostSignal) -> anyhow::Result<()> + Send + Sync>;

struct ShutdownHandler {
    name: String,
    run: Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>,
}

#[derive(Default)]
struct SignalState {
    seen: HashSet<HostSignal>,
    listeners: u32,
}

struct Inner {
    options: CoordinatorOptions,
    phase: PhaseCell,
    started_at: Instant,
    init_started: AtomicBool,
    shutdown_started: AtomicBool,
    shutdown_token: CancellationToken,
    events: broadcast::Sender<LifecycleEvent>,
    runtime: Mutex<Option<RuntimeHandle>>,
    /// `None` once shutdown has taken the list.
    handlers: Mutex<Option<Vec<ShutdownHandler>>>,
    hooks: Mutex<HashMap<HostSignal, Vec<SignalHook>>>,
    signals: Mutex<SignalState>,
    wired_signals: AtomicUsize,
    last_report: Mutex<Option<ShutdownReport>>,
    metrics: Arc<MetricsRecorder>,
    pool_monitor: Arc<PoolMonitor>,
    scheduler: CleanupScheduler,
    faults: FaultSupervisor,
}

/// Owns the process lifecycle. Cheap to clone; clones share state.
///
/// One coordinator exists per process. It owns the metrics recorder, pool
/// monitor, cleanup scheduler and fault supervisor and hands out references to
/// them; nothing else constructs those.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
    pub fn builder(name: &str) -> CoordinatorBuilder {
        CoordinatorBuilder {
            options: CoordinatorOptions {
                name: name.to_string(),
                ..CoordinatorOptions::default()
            },
            metrics: None,
            pool_monitor: None,
            scheduler: None,
        }
    }

    pub fn new(
        options: CoordinatorOptions,
        metrics: Arc<MetricsRecorder>,
        pool_monitor: Arc<PoolMonitor>,
        scheduler: CleanupScheduler,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let thresholds = options.fault_thresholds;

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            options,
            phase: PhaseCell::new(),
            started_at: Instant::now(),
            init_started: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            events,
            runtime: Mutex::new(None),
            handlers: Mutex::new(Some(Vec::new())),
            hooks: Mutex::new(HashMap::new()),
            signals: Mutex::new(SignalState::default()),
            wired_signals: AtomicUsize::new(0),
            last_report: Mutex::new(None),
            metrics,
            pool_monitor,
            scheduler,
            faults: FaultSupervisor::new(thresholds, Arc::new(CoordinatorTrigger(weak.clone()))),
        });

        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.inner.phase.get()
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.inner.metrics
    }

    pub fn pool_monitor(&self) -> &Arc<PoolMonitor> {
        &self.inner.pool_monitor
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.inner.scheduler
    }

    pub fn faults(&self) -> &FaultSupervisor {
        &self.inner.faults
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    pub fn listeners(&self) -> u32 {
        lock(&self.inner.signals).listeners
    }

    /// Number of built-in host signal subscriptions. Stays at four no matter how
    /// often `initialize` is called.
    pub fn wired_signal_count(&self) -> usize {
        self.inner.wired_signals.load(Ordering::SeqCst)
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        self.inner.events.send(event).ok();
    }

    fn set_phase(&self, to: LifecyclePhase) -> bool {
        match self.inner.phase.advance(to) {
            Some(from) => {
                debug!(from = %from, to = %to, "Lifecycle: phase changed");
                metrics::emit_phase(&self.inner.options.name, to);
                self.emit(LifecycleEvent::PhaseChanged { from, to });
                true
            }
            None => false,
        }
    }

    pub async fn initialize(&self) -> Result<(), LifecycleError> {
        self.initialize_with(|_| async { anyhow::Ok(()) }).await
    }

    /// Moves to `Initializing`, wires host signals and fault hooks, runs `startup`,
    /// then moves to `Running` and starts the cleanup scheduler.
    ///
    /// Only the first call does anything; later calls log a warning and emit
    /// [`LifecycleEvent::InitializeRepeated`]. A failing `startup` (including a host
    /// signal handler failing inside it) terminates the lifecycle and is returned.
    pub async fn initialize_with<F, Fut>(&self, startup: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(Coordinator) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let name = self.inner.options.name.clone();

        if self.phase() >= LifecyclePhase::ShuttingDown {
            return Err(LifecycleError::Terminated);
        }
        if self.inner.init_started.swap(true, Ordering::SeqCst) {
            warn!(app = %name, phase = %self.phase(), "Lifecycle: initialize called again, ignoring");
            self.emit(LifecycleEvent::InitializeRepeated);
            return Ok(());
        }

        self.set_phase(LifecyclePhase::Initializing);
        *lock(&self.inner.runtime) = RuntimeHandle::try_current().ok();
        self.wire_host_signals();

        if self.inner.options.trap_signals {
            self.inner.faults.trap_signals();
        }
        if self.inner.options.install_panic_hook {
            if let Err(e) = faults::install_panic_hook(&self.inner.faults) {
                warn!(app = %name, error = %e, "Lifecycle: panic hook not installed");
            }
        }
        info!(app = %name, "Lifecycle: initializing");

        if let Err(e) = startup(self.clone()).await {
            let reason = format!("{e:#}");
            error!(app = %name, "Lifecycle: initialization failed: {reason}");
            self.inner.shutdown_started.store(true, Ordering::SeqCst);
            self.inner.shutdown_token.cancel();
            self.set_phase(LifecyclePhase::Terminated);
            return Err(LifecycleError::InitializationFailed(reason));
        }

        if !self.set_phase(LifecyclePhase::Running) {
            warn!(app = %name, "Lifecycle: shutdown began during startup");
            return Err(LifecycleError::Terminated);
        }
        self.inner.scheduler.start()?;
        info!(app = %name, "Lifecycle: running");
        Ok(())
    }

    fn wire_host_signals(&self) {
        let mut hooks = lock(&self.inner.hooks);
        for signal in HostSignal::ALL {
            let weak = Arc::downgrade(&self.inner);
            let builtin: SignalHook = Arc::new(move |signal| {
                if let Some(inner) = weak.upgrade() {
                    Coordinator { inner }.on_host_signal(signal);
                }
                Ok(())
            });
            hooks.entry(signal).or_default().insert(0, builtin);
            self.inner.wired_signals.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_host_signal(&self, signal: HostSignal) {
        match signal {
            HostSignal::ModelReady => info!("Lifecycle: data model ready"),
            HostSignal::TransportReady => info!("Lifecycle: transport ready"),
            HostSignal::AcceptingConnections => {
                let listeners = self.listeners();
                info!(listeners, "Lifecycle: accepting connections");
                self.emit(LifecycleEvent::ServerReady { listeners });
            }
            HostSignal::HandlersRegistered => {
                info!("Lifecycle: request handlers registered");
                self.emit(LifecycleEvent::HooksRegistered);
            }
        }
    }

    /// Attaches an application hook to a host signal; runs after the built-in one.
    pub fn on_signal<F>(&self, signal: HostSignal, hook: F)
    where
        F: Fn(HostSignal) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.inner.hooks)
            .entry(signal)
            .or_default()
            .push(Arc::new(hook));
    }

    /// Delivers a host signal to its hooks.
    ///
    /// A failing hook is logged and published as [`LifecycleEvent::SignalFailed`];
    /// it is returned only while initializing, so startup fails loudly. Once
    /// running, failures never change the phase.
    pub fn notify(&self, signal: HostSignal) -> Result<(), LifecycleError> {
        let phase = self.phase();
        match phase {
            LifecyclePhase::Uninitialized => {
                warn!(signal = %signal, "Lifecycle: host signal before initialize, ignoring");
                return Ok(());
            }
            LifecyclePhase::ShuttingDown | LifecyclePhase::Terminated => {
                debug!(signal = %signal, phase = %phase, "Lifecycle: host signal during shutdown, ignoring");
                return Ok(());
            }
            LifecyclePhase::Initializing | LifecyclePhase::Running => {}
        }

        {
            let mut state = lock(&self.inner.signals);
            if !state.seen.insert(signal) && signal.fires_once() {
                warn!(signal = %signal, "Lifecycle: host signal already handled, ignoring repeat");
                return Ok(());
            }
            if signal == HostSignal::AcceptingConnections {
                state.listeners += 1;
            }
        }

        let hooks: Vec<SignalHook> = lock(&self.inner.hooks)
            .get(&signal)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            if let Err(e) = hook(signal) {
                let reason = format!("{e:#}");
                let phase = self.phase();
                error!(signal = %signal, phase = %phase, "Lifecycle: host signal handler failed: {reason}");
                metrics::emit_signal_failure(signal.as_str());
                self.emit(LifecycleEvent::SignalFailed {
                    signal,
                    reason: reason.clone(),
                });
                if phase == LifecyclePhase::Initializing {
                    return Err(LifecycleError::SignalFailed { signal, reason });
                }
            }
        }
        Ok(())
    }

    /// Queues a handler to run during shutdown, after every handler registered
    /// before it. Once shutdown has started there is nothing to queue into, so the
    /// handler runs right away, bounded by the per-handler timeout.
    pub async fn register_shutdown_handler<F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
    ) -> Registration
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = ShutdownHandler {
            name: name.into(),
            run: Box::new(move || handler().boxed()),
        };

        let late = {
            let mut handlers = lock(&self.inner.handlers);
            match handlers.as_mut() {
                Some(queue) => {
                    debug!(handler = %handler.name, position = queue.len() + 1, "Lifecycle: shutdown handler registered");
                    queue.push(handler);
                    return Registration::Queued {
                        position: queue.len(),
                    };
                }
                None => handler,
            }
        };

        warn!(handler = %late.name, "Lifecycle: shutdown already started, running handler now");
        let (_, outcome) = run_handler(
            late,
            self.inner.options.handler_timeout,
            &self.inner.options.name,
        )
        .await;
        Registration::RanImmediately(outcome)
    }

    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.shutdown_with_reason(ShutdownReason::Requested("shutdown requested".to_string()), timeout)
            .await
    }

    /// Runs the shutdown sequence once. Concurrent and later callers wait for the
    /// first one to finish and get its report.
    pub async fn shutdown_with_reason(&self, reason: ShutdownReason, timeout: Duration) -> ShutdownReport {
        if self.inner.shutdown_started.swap(true, Ordering::SeqCst) {
            debug!(reason = %reason, "Lifecycle: shutdown already in progress");
            self.wait_terminated().await;
            return self.last_shutdown_report().unwrap_or_default();
        }

        // Runs detached: dropping this caller must not strand the phase at ShuttingDown
        let coordinator = self.clone();
        let sequence = tokio::spawn(async move { coordinator.run_shutdown(reason, timeout).await });
        match sequence.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Lifecycle: shutdown sequence aborted");
                self.set_phase(LifecyclePhase::Terminated);
                self.last_shutdown_report().unwrap_or_default()
            }
        }
    }

    async fn run_shutdown(&self, reason: ShutdownReason, timeout: Duration) -> ShutdownReport {
        let name = self.inner.options.name.clone();
        let started = Instant::now();
        let deadline = started + timeout;

        metrics::emit_shutdown_initiated(&name, reason.kind());
        info!(
            trigger_reason = reason.kind(),
            reason = %reason,
            timeout_secs = timeout.as_secs_f64(),
            "Lifecycle: shutdown initiated"
        );
        self.emit(LifecycleEvent::ShutdownRequested {
            reason: reason.to_string(),
        });
        self.set_phase(LifecyclePhase::ShuttingDown);
        self.inner.shutdown_token.cancel();

        let handlers = lock(&self.inner.handlers).take().unwrap_or_default();
        let mut report = ShutdownReport {
            reason: reason.to_string(),
            ..ShutdownReport::default()
        };

        for handler in handlers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(handler = %handler.name, "Lifecycle: shutdown timeout reached, handler abandoned");
                metrics::emit_handler_result(&name, &handler.name, "abandoned", 0.0);
                report.abandoned.push(handler.name);
                continue;
            }

            let budget = self.inner.options.handler_timeout.min(remaining);
            let (handler_name, outcome) = run_handler(handler, budget, &name).await;
            match outcome {
                HandlerOutcome::Completed => report.completed.push(handler_name),
                HandlerOutcome::Failed(e) => report.failed.push((handler_name, e)),
                HandlerOutcome::TimedOut => report.timed_out.push(handler_name),
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let stop = self
            .inner
            .scheduler
            .stop(self.inner.options.cleanup_grace.min(remaining))
            .await;
        report.abandoned_cleanup_tasks = stop.abandoned;

        report.elapsed = started.elapsed();
        report.clean = report.failed.is_empty()
            && report.timed_out.is_empty()
            && report.abandoned.is_empty()
            && report.abandoned_cleanup_tasks.is_empty();

        metrics::emit_shutdown_completed(&name, report.clean);
        if report.clean {
            info!(
                clean = true,
                total_duration_secs = report.elapsed.as_secs_f64(),
                "Lifecycle: shutdown complete"
            );
        } else {
            warn!(
                clean = false,
                total_duration_secs = report.elapsed.as_secs_f64(),
                failed = ?report.failed,
                timed_out = ?report.timed_out,
                abandoned = ?report.abandoned,
                abandoned_cleanup_tasks = ?report.abandoned_cleanup_tasks,
                "Lifecycle: shutdown complete with failures"
            );
        }

        *lock(&self.inner.last_report) = Some(report.clone());
        self.emit(LifecycleEvent::ShutdownCompleted {
            clean: report.clean,
            elapsed: report.elapsed,
        });
        self.set_phase(LifecyclePhase::Terminated);
        report
    }

    pub fn last_shutdown_report(&self) -> Option<ShutdownReport> {
        lock(&self.inner.last_report).clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    /// Future that resolves when shutdown begins; pass to `axum::serve(..., with_graceful_shutdown(shutdown_signal()))`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.inner.shutdown_token.clone();
        async move {
            token.cancelled().await;
        }
    }

    /// Resolves once the phase reaches `Terminated`.
    pub async fn wait_terminated(&self) {
        let mut rx = self.inner.phase.subscribe();
        while *rx.borrow_and_update() != LifecyclePhase::Terminated {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Axum-compatible handler for `/_readiness`; returns 200 if running, 503 if shutdown has begun.
    pub fn readiness_handler(&self) -> ReadinessHandler {
        ReadinessHandler::new(self.inner.shutdown_token.clone())
    }

    /// Combined verdict of the owned components. Never blocks on I/O.
    pub fn health_check(&self) -> CoordinatorHealth {
        let performance = self.inner.metrics.health();
        let resource_pool = self.inner.pool_monitor.get_health();
        let cleanup = self.inner.scheduler.health();

        let healthy = !performance.is_unhealthy() && !resource_pool.is_unhealthy();
        let status = performance
            .status
            .worst(resource_pool.status)
            .worst(cleanup.status);

        CoordinatorHealth {
            healthy,
            status,
            phase: self.phase(),
            components: HealthComponents {
                performance,
                resource_pool,
                cleanup,
            },
            details: HealthDetails {
                uptime_secs: self.uptime().as_secs_f64(),
                faults: self.inner.faults.counters(),
                listeners: self.listeners(),
                wired_signals: self.wired_signal_count(),
                termination_guarantee: TERMINATION_GUARANTEE,
            },
        }
    }
}

async fn run_handler(
    handler: ShutdownHandler,
    budget: Duration,
    service_name: &str,
) -> (String, HandlerOutcome) {
    let start = Instant::now();
    let run = catch_panics((handler.run)());

    let outcome = match tokio::time::timeout(budget, run).await {
        Ok(Ok(Ok(()))) => HandlerOutcome::Completed,
        Ok(Ok(Err(e))) => HandlerOutcome::Failed(format!("{e:#}")),
        Ok(Err(_)) => HandlerOutcome::Failed("handler panicked".to_string()),
        Err(_) => HandlerOutcome::TimedOut,
    };

    let elapsed = start.elapsed();
    metrics::emit_handler_result(service_name, &handler.name, outcome.as_str(), elapsed.as_secs_f64());
    match &outcome {
        HandlerOutcome::Completed => info!(
            handler = %handler.name,
            duration_secs = elapsed.as_secs_f64(),
            result = "completed",
            "Lifecycle: shutdown handler completed"
        ),
        HandlerOutcome::Failed(e) => error!(
            handler = %handler.name,
            duration_secs = elapsed.as_secs_f64(),
            result = "failed",
            "Lifecycle: shutdown handler failed: {e}"
        ),
        HandlerOutcome::TimedOut => warn!(
            handler = %handler.name,
            budget_secs = budget.as_secs_f64(),
            result = "timeout",
            "Lifecycle: shutdown handler timed out, abandoning it"
        ),
    }

    (handler.name, outcome)
}

/// Lets the fault supervisor start a shutdown without owning the coordinator.
struct CoordinatorTrigger(Weak<Inner>);

impl ShutdownTrigger for CoordinatorTrigger {
    fn trigger_shutdown(&self, reason: ShutdownReason) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        let coordinator = Coordinator { inner };
        let timeout = coordinator.inner.options.shutdown_timeout;

        // Panics can be reported from threads outside the runtime
        let runtime = RuntimeHandle::try_current()
            .ok()
            .or_else(|| lock(&coordinator.inner.runtime).clone());
        match runtime {
            Some(runtime) => {
                runtime.spawn(async move {
                    coordinator.shutdown_with_reason(reason, timeout).await;
                });
            }
            None => {
                error!(reason = %reason, "Lifecycle: no runtime to run shutdown on, only cancelling");
                coordinator.inner.shutdown_token.cancel();
            }
        }
    }
}
