use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use cleanup::{CleanupPriority, CleanupScheduler, CleanupTask};
use common_database::PoolMonitor;
use health::HealthStatus;
use lifecycle::{
    Coordinator, CoordinatorBuilder, HandlerOutcome, HostSignal, LifecycleError, LifecycleEvent,
    LifecyclePhase, Registration,
};
use tokio::sync::broadcast;
use tokio::time::Instant;

fn builder(name: &str) -> CoordinatorBuilder {
    Coordinator::builder(name)
        .with_trap_signals(false)
        .with_panic_hook(false)
}

fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn register_recording(
    coordinator: &Coordinator,
    name: &'static str,
    work: Duration,
    order: Arc<Mutex<Vec<&'static str>>>,
) -> Registration {
    coordinator
        .register_shutdown_handler(name, move || async move {
            tokio::time::sleep(work).await;
            order.lock().unwrap().push(name);
            anyhow::Ok(())
        })
        .await
}

async fn explode() -> anyhow::Result<()> {
    panic!("handler bug")
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let coordinator = builder("idempotent").build();
    let mut events = coordinator.subscribe();

    coordinator.initialize().await.unwrap();
    coordinator.initialize().await.unwrap();

    assert_eq!(coordinator.phase(), LifecyclePhase::Running);
    assert_eq!(coordinator.wired_signal_count(), 4);
    assert_eq!(
        drain(&mut events),
        vec![
            LifecycleEvent::PhaseChanged {
                from: LifecyclePhase::Uninitialized,
                to: LifecyclePhase::Initializing
            },
            LifecycleEvent::PhaseChanged {
                from: LifecyclePhase::Initializing,
                to: LifecyclePhase::Running
            },
            LifecycleEvent::InitializeRepeated,
        ]
    );
}

#[tokio::test]
async fn failed_startup_terminates() {
    let coordinator = builder("failed-startup").build();

    let err = coordinator
        .initialize_with(|_| async { Err::<(), _>(anyhow::anyhow!("schema missing")) })
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::InitializationFailed(ref m) if m.contains("schema missing")));
    assert_eq!(coordinator.phase(), LifecyclePhase::Terminated);
    assert!(coordinator.is_shutting_down());
    assert!(matches!(
        coordinator.initialize().await,
        Err(LifecycleError::Terminated)
    ));
}

#[tokio::test]
async fn signal_failure_during_startup_fails_initialization() {
    let coordinator = builder("model-corrupt").build();
    coordinator.on_signal(HostSignal::ModelReady, |_| Err(anyhow::anyhow!("model corrupt")));

    let err = coordinator
        .initialize_with(|c| async move {
            c.notify(HostSignal::ModelReady)?;
            anyhow::Ok(())
        })
        .await
        .unwrap_err();

    match err {
        LifecycleError::InitializationFailed(reason) => {
            assert!(reason.contains("model-ready"), "{reason}");
            assert!(reason.contains("model corrupt"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(coordinator.phase(), LifecyclePhase::Terminated);
}

#[tokio::test]
async fn signal_failure_while_running_is_reported_not_fatal() {
    let coordinator = builder("transport-flaky").build();
    coordinator.on_signal(HostSignal::TransportReady, |_| Err(anyhow::anyhow!("tls config unreadable")));
    coordinator.initialize().await.unwrap();
    let mut events = coordinator.subscribe();

    coordinator.notify(HostSignal::TransportReady).unwrap();

    assert_eq!(coordinator.phase(), LifecyclePhase::Running);
    assert_eq!(
        drain(&mut events),
        vec![LifecycleEvent::SignalFailed {
            signal: HostSignal::TransportReady,
            reason: "tls config unreadable".to_string()
        }]
    );
}

#[tokio::test]
async fn listeners_are_counted_and_once_signals_fire_once() {
    let coordinator = builder("listeners").build();
    let model_ready = Arc::new(AtomicUsize::new(0));
    let calls = model_ready.clone();
    coordinator.on_signal(HostSignal::ModelReady, move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    // Not wired yet, ignored
    coordinator.notify(HostSignal::ModelReady).unwrap();
    coordinator.initialize().await.unwrap();
    let mut events = coordinator.subscribe();

    coordinator.notify(HostSignal::ModelReady).unwrap();
    coordinator.notify(HostSignal::ModelReady).unwrap();
    coordinator.notify(HostSignal::AcceptingConnections).unwrap();
    coordinator.notify(HostSignal::AcceptingConnections).unwrap();
    coordinator.notify(HostSignal::HandlersRegistered).unwrap();

    assert_eq!(model_ready.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.listeners(), 2);
    assert_eq!(
        drain(&mut events),
        vec![
            LifecycleEvent::ServerReady { listeners: 1 },
            LifecycleEvent::ServerReady { listeners: 2 },
            LifecycleEvent::HooksRegistered,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn handlers_run_in_registration_order() {
    let coordinator = builder("ordered").build();
    coordinator.initialize().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    assert_eq!(
        register_recording(&coordinator, "a", Duration::from_millis(200), order.clone()).await,
        Registration::Queued { position: 1 }
    );
    register_recording(&coordinator, "b", Duration::ZERO, order.clone()).await;
    register_recording(&coordinator, "c", Duration::from_millis(10), order.clone()).await;

    let report = coordinator.shutdown(Duration::from_secs(5)).await;

    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(report.completed, vec!["a", "b", "c"]);
    assert!(report.clean);
    assert_eq!(coordinator.phase(), LifecyclePhase::Terminated);
}

#[tokio::test(start_paused = true)]
async fn slow_handler_times_out_and_the_next_still_runs() {
    let coordinator = builder("per-handler-timeout")
        .with_handler_timeout(Duration::from_secs(1))
        .build();
    coordinator.initialize().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    register_recording(&coordinator, "hangs", Duration::from_secs(10), order.clone()).await;
    register_recording(&coordinator, "quick", Duration::ZERO, order.clone()).await;

    let started = Instant::now();
    let report = coordinator.shutdown(Duration::from_secs(30)).await;

    assert_eq!(report.timed_out, vec!["hangs"]);
    assert_eq!(report.completed, vec!["quick"]);
    assert!(!report.clean);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn aggregate_timeout_abandons_remaining_handlers() {
    let coordinator = builder("aggregate-timeout")
        .with_handler_timeout(Duration::from_secs(10))
        .build();
    coordinator.initialize().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    register_recording(&coordinator, "a", Duration::from_secs(2), order.clone()).await;
    register_recording(&coordinator, "b", Duration::from_secs(5), order.clone()).await;
    register_recording(&coordinator, "c", Duration::ZERO, order.clone()).await;

    let started = Instant::now();
    let report = coordinator.shutdown(Duration::from_secs(3)).await;

    assert_eq!(report.completed, vec!["a"]);
    assert_eq!(report.timed_out, vec!["b"]);
    assert_eq!(report.abandoned, vec!["c"]);
    assert_eq!(*order.lock().unwrap(), vec!["a"]);
    assert!(started.elapsed() <= Duration::from_secs(3));
    assert_eq!(coordinator.phase(), LifecyclePhase::Terminated);
}

#[tokio::test]
async fn failing_and_panicking_handlers_do_not_stop_the_sequence() {
    let coordinator = builder("failing-handlers").build();
    coordinator.initialize().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    coordinator
        .register_shutdown_handler("flush-queue", || async {
            Err::<(), _>(anyhow::anyhow!("broker unreachable"))
        })
        .await;
    coordinator
        .register_shutdown_handler("explodes", explode)
        .await;
    register_recording(&coordinator, "close-db-pool", Duration::ZERO, order.clone()).await;

    let report = coordinator.shutdown(Duration::from_secs(5)).await;

    assert_eq!(
        report.failed,
        vec![
            ("flush-queue".to_string(), "broker unreachable".to_string()),
            ("explodes".to_string(), "handler panicked".to_string()),
        ]
    );
    assert_eq!(report.completed, vec!["close-db-pool"]);
    assert!(!report.clean);
}

#[tokio::test]
async fn handler_registered_during_shutdown_runs_immediately() {
    let coordinator = builder("late-registration").build();
    coordinator.initialize().await.unwrap();
    coordinator.shutdown(Duration::from_secs(5)).await;

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let registration = coordinator
        .register_shutdown_handler("late", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        })
        .await;

    assert_eq!(
        registration,
        Registration::RanImmediately(HandlerOutcome::Completed)
    );
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_shutdowns_run_the_sequence_once() {
    let coordinator = builder("double-shutdown").build();
    coordinator.initialize().await.unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    coordinator
        .register_shutdown_handler("drain", move || async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        })
        .await;

    let (first, second) = tokio::join!(
        coordinator.shutdown(Duration::from_secs(5)),
        coordinator.shutdown(Duration::from_secs(5))
    );

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(first.completed, vec!["drain"]);
    assert_eq!(coordinator.last_shutdown_report(), Some(first));
}

#[tokio::test(start_paused = true)]
async fn dropped_shutdown_caller_does_not_strand_the_sequence() {
    let coordinator = builder("dropped-caller").build();
    coordinator.initialize().await.unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    coordinator
        .register_shutdown_handler("slow-flush", move || async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        })
        .await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        coordinator.shutdown(Duration::from_secs(5)),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(coordinator.phase(), LifecyclePhase::ShuttingDown);

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        coordinator.shutdown(Duration::from_secs(5)),
    )
    .await
    .expect("second caller should get the report");

    assert_eq!(report.completed, vec!["slow-flush"]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.phase(), LifecyclePhase::Terminated);
}

#[tokio::test]
async fn readiness_and_shutdown_signal_follow_shutdown() {
    let coordinator = builder("readiness").build();
    coordinator.initialize().await.unwrap();
    let readiness = coordinator.readiness_handler();
    let signal = tokio::spawn(coordinator.shutdown_signal());
    let terminated = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.wait_terminated().await }
    });

    assert_eq!(readiness.check().await, StatusCode::OK);
    assert!(!signal.is_finished());

    coordinator.shutdown(Duration::from_secs(5)).await;

    assert_eq!(readiness.check().await, StatusCode::SERVICE_UNAVAILABLE);
    tokio::time::timeout(Duration::from_secs(1), signal)
        .await
        .expect("shutdown signal should resolve")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), terminated)
        .await
        .expect("wait_terminated should resolve")
        .unwrap();
}

#[tokio::test]
async fn initialize_after_shutdown_is_refused() {
    let coordinator = builder("after-shutdown").build();
    coordinator.shutdown(Duration::from_secs(1)).await;

    assert!(matches!(
        coordinator.initialize().await,
        Err(LifecycleError::Terminated)
    ));
    assert_eq!(coordinator.phase(), LifecyclePhase::Terminated);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_cleanup_scheduler() {
    let scheduler = CleanupScheduler::default();
    scheduler
        .register_task(CleanupTask::new(
            "stuck-vacuum",
            CleanupPriority::Normal,
            Duration::from_secs(1),
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::Ok(0u64)
            },
        ))
        .unwrap();
    let coordinator = builder("cleanup-on-shutdown")
        .with_scheduler(scheduler.clone())
        .with_cleanup_grace(Duration::from_secs(1))
        .build();
    coordinator.initialize().await.unwrap();
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let report = coordinator.shutdown(Duration::from_secs(10)).await;

    assert_eq!(report.abandoned_cleanup_tasks, vec!["stuck-vacuum"]);
    assert!(!report.clean);
    assert!(scheduler.is_stopped());
}

#[tokio::test]
async fn health_combines_component_verdicts() {
    let monitor = Arc::new(PoolMonitor::default());
    let coordinator = builder("health")
        .with_pool_monitor(monitor.clone())
        .build();
    coordinator.initialize().await.unwrap();

    let health = coordinator.health_check();
    assert!(health.healthy);
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.phase, LifecyclePhase::Running);
    assert_eq!(health.details.termination_guarantee, "best-effort");
    assert_eq!(health.details.wired_signals, 4);

    for _ in 0..3 {
        monitor.on_fail("connection refused");
    }

    let health = coordinator.health_check();
    assert!(!health.healthy);
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.components.resource_pool.status, HealthStatus::Unhealthy);
    assert_eq!(health.components.performance.status, HealthStatus::Healthy);

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["phase"], "running");
    assert_eq!(json["components"]["resourcePool"]["status"], "unhealthy");
    assert_eq!(json["details"]["terminationGuarantee"], "best-effort");
}
