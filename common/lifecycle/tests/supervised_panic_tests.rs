use std::time::Duration;

use cleanup::{CleanupPriority, CleanupTask};
use lifecycle::{Coordinator, FaultThresholds, LifecyclePhase};

async fn corrupt_cache() -> anyhow::Result<u64> {
    panic!("cache index corrupted")
}

async fn explode() -> anyhow::Result<()> {
    panic!("flush buffer poisoned")
}

// Installs the process-wide panic hook, so it is the only test in this binary
#[tokio::test]
async fn caught_panics_do_not_count_as_faults() {
    let coordinator = Coordinator::builder("supervised-panics")
        .with_trap_signals(false)
        .with_fault_thresholds(FaultThresholds {
            max_uncaught: 2,
            max_unhandled_rejections: 5,
        })
        .build();
    coordinator
        .scheduler()
        .register_task(CleanupTask::new(
            "evict-cache",
            CleanupPriority::Normal,
            Duration::from_secs(3600),
            corrupt_cache,
        ))
        .unwrap();
    coordinator.initialize().await.unwrap();

    for _ in 0..3 {
        let result = coordinator.scheduler().run_now("evict-cache").await.unwrap();
        assert_eq!(result.error.as_deref(), Some("panicked: cache index corrupted"));
    }
    assert_eq!(coordinator.faults().counters().uncaught_faults, 0);
    assert!(!coordinator.faults().has_escalated());
    assert_eq!(coordinator.phase(), LifecyclePhase::Running);

    // The hook is live: a panic nobody catches is still counted
    let worker = std::thread::spawn(|| panic!("worker lost its lease"));
    assert!(worker.join().is_err());
    assert_eq!(coordinator.faults().counters().uncaught_faults, 1);

    coordinator.register_shutdown_handler("explodes", explode).await;
    let report = coordinator.shutdown(Duration::from_secs(5)).await;

    assert_eq!(
        report.failed,
        vec![("explodes".to_string(), "handler panicked".to_string())]
    );
    assert_eq!(coordinator.faults().counters().uncaught_faults, 1);
    assert!(!coordinator.faults().has_escalated());
}
