pub const METRIC_PHASE: &str = "lifecycle_phase";
pub const METRIC_SHUTDOWN_INITIATED: &str = "lifecycle_shutdown_initiated_total";
pub const METRIC_SHUTDOWN_COMPLETED: &str = "lifecycle_shutdown_completed_total";
pub const METRIC_HANDLER_DURATION: &str = "lifecycle_shutdown_handler_duration_seconds";
pub const METRIC_HANDLER_RESULT: &str = "lifecycle_shutdown_handler_result_total";
pub const METRIC_FAULTS: &str = "lifecycle_faults_total";
pub const METRIC_SIGNAL_FAILURES: &str = "lifecycle_host_signal_failures_total";

pub(crate) fn emit_phase(service_name: &str, phase: crate::LifecyclePhase) {
    metrics::gauge!(METRIC_PHASE, "service_name" => service_name.to_string()).set(phase.as_gauge());
}

pub(crate) fn emit_shutdown_initiated(service_name: &str, trigger_reason: &str) {
    metrics::counter!(
        METRIC_SHUTDOWN_INITIATED,
        "service_name" => service_name.to_string(),
        "trigger_reason" => trigger_reason.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_shutdown_completed(service_name: &str, clean: bool) {
    metrics::counter!(
        METRIC_SHUTDOWN_COMPLETED,
        "service_name" => service_name.to_string(),
        "clean" => clean.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_handler_result(
    service_name: &str,
    handler: &str,
    result: &str,
    duration_secs: f64,
) {
    metrics::histogram!(
        METRIC_HANDLER_DURATION,
        "service_name" => service_name.to_string(),
        "handler" => handler.to_string(),
        "result" => result.to_string()
    )
    .record(duration_secs);
    metrics::counter!(
        METRIC_HANDLER_RESULT,
        "service_name" => service_name.to_string(),
        "handler" => handler.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_fault(kind: &str) {
    metrics::counter!(METRIC_FAULTS, "kind" => kind.to_string()).increment(1);
}

pub(crate) fn emit_signal_failure(signal: &str) {
    metrics::counter!(METRIC_SIGNAL_FAILURES, "signal" => signal.to_string()).increment(1);
}
