use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use time::OffsetDateTime;

mod exposition;
mod histogram;
mod middleware;
mod recorder;
mod ring;

pub use exposition::{METRIC_INTERNAL_ERRORS, METRIC_UPTIME};
pub use histogram::{BucketCount, Histogram, HistogramSnapshot, DURATION_BUCKETS_MS};
pub use middleware::track_metrics;
pub use recorder::{
    DbQueryTimer, Labels, MetricKind, MetricSample, MetricsRecorder, MetricsSnapshot,
    RecorderOptions,
};
pub use ring::RingBuffer;

/// Installs the global `metrics` facade recorder. Counters, gauges and timing
/// guards emitted through the facade end up in the returned handle's render,
/// which `/metrics` appends after the recorder's own exposition.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Full `/metrics` body: the in-process recorder first, then whatever the
/// facade recorder has collected, if one is installed.
pub fn render_exposition(recorder: &MetricsRecorder, prometheus: Option<&PrometheusHandle>) -> String {
    let mut body = recorder.export_text();
    if let Some(handle) = prometheus {
        body.push_str(&handle.render());
    }
    body
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

// A guard to record the time between creation and drop as a histogram entry, in ms
pub struct TimingGuard<'a> {
    name: &'static str,
    labels: &'a [(String, String)],
    start: Instant,
}

pub fn timing_guard<'a>(name: &'static str, labels: &'a [(String, String)]) -> TimingGuard<'a> {
    TimingGuard {
        name,
        labels,
        start: Instant::now(),
    }
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        metrics::histogram!(self.name, self.labels)
            .record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
