use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use health::ComponentHealth;
use serde::Serialize;
use tracing::{debug, warn};

use crate::histogram::{Histogram, HistogramSnapshot};
use crate::ring::RingBuffer;
use crate::{exposition, now_ms};

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HttpRequest,
    DbQuery,
    Business,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::HttpRequest => "http_request",
            MetricKind::DbQuery => "db_query",
            MetricKind::Business => "business",
        }
    }
}

/// One instrumented observation. Kept only in the bounded recent-samples log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub kind: MetricKind,
    pub duration_ms: f64,
    pub labels: Labels,
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug)]
pub struct RecorderOptions {
    /// Size of the recent-samples diagnostic log.
    pub recent_capacity: usize,
    /// Distinct label sets kept before new ones are only folded into the per-kind totals.
    pub max_series: usize,
    pub slow_request_ms: f64,
    pub slow_query_ms: f64,
    /// 5xx share of all requests above which performance is degraded.
    pub degraded_error_rate: f64,
    /// 5xx share of all requests above which performance is unhealthy.
    pub unhealthy_error_rate: f64,
    pub degraded_p95_ms: f64,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            recent_capacity: 1000,
            max_series: 10_000,
            slow_request_ms: 1000.0,
            slow_query_ms: 500.0,
            degraded_error_rate: 0.05,
            unhealthy_error_rate: 0.20,
            degraded_p95_ms: 2500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SeriesKey {
    pub kind: MetricKind,
    pub name: String,
    pub labels: Labels,
}

#[derive(Debug, Clone)]
pub(crate) struct Series {
    pub histogram: Histogram,
    pub last_updated: Instant,
}

#[derive(Default)]
struct KindTotals {
    http: Histogram,
    db: Histogram,
    business: Histogram,
}

impl KindTotals {
    fn get_mut(&mut self, kind: MetricKind) -> &mut Histogram {
        match kind {
            MetricKind::HttpRequest => &mut self.http,
            MetricKind::DbQuery => &mut self.db,
            MetricKind::Business => &mut self.business,
        }
    }
}

struct RecorderState {
    totals: KindTotals,
    status_classes: [u64; 5],
    db_failures: u64,
    slow_requests: u64,
    slow_queries: u64,
    dropped_series: u64,
    series: BTreeMap<SeriesKey, Series>,
    recent: RingBuffer<MetricSample>,
}

/// Aggregate view of everything recorded since the process started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub started_at_ms: i64,
    pub uptime_secs: f64,
    pub http: HistogramSnapshot,
    pub db: HistogramSnapshot,
    pub business: HistogramSnapshot,
    /// Responses per status class ("1xx" through "5xx").
    pub http_status_classes: BTreeMap<String, u64>,
    pub http_server_errors: u64,
    pub db_failures: u64,
    pub slow_requests: u64,
    pub slow_queries: u64,
    pub series_count: usize,
    pub dropped_series: u64,
    /// Recorder faults swallowed so far.
    pub internal_errors: u64,
}

impl MetricsSnapshot {
    pub fn http_error_rate(&self) -> f64 {
        if self.http.count == 0 {
            0.0
        } else {
            self.http_server_errors as f64 / self.http.count as f64
        }
    }
}

/// Process-wide accumulator for request, query and business metrics.
///
/// Every `record_*` call is non-blocking in the sense that matters here: it
/// takes a short, uncontended lock, never awaits and never returns an error.
/// Anything that goes wrong inside the recorder (a poisoned lock, a NaN
/// duration) is swallowed and counted in `internal_errors`, so instrumentation
/// can never take a request path down with it.
pub struct MetricsRecorder {
    options: RecorderOptions,
    started_at: Instant,
    started_at_ms: i64,
    internal_errors: AtomicU64,
    state: Mutex<RecorderState>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(RecorderOptions::default())
    }
}

impl MetricsRecorder {
    pub fn new(options: RecorderOptions) -> Self {
        let state = RecorderState {
            totals: KindTotals::default(),
            status_classes: [0; 5],
            db_failures: 0,
            slow_requests: 0,
            slow_queries: 0,
            dropped_series: 0,
            series: BTreeMap::new(),
            recent: RingBuffer::new(options.recent_capacity),
        };
        Self {
            options,
            started_at: Instant::now(),
            started_at_ms: now_ms(),
            internal_errors: AtomicU64::new(0),
            state: Mutex::new(state),
        }
    }

    pub fn record_http_request(&self, duration_ms: f64, status_code: u16, method: &str, route: &str) {
        let labels = Labels::from([
            ("method".to_string(), method.to_string()),
            ("route".to_string(), route.to_string()),
            ("status".to_string(), status_code.to_string()),
        ]);
        let slow_request_ms = self.options.slow_request_ms;

        self.record(MetricKind::HttpRequest, "http_request", duration_ms, labels, |state, duration_ms| {
            let class = (status_code / 100).clamp(1, 5) as usize - 1;
            state.status_classes[class] += 1;
            if duration_ms > slow_request_ms {
                state.slow_requests += 1;
                warn!(
                    method = %method,
                    route = %route,
                    status = status_code,
                    duration_ms,
                    "slow request"
                );
            }
        });
    }

    pub fn record_db_query(&self, duration_ms: f64, operation: &str, entity: &str, success: bool) {
        let labels = Labels::from([
            ("operation".to_string(), operation.to_string()),
            ("entity".to_string(), entity.to_string()),
            ("success".to_string(), success.to_string()),
        ]);
        let slow_query_ms = self.options.slow_query_ms;

        self.record(MetricKind::DbQuery, "db_query", duration_ms, labels, |state, duration_ms| {
            if !success {
                state.db_failures += 1;
            }
            if duration_ms > slow_query_ms {
                state.slow_queries += 1;
                debug!(operation = %operation, entity = %entity, duration_ms, "slow query");
            }
        });
    }

    /// Business observations (entries created, notifications sent...). The value
    /// goes through the same histogram as durations.
    pub fn record_business_metric(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.record(MetricKind::Business, name, value, labels, |_, _| {});
    }

    fn record<F>(&self, kind: MetricKind, name: &str, value: f64, labels: Labels, extra: F)
    where
        F: FnOnce(&mut RecorderState, f64),
    {
        if !value.is_finite() {
            self.internal_errors.fetch_add(1, Ordering::Relaxed);
            debug!(kind = kind.as_str(), name, "dropping non-finite metric value");
            return;
        }
        let value = value.max(0.0);

        let mut state = self.lock_for_write();

        state.totals.get_mut(kind).observe(value);
        extra(&mut state, value);

        let key = SeriesKey {
            kind,
            name: name.to_string(),
            labels: labels.clone(),
        };
        let max_series = self.options.max_series;
        let series_len = state.series.len();
        match state.series.get_mut(&key) {
            Some(series) => {
                series.histogram.observe(value);
                series.last_updated = Instant::now();
            }
            None if series_len < max_series => {
                let mut histogram = Histogram::new();
                histogram.observe(value);
                state.series.insert(
                    key,
                    Series {
                        histogram,
                        last_updated: Instant::now(),
                    },
                );
            }
            None => state.dropped_series += 1,
        }

        state.recent.push(MetricSample {
            kind,
            duration_ms: value,
            labels,
            timestamp_ms: now_ms(),
        });
    }

    /// A poisoned lock is counted once, cleared, and recording carries on with
    /// the recovered state.
    fn lock_for_write(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            self.internal_errors.fetch_add(1, Ordering::Relaxed);
            self.state.clear_poison();
            warn!("metrics recorder lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_for_read(&self) -> MutexGuard<'_, RecorderState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Computed from the per-kind accumulators only, independent of traffic volume.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_of(&self.lock_for_read())
    }

    fn snapshot_of(&self, state: &RecorderState) -> MetricsSnapshot {
        let http_status_classes = state
            .status_classes
            .iter()
            .enumerate()
            .map(|(idx, count)| (format!("{}xx", idx + 1), *count))
            .collect();

        MetricsSnapshot {
            started_at_ms: self.started_at_ms,
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            http: state.totals.http.snapshot(),
            db: state.totals.db.snapshot(),
            business: state.totals.business.snapshot(),
            http_status_classes,
            http_server_errors: state.status_classes[4],
            db_failures: state.db_failures,
            slow_requests: state.slow_requests,
            slow_queries: state.slow_queries,
            series_count: state.series.len(),
            dropped_series: state.dropped_series,
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }

    /// Exposition-format dump of the snapshot: per-kind totals, buckets and
    /// percentiles, followed by one line per metric per label set. Both views
    /// are taken under one lock.
    pub fn export_text(&self) -> String {
        let state = self.lock_for_read();
        let snapshot = self.snapshot_of(&state);
        exposition::render(&state.series, &snapshot)
    }

    /// The last `n` samples, oldest first.
    pub fn recent_samples(&self, n: usize) -> Vec<MetricSample> {
        self.lock_for_read().recent.last(n)
    }

    /// Drops label sets that have not been updated within `max_age`. Per-kind
    /// totals are untouched. Returns how many series were dropped.
    pub fn evict_stale_series(&self, max_age: Duration) -> usize {
        let mut state = self.lock_for_write();
        let before = state.series.len();
        state
            .series
            .retain(|_, series| series.last_updated.elapsed() < max_age);
        before - state.series.len()
    }

    pub fn internal_errors(&self) -> u64 {
        self.internal_errors.load(Ordering::Relaxed)
    }

    /// Performance verdict derived from the current snapshot.
    pub fn health(&self) -> ComponentHealth {
        let snapshot = self.snapshot();
        let mut health = ComponentHealth::healthy();

        let error_rate = snapshot.http_error_rate();
        if error_rate > self.options.unhealthy_error_rate {
            health.fail(
                format!("high-error-rate: {:.1}% of requests failed", error_rate * 100.0),
                Some("inspect server logs for failing routes"),
            );
        } else if error_rate > self.options.degraded_error_rate {
            health.degrade(
                format!("elevated-error-rate: {:.1}% of requests failed", error_rate * 100.0),
                Some("inspect server logs for failing routes"),
            );
        }

        if snapshot.http.count > 0 && snapshot.http.p95 > self.options.degraded_p95_ms {
            health.degrade(
                format!("slow-responses: p95 {:.0}ms", snapshot.http.p95),
                Some("profile slow routes and database queries"),
            );
        }

        if snapshot.internal_errors > 0 {
            health.note(format!(
                "metrics-recorder-errors: {} swallowed",
                snapshot.internal_errors
            ));
        }

        health
    }
}

/// Times a database query; [`finish`](DbQueryTimer::finish) records it. A timer
/// dropped without finishing (early return, `?`, panic) records a failed query.
pub struct DbQueryTimer<'a> {
    recorder: &'a MetricsRecorder,
    operation: &'a str,
    entity: &'a str,
    start: Instant,
    finished: bool,
}

impl MetricsRecorder {
    pub fn db_timer<'a>(&'a self, operation: &'a str, entity: &'a str) -> DbQueryTimer<'a> {
        DbQueryTimer {
            recorder: self,
            operation,
            entity,
            start: Instant::now(),
            finished: false,
        }
    }
}

impl DbQueryTimer<'_> {
    pub fn finish(mut self, success: bool) {
        self.record(success);
    }

    fn record(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.recorder
            .record_db_query(elapsed_ms, self.operation, self.entity, success);
    }
}

impl Drop for DbQueryTimer<'_> {
    fn drop(&mut self) {
        self.record(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health::HealthStatus;

    #[test]
    fn three_requests_snapshot() {
        let recorder = MetricsRecorder::default();
        recorder.record_http_request(100.0, 200, "GET", "/api/logs");
        recorder.record_http_request(300.0, 200, "GET", "/api/logs");
        recorder.record_http_request(1200.0, 201, "POST", "/api/logs");

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.http.count, 3);
        assert_eq!(snapshot.http.cumulative_at(250.0), Some(1));
        assert_eq!(snapshot.http.cumulative_at(500.0), Some(2));
        assert_eq!(snapshot.http.cumulative_at(2500.0), Some(3));
        assert_eq!(snapshot.http_status_classes["2xx"], 3);
        assert_eq!(snapshot.slow_requests, 1);
        assert_eq!(snapshot.series_count, 2);
        assert_eq!(snapshot.db.count, 0);
    }

    #[test]
    fn poisoned_lock_keeps_recording() {
        let recorder = MetricsRecorder::default();
        recorder.record_http_request(10.0, 200, "GET", "/api/logs");

        std::thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = recorder.state.lock().unwrap();
                panic!("poison the recorder");
            });
            assert!(poisoner.join().is_err());
        });
        assert!(recorder.state.is_poisoned());

        recorder.record_http_request(20.0, 200, "GET", "/api/logs");
        recorder.record_http_request(30.0, 200, "GET", "/api/logs");
        recorder.record_db_query(5.0, "select", "log_entry", true);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.http.count, 3);
        assert_eq!(snapshot.db.count, 1);
        assert_eq!(snapshot.internal_errors, 1);
        assert!(!recorder.state.is_poisoned());
    }

    #[test]
    fn non_finite_values_are_swallowed_and_counted() {
        let recorder = MetricsRecorder::default();
        recorder.record_http_request(f64::NAN, 200, "GET", "/");
        recorder.record_db_query(f64::INFINITY, "select", "log_entry", true);
        recorder.record_business_metric("entries_created", 1.0, &[]);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.internal_errors, 2);
        assert_eq!(snapshot.http.count, 0);
        assert_eq!(snapshot.business.count, 1);
    }

    #[test]
    fn negative_durations_are_clamped() {
        let recorder = MetricsRecorder::default();
        recorder.record_db_query(-3.0, "select", "category", true);
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.db.min, 0.0);
        assert_eq!(snapshot.db.cumulative_at(10.0), Some(1));
    }

    #[test]
    fn db_failures_and_slow_queries() {
        let recorder = MetricsRecorder::default();
        recorder.record_db_query(20.0, "insert", "log_entry", false);
        recorder.record_db_query(800.0, "select", "log_entry", true);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.db.count, 2);
        assert_eq!(snapshot.db_failures, 1);
        assert_eq!(snapshot.slow_queries, 1);
    }

    #[test]
    fn series_beyond_limit_only_feed_totals() {
        let recorder = MetricsRecorder::new(RecorderOptions {
            max_series: 2,
            ..Default::default()
        });
        for route in ["/a", "/b", "/c", "/d"] {
            recorder.record_http_request(5.0, 200, "GET", route);
        }

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.http.count, 4);
        assert_eq!(snapshot.series_count, 2);
        assert_eq!(snapshot.dropped_series, 2);
    }

    #[test]
    fn recent_samples_are_bounded() {
        let recorder = MetricsRecorder::new(RecorderOptions {
            recent_capacity: 3,
            ..Default::default()
        });
        for i in 0..5 {
            recorder.record_business_metric("handover", i as f64, &[("shift", "night")]);
        }

        let recent = recorder.recent_samples(10);
        assert_eq!(recent.len(), 3);
        let values: Vec<f64> = recent.iter().map(|s| s.duration_ms).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(recent[0].labels["shift"], "night");
        assert_eq!(recent[0].kind, MetricKind::Business);
    }

    #[test]
    fn evicting_stale_series_keeps_totals() {
        let recorder = MetricsRecorder::default();
        recorder.record_http_request(5.0, 200, "GET", "/a");
        recorder.record_http_request(5.0, 200, "GET", "/b");

        assert_eq!(recorder.evict_stale_series(Duration::from_secs(3600)), 0);
        assert_eq!(recorder.evict_stale_series(Duration::ZERO), 2);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.series_count, 0);
        assert_eq!(snapshot.http.count, 2);
    }

    #[test]
    fn db_timer_records_once() {
        let recorder = MetricsRecorder::default();
        recorder.db_timer("select", "log_entry").finish(true);
        {
            let _timer = recorder.db_timer("update", "log_entry");
            // dropped without finish
        }

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.db.count, 2);
        assert_eq!(snapshot.db_failures, 1);
    }

    #[test]
    fn health_follows_error_rate() {
        let recorder = MetricsRecorder::default();
        assert_eq!(recorder.health().status, HealthStatus::Healthy);

        for _ in 0..90 {
            recorder.record_http_request(5.0, 200, "GET", "/");
        }
        for _ in 0..10 {
            recorder.record_http_request(5.0, 500, "GET", "/");
        }
        assert_eq!(recorder.health().status, HealthStatus::Degraded);

        for _ in 0..30 {
            recorder.record_http_request(5.0, 503, "GET", "/");
        }
        let health = recorder.health();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.issues[0].starts_with("high-error-rate"));
    }

    #[test]
    fn health_degrades_on_slow_p95() {
        let recorder = MetricsRecorder::default();
        for _ in 0..10 {
            recorder.record_http_request(4000.0, 200, "GET", "/slow");
        }
        let health = recorder.health();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.issues.iter().any(|i| i.starts_with("slow-responses")));
    }
}
