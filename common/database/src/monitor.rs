use std::sync::{Mutex, MutexGuard, PoisonError};

use common_metrics::{now_ms, RingBuffer};
use health::ComponentHealth;
use serde::Serialize;
use tracing::warn;

const METRIC_POOL_EVENTS: &str = "db_pool_events_total";
const METRIC_POOL_ACTIVE: &str = "db_pool_active_connections";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolEventKind {
    Acquired,
    Released,
    Failed,
    TimedOut,
}

impl PoolEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolEventKind::Acquired => "acquired",
            PoolEventKind::Released => "released",
            PoolEventKind::Failed => "failed",
            PoolEventKind::TimedOut => "timed_out",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PoolEventKind::Failed | PoolEventKind::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEvent {
    #[serde(rename = "type")]
    pub kind: PoolEventKind,
    pub duration_ms: f64,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PoolMonitorOptions {
    /// Maximum connections of the observed pool. Zero disables the utilization check.
    pub capacity: u32,
    pub event_capacity: usize,
    /// Smoothing factor of the acquire-latency moving average.
    pub ema_alpha: f64,
    pub slow_acquire_ms: f64,
    /// Failure rate over the recent events, in basis points, above which the pool is degraded.
    pub degraded_failure_bps: u64,
    pub unhealthy_failure_bps: u64,
    pub high_utilization_pct: u64,
}

impl Default for PoolMonitorOptions {
    fn default() -> Self {
        Self {
            capacity: 0,
            event_capacity: 100,
            ema_alpha: 0.2,
            slow_acquire_ms: 500.0,
            degraded_failure_bps: 500,
            unhealthy_failure_bps: 1500,
            high_utilization_pct: 90,
        }
    }
}

impl PoolMonitorOptions {
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }
}

/// Counters since startup, plus the failure rate over the buffered events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    pub acquired: u64,
    pub released: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub active: u64,
    pub peak_active: u64,
    pub capacity: u32,
    pub utilization: f64,
    pub avg_acquire_ms: f64,
    pub recent_events: usize,
    pub recent_failure_rate: f64,
    pub last_failure_reason: Option<String>,
    pub last_failure_at_ms: Option<i64>,
}

#[derive(Default)]
struct Counters {
    acquired: u64,
    released: u64,
    failed: u64,
    timed_out: u64,
    active: u64,
    peak_active: u64,
    avg_acquire_ms: Option<f64>,
    last_failure_reason: Option<String>,
    last_failure_at_ms: Option<i64>,
}

struct MonitorState {
    counters: Counters,
    events: RingBuffer<PoolEvent>,
}

/// Observes a connection pool through the events its call sites report.
///
/// The monitor never touches the pool itself. Call sites (normally
/// [`InstrumentedPool`](crate::InstrumentedPool)) report every acquisition,
/// release, failure and timeout; the monitor keeps running counters and the
/// last `event_capacity` events, and derives health from them.
pub struct PoolMonitor {
    options: PoolMonitorOptions,
    state: Mutex<MonitorState>,
}

impl Default for PoolMonitor {
    fn default() -> Self {
        Self::new(PoolMonitorOptions::default())
    }
}

impl PoolMonitor {
    pub fn new(options: PoolMonitorOptions) -> Self {
        let events = RingBuffer::new(options.event_capacity);
        Self {
            options,
            state: Mutex::new(MonitorState {
                counters: Counters::default(),
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_acquire(&self, duration_ms: f64) {
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };
        let alpha = self.options.ema_alpha;

        let active = {
            let mut state = self.lock();
            let c = &mut state.counters;
            c.acquired += 1;
            c.active += 1;
            c.peak_active = c.peak_active.max(c.active);
            c.avg_acquire_ms = Some(match c.avg_acquire_ms {
                None => duration_ms,
                Some(avg) => alpha * duration_ms + (1.0 - alpha) * avg,
            });
            let active = c.active;
            push(&mut state, PoolEventKind::Acquired, duration_ms, None);
            active
        };
        metrics::gauge!(METRIC_POOL_ACTIVE).set(active as f64);
    }

    pub fn on_release(&self) {
        let active = {
            let mut state = self.lock();
            let c = &mut state.counters;
            c.released += 1;
            c.active = c.active.saturating_sub(1);
            let active = c.active;
            push(&mut state, PoolEventKind::Released, 0.0, None);
            active
        };
        metrics::gauge!(METRIC_POOL_ACTIVE).set(active as f64);
    }

    pub fn on_fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "Pool: connection acquisition failed");
        let mut state = self.lock();
        state.counters.failed += 1;
        record_failure(&mut state.counters, reason.clone());
        push(&mut state, PoolEventKind::Failed, 0.0, Some(reason));
    }

    pub fn on_timeout(&self) {
        warn!("Pool: timed out waiting for a connection");
        let mut state = self.lock();
        state.counters.timed_out += 1;
        record_failure(&mut state.counters, "acquire timed out".to_string());
        push(&mut state, PoolEventKind::TimedOut, 0.0, None);
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        let state = self.lock();
        let c = &state.counters;
        let (failures, total) = failure_counts(&state.events);
        PoolMetrics {
            acquired: c.acquired,
            released: c.released,
            failed: c.failed,
            timed_out: c.timed_out,
            active: c.active,
            peak_active: c.peak_active,
            capacity: self.options.capacity,
            utilization: if self.options.capacity == 0 {
                0.0
            } else {
                c.active as f64 / self.options.capacity as f64
            },
            avg_acquire_ms: c.avg_acquire_ms.unwrap_or(0.0),
            recent_events: state.events.len(),
            recent_failure_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
            last_failure_reason: c.last_failure_reason.clone(),
            last_failure_at_ms: c.last_failure_at_ms,
        }
    }

    /// Failure rate is judged on the buffered events only, so an old incident
    /// stops counting once enough newer events have pushed it out.
    pub fn get_health(&self) -> ComponentHealth {
        let state = self.lock();
        let opts = &self.options;
        let mut health = ComponentHealth::healthy();

        // Integer comparison keeps the boundary exact: 5.00% is not above 5%
        let (failures, total) = failure_counts(&state.events);
        let failure_bps = failures * 10_000;
        let rate_pct = if total == 0 {
            0.0
        } else {
            failures as f64 * 100.0 / total as f64
        };
        if failure_bps > opts.unhealthy_failure_bps * total {
            health.fail(
                format!("high-failure-rate: {rate_pct:.2}% of recent pool events failed"),
                Some("check database availability and connection limits"),
            );
        } else if failure_bps > opts.degraded_failure_bps * total {
            health.degrade(
                format!("elevated-failure-rate: {rate_pct:.2}% of recent pool events failed"),
                Some("check database availability and connection limits"),
            );
        }

        if let Some(avg) = state.counters.avg_acquire_ms {
            if avg > opts.slow_acquire_ms {
                health.degrade("slow-acquire", Some("increase the pool size"));
            }
        }

        let capacity = u64::from(opts.capacity);
        if capacity > 0 && state.counters.active * 100 >= capacity * opts.high_utilization_pct {
            health.degrade(
                format!(
                    "high-utilization: {} of {} connections in use",
                    state.counters.active, capacity
                ),
                Some("increase the pool size"),
            );
        }

        health
    }

    /// The last `n` buffered events, oldest first.
    pub fn get_recent_events(&self, n: usize) -> Vec<PoolEvent> {
        self.lock().events.last(n)
    }
}

fn push(state: &mut MonitorState, kind: PoolEventKind, duration_ms: f64, reason: Option<String>) {
    metrics::counter!(METRIC_POOL_EVENTS, "event" => kind.as_str()).increment(1);
    state.events.push(PoolEvent {
        kind,
        duration_ms,
        timestamp_ms: now_ms(),
        reason,
    });
}

fn record_failure(counters: &mut Counters, reason: String) {
    counters.last_failure_reason = Some(reason);
    counters.last_failure_at_ms = Some(now_ms());
}

fn failure_counts(events: &RingBuffer<PoolEvent>) -> (u64, u64) {
    let failures = events.iter().filter(|e| e.kind.is_failure()).count() as u64;
    (failures, events.len() as u64)
}
