use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use common_database::{DatabaseProbe, InstrumentedPool, PoolEvent, PoolMetrics, PoolStats};
use common_metrics::{render_exposition, MetricsRecorder};
use health::{ComponentHealth, HealthResponse, HealthStatus};
use lifecycle::{FaultCounters, LifecyclePhase};
use serde::Serialize;
use tracing::warn;

use crate::app_context::AppContext;
use crate::memory::MemoryCheck;
use crate::router::CorrelationId;

const RECENT_POOL_EVENTS: usize = 20;
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCheck {
    #[serde(flatten)]
    pub health: ComponentHealth,
    pub configured: bool,
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesCheck {
    #[serde(flatten)]
    pub health: ComponentHealth,
    pub phase: LifecyclePhase,
    pub scheduler_running: bool,
    pub listeners: u32,
    pub faults: FaultCounters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    pub database: DatabaseCheck,
    pub services: ServicesCheck,
    pub memory: MemoryCheck,
    pub connection_pool: ComponentHealth,
    pub performance: ComponentHealth,
    pub resource_cleanup: ComponentHealth,
}

impl HealthChecks {
    fn status(&self) -> HealthStatus {
        [
            self.database.health.status,
            self.services.health.status,
            self.memory.health.status,
            self.connection_pool.status,
            self.performance.status,
            self.resource_cleanup.status,
        ]
        .into_iter()
        .fold(HealthStatus::Healthy, HealthStatus::worst)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub uptime_secs: f64,
    pub http_requests: u64,
    pub http_error_rate: f64,
    pub http_p50_ms: f64,
    pub http_p95_ms: f64,
    pub http_p99_ms: f64,
    pub slow_requests: u64,
    pub db_queries: u64,
    pub db_failures: u64,
    pub db_p95_ms: f64,
    pub pool_utilization: f64,
    pub internal_errors: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub environment: String,
    pub phase: LifecyclePhase,
    pub correlation_id: Option<String>,
    pub termination_guarantee: &'static str,
    pub checks: HealthChecks,
    pub metrics: MetricsSummary,
}

pub async fn health(
    State(ctx): State<AppContext>,
    correlation: Option<Extension<CorrelationId>>,
) -> HealthResponse<HealthReport> {
    let recorder = ctx.coordinator.metrics();
    let database = database_check(ctx.pool.as_ref(), recorder).await;
    let coordinator = ctx.coordinator.health_check();
    let snapshot = recorder.snapshot();

    let checks = HealthChecks {
        database,
        services: services_check(&ctx, coordinator.phase, coordinator.details.faults),
        memory: ctx.memory.check(),
        connection_pool: coordinator.components.resource_pool,
        performance: coordinator.components.performance,
        resource_cleanup: coordinator.components.cleanup,
    };
    let status = checks.status();
    if status.is_unhealthy() {
        warn!(status = %status, "Health: reporting unhealthy");
    }
    recorder.record_business_metric("health_check", 1.0, &[("status", status.as_str())]);

    let metrics = MetricsSummary {
        uptime_secs: snapshot.uptime_secs,
        http_requests: snapshot.http.count,
        http_error_rate: snapshot.http_error_rate(),
        http_p50_ms: snapshot.http.p50,
        http_p95_ms: snapshot.http.p95,
        http_p99_ms: snapshot.http.p99,
        slow_requests: snapshot.slow_requests,
        db_queries: snapshot.db.count,
        db_failures: snapshot.db_failures,
        db_p95_ms: snapshot.db.p95,
        pool_utilization: ctx.coordinator.pool_monitor().get_metrics().utilization,
        internal_errors: snapshot.internal_errors,
    };

    HealthResponse {
        status,
        body: HealthReport {
            status,
            environment: ctx.environment.clone(),
            phase: coordinator.phase,
            correlation_id: correlation.map(|Extension(id)| id.0),
            termination_guarantee: coordinator.details.termination_guarantee,
            checks,
            metrics,
        },
    }
}

async fn database_check(pool: Option<&InstrumentedPool>, recorder: &MetricsRecorder) -> DatabaseCheck {
    let Some(pool) = pool else {
        let mut health = ComponentHealth::healthy();
        health.note("not configured");
        return DatabaseCheck {
            health,
            configured: false,
            latency_ms: None,
        };
    };

    let mut health = ComponentHealth::healthy();
    let timer = recorder.db_timer("select", "health_check");
    let latency_ms = match pool.ping().await {
        Ok(rtt) => {
            timer.finish(true);
            Some(rtt.as_secs_f64() * 1000.0)
        }
        Err(e) => {
            timer.finish(false);
            health.fail(
                format!("unreachable: {e}"),
                Some("check DATABASE_URL and database availability"),
            );
            None
        }
    };

    DatabaseCheck {
        health,
        configured: true,
        latency_ms,
    }
}

fn services_check(ctx: &AppContext, phase: LifecyclePhase, faults: FaultCounters) -> ServicesCheck {
    let mut health = ComponentHealth::healthy();
    let scheduler_running = ctx.coordinator.scheduler().is_running();

    match phase {
        LifecyclePhase::Uninitialized | LifecyclePhase::Initializing => {
            health.degrade(format!("starting: {phase}"), None);
        }
        LifecyclePhase::Running => {
            if !scheduler_running {
                health.degrade("cleanup-scheduler-stopped", Some("restart the service"));
            }
        }
        LifecyclePhase::ShuttingDown | LifecyclePhase::Terminated => {
            health.fail(format!("stopping: {phase}"), None);
        }
    }
    if faults.uncaught_faults > 0 || faults.unhandled_rejections > 0 {
        health.note(format!(
            "faults: {} uncaught, {} unhandled rejections",
            faults.uncaught_faults, faults.unhandled_rejections
        ));
    }

    ServicesCheck {
        health,
        phase,
        scheduler_running,
        listeners: ctx.coordinator.listeners(),
        faults,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPoolReport {
    pub metrics: PoolMetrics,
    pub health: ComponentHealth,
    pub recent_events: Vec<PoolEvent>,
    pub stats: Option<PoolStats>,
}

pub async fn connection_pool(State(ctx): State<AppContext>) -> Json<ConnectionPoolReport> {
    let monitor = ctx.coordinator.pool_monitor();
    Json(ConnectionPoolReport {
        metrics: monitor.get_metrics(),
        health: monitor.get_health(),
        recent_events: monitor.get_recent_events(RECENT_POOL_EVENTS),
        stats: ctx.pool.as_ref().map(InstrumentedPool::stats),
    })
}

pub async fn metrics(State(ctx): State<AppContext>) -> impl IntoResponse {
    let body = render_exposition(ctx.coordinator.metrics(), ctx.prometheus.as_ref());
    ([(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body)
}

pub async fn index() -> &'static str {
    "shiftlog server"
}
