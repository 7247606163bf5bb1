use std::sync::Arc;

use anyhow::Context;
use cleanup::CleanupScheduler;
use common_database::{get_lazy_pool, InstrumentedPool, PoolMonitor, PoolMonitorOptions};
use common_metrics::MetricsRecorder;
use lifecycle::Coordinator;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::warn;

use crate::config::Config;
use crate::memory::MemorySampler;

pub const SERVICE_NAME: &str = "shiftlog-server";

/// Everything the HTTP handlers and the startup wiring share.
#[derive(Clone)]
pub struct AppContext {
    pub coordinator: Coordinator,
    pub pool: Option<InstrumentedPool>,
    pub memory: Arc<MemorySampler>,
    pub prometheus: Option<PrometheusHandle>,
    pub environment: String,
}

impl AppContext {
    pub fn new(
        coordinator: Coordinator,
        pool: Option<InstrumentedPool>,
        memory: Arc<MemorySampler>,
        prometheus: Option<PrometheusHandle>,
        environment: String,
    ) -> Self {
        Self {
            coordinator,
            pool,
            memory,
            prometheus,
            environment,
        }
    }

    /// Builds the coordinator and the components it owns. The database pool, if
    /// configured, connects lazily; startup pings it.
    pub fn from_config(config: &Config, prometheus: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        let monitor = Arc::new(PoolMonitor::new(
            PoolMonitorOptions::default()
                .with_capacity(config.pool.pg_max_connections)
                .with_event_capacity(config.pool.pool_event_capacity),
        ));

        let pool = match &config.pool.database_url {
            Some(url) => {
                let pool = get_lazy_pool(url, &config.pool.settings())
                    .context("failed to create database pool")?;
                Some(InstrumentedPool::new(pool, monitor.clone()))
            }
            None => {
                warn!("Server: DATABASE_URL is not set, running without a database");
                None
            }
        };

        let coordinator = Coordinator::builder(SERVICE_NAME)
            .with_shutdown_timeout(config.lifecycle.shutdown_timeout())
            .with_handler_timeout(config.lifecycle.handler_timeout())
            .with_cleanup_grace(config.lifecycle.cleanup_grace())
            .with_fault_thresholds(config.lifecycle.fault_thresholds())
            .with_metrics(Arc::new(MetricsRecorder::default()))
            .with_pool_monitor(monitor)
            .with_scheduler(CleanupScheduler::default())
            .build();

        Ok(Self::new(
            coordinator,
            pool,
            Arc::new(MemorySampler::new(config.cleanup.memory_limit_mb)),
            prometheus,
            config.environment.clone(),
        ))
    }
}
