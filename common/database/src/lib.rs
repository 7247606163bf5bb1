//! Connection pool observation for the Postgres pool: the pool monitor that
//! turns acquire/release/failure events into statistics and a health verdict,
//! and an instrumented `sqlx` pool that feeds it.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

mod error;
mod instrumented;
mod monitor;
mod reaper;

pub use error::PoolError;
pub use instrumented::{DatabaseProbe, InstrumentedPool, MonitoredConnection, PoolStats};
pub use monitor::{PoolEvent, PoolEventKind, PoolMetrics, PoolMonitor, PoolMonitorOptions};
pub use reaper::IdleConnectionReaper;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_millis(2000),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolSettings {
    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .test_before_acquire(true)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
    }
}

pub async fn get_pool(url: &str, settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    settings.options().connect(url).await
}

/// Pool that opens connections on first use instead of at construction.
pub fn get_lazy_pool(url: &str, settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    settings.options().connect_lazy(url)
}
