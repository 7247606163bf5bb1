use std::time::Duration;

use common_database::PoolSettings;
use envconfig::Envconfig;
use lifecycle::FaultThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}, must be text or json")),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(default = "development")]
    pub environment: String,

    #[envconfig(default = "text")]
    pub log_format: LogFormat,

    #[envconfig(nested = true)]
    pub pool: PoolConfig,

    #[envconfig(nested = true)]
    pub lifecycle: LifecycleConfig,

    #[envconfig(nested = true)]
    pub cleanup: CleanupConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct PoolConfig {
    // Unset runs the service without a database
    pub database_url: Option<String>,

    #[envconfig(default = "10")]
    pub pg_max_connections: u32,

    #[envconfig(default = "1")]
    pub pg_min_connections: u32,

    #[envconfig(default = "2000")]
    pub pg_acquire_timeout_ms: u64,

    #[envconfig(default = "100")]
    pub pool_event_capacity: usize,
}

impl PoolConfig {
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.pg_max_connections,
            min_connections: self.pg_min_connections,
            acquire_timeout: Duration::from_millis(self.pg_acquire_timeout_ms),
            ..PoolSettings::default()
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct LifecycleConfig {
    #[envconfig(default = "30000")]
    pub shutdown_timeout_ms: u64,

    #[envconfig(default = "10000")]
    pub shutdown_handler_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub cleanup_grace_ms: u64,

    #[envconfig(default = "5")]
    pub max_uncaught_faults: u64,

    #[envconfig(default = "5")]
    pub max_unhandled_rejections: u64,
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_handler_timeout_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn fault_thresholds(&self) -> FaultThresholds {
        FaultThresholds {
            max_uncaught: self.max_uncaught_faults,
            max_unhandled_rejections: self.max_unhandled_rejections,
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct CleanupConfig {
    #[envconfig(default = "60")]
    pub idle_reap_interval_secs: u64,

    #[envconfig(default = "300")]
    pub metrics_eviction_interval_secs: u64,

    #[envconfig(default = "3600")]
    pub metrics_series_ttl_secs: u64,

    #[envconfig(default = "1024")]
    pub memory_limit_mb: u64,

    #[envconfig(default = "30")]
    pub memory_sample_interval_secs: u64,
}
