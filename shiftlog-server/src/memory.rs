use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use anyhow::Context;
use common_metrics::now_ms;
use health::ComponentHealth;
use serde::Serialize;
use tracing::debug;

const DEGRADED_PCT: u64 = 80;
const UNHEALTHY_PCT: u64 = 95;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCheck {
    #[serde(flatten)]
    pub health: ComponentHealth,
    pub rss_bytes: Option<u64>,
    pub limit_bytes: u64,
    pub sampled_at_ms: Option<i64>,
}

/// Last resident set size seen by the `memory-sampler` cleanup task.
/// `/health` only reads the stored sample, it never touches `/proc`.
pub struct MemorySampler {
    limit_bytes: u64,
    rss_bytes: AtomicU64,
    sampled_at_ms: AtomicI64,
}

impl MemorySampler {
    pub fn new(limit_mb: u64) -> Self {
        Self {
            limit_bytes: limit_mb.saturating_mul(1024 * 1024),
            rss_bytes: AtomicU64::new(0),
            sampled_at_ms: AtomicI64::new(0),
        }
    }

    /// Reads the current RSS and stores it. Linux only.
    pub async fn sample(&self) -> anyhow::Result<u64> {
        let status = tokio::fs::read_to_string("/proc/self/status")
            .await
            .context("reading /proc/self/status")?;
        let rss = parse_vm_rss(&status).context("no VmRSS line in /proc/self/status")?;
        self.record(rss);
        debug!(rss_bytes = rss, "Memory: sampled resident set size");
        Ok(rss)
    }

    pub fn record(&self, rss_bytes: u64) {
        self.rss_bytes.store(rss_bytes, Ordering::Relaxed);
        self.sampled_at_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn check(&self) -> MemoryCheck {
        let sampled_at_ms = match self.sampled_at_ms.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        };
        let rss = sampled_at_ms.map(|_| self.rss_bytes.load(Ordering::Relaxed));

        let mut health = ComponentHealth::healthy();
        match rss {
            None => health.note("not-sampled-yet"),
            Some(rss) if self.limit_bytes > 0 => {
                let used = rss.saturating_mul(100);
                if used >= self.limit_bytes.saturating_mul(UNHEALTHY_PCT) {
                    health.fail(
                        format!("memory-critical: {} MiB in use", rss / (1024 * 1024)),
                        Some("raise MEMORY_LIMIT_MB or investigate leaks"),
                    );
                } else if used >= self.limit_bytes.saturating_mul(DEGRADED_PCT) {
                    health.degrade(
                        format!("memory-high: {} MiB in use", rss / (1024 * 1024)),
                        Some("raise MEMORY_LIMIT_MB or investigate leaks"),
                    );
                }
            }
            Some(_) => {}
        }

        MemoryCheck {
            health,
            rss_bytes: rss,
            limit_bytes: self.limit_bytes,
            sampled_at_ms,
        }
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
