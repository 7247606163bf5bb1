use anyhow::Context;
use common_database::DatabaseProbe;
use lifecycle::{HostSignal, ShutdownReport};
use tokio::net::TcpListener;
use tracing::info;

use crate::app_context::AppContext;
use crate::config::Config;
use crate::router::router;
use crate::tasks::register_builtin_tasks;

/// Runs the service until the coordinator has shut it down, and returns the shutdown report.
///
/// Startup pings the database (when configured) and raises the host signals in
/// boot order. Shutdown handlers drain HTTP first, then close the pool, then log
/// the final metrics.
pub async fn serve(ctx: AppContext, config: &Config, listener: TcpListener) -> anyhow::Result<ShutdownReport> {
    let coordinator = ctx.coordinator.clone();
    register_builtin_tasks(&ctx, config)?;

    let app = router(ctx.clone());
    let startup_ctx = ctx.clone();
    coordinator
        .initialize_with(|c| async move {
            if let Some(pool) = &startup_ctx.pool {
                let rtt = pool.ping().await.context("database is unreachable")?;
                info!(latency_ms = rtt.as_secs_f64() * 1000.0, "Server: database reachable");
            }
            c.notify(HostSignal::ModelReady)?;
            c.notify(HostSignal::TransportReady)?;
            c.notify(HostSignal::HandlersRegistered)?;
            anyhow::Ok(())
        })
        .await?;

    let address = listener.local_addr()?;
    let shutdown = coordinator.shutdown_signal();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });
    coordinator.notify(HostSignal::AcceptingConnections)?;
    info!(address = %address, "Server: listening");

    coordinator
        .register_shutdown_handler("drain-http", move || async move {
            server
                .await
                .context("http server task failed")?
                .context("http server failed")?;
            anyhow::Ok(())
        })
        .await;

    if let Some(pool) = ctx.pool.clone() {
        coordinator
            .register_shutdown_handler("close-db-pool", move || async move {
                pool.close().await;
                anyhow::Ok(())
            })
            .await;
    }

    let recorder = coordinator.metrics().clone();
    coordinator
        .register_shutdown_handler("flush-metrics", move || async move {
            let snapshot = recorder.snapshot();
            info!(
                http_requests = snapshot.http.count,
                db_queries = snapshot.db.count,
                internal_errors = snapshot.internal_errors,
                uptime_secs = snapshot.uptime_secs,
                "Server: final metrics"
            );
            anyhow::Ok(())
        })
        .await;

    coordinator.wait_terminated().await;
    Ok(coordinator.last_shutdown_report().unwrap_or_default())
}
