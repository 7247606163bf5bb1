use tokio::signal::unix::SignalKind;
use tracing::{error, info};

/// Resolves with the name of the first termination signal received.
pub(crate) async fn wait_for_shutdown_signal() -> &'static str {
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Lifecycle: failed to install SIGTERM handler, only SIGINT is trapped");
            return match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(_) => std::future::pending().await,
            };
        }
    };

    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("received SIGINT");
            "SIGINT"
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM");
            "SIGTERM"
        }
    }
}
