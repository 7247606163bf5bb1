use anyhow::Context;
use envconfig::Envconfig;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use shiftlog_server::app_context::AppContext;
use shiftlog_server::config::{Config, LogFormat};
use shiftlog_server::server::serve;

fn init_tracing(format: LogFormat) {
    // stdout, level from RUST_LOG (default INFO)
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let log_layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().with_filter(filter).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(filter)
            .boxed(),
    };
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let prometheus = match common_metrics::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Server: prometheus recorder not installed");
            None
        }
    };

    let ctx = AppContext::from_config(&config, prometheus)?;
    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .with_context(|| format!("could not bind {}", config.bind()))?;

    let report = serve(ctx, &config, listener).await?;
    if !report.clean {
        error!(
            reason = %report.reason,
            failed = ?report.failed,
            timed_out = ?report.timed_out,
            abandoned = ?report.abandoned,
            "Server: shutdown was not clean"
        );
        anyhow::bail!("shutdown did not complete cleanly");
    }

    info!(elapsed_secs = report.elapsed.as_secs_f64(), "Server: exiting");
    Ok(())
}
