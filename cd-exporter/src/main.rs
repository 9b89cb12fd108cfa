use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cd_exporter::api::{ApiServer, ApiServerConfig, AppState};
use cd_exporter::cli::Args;
use cd_exporter::logging::init_logging;
use cd_exporter::metrics::{HealthChecker, MetricsStore, PrometheusExporter};
use cd_exporter::scraper::Scraper;
use cd_exporter::session::build_source;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Exits with status 2 on invalid options
    let config = Args::parse().into_config_or_exit();

    let log_files = init_logging(config.log_dir.as_deref())?;
    let cancel = CancellationToken::new();
    if let Some(files) = &log_files {
        files.start_retention_cleanup(cancel.clone());
        info!(log_dir = %files.log_dir().display(), "File logging enabled");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.source.backend(),
        discipline = %config.discipline,
        namespace = %config.namespace,
        "Starting cd-exporter"
    );

    let source = build_source(&config.source)?;
    let store = Arc::new(MetricsStore::new(&config.states, config.discipline));
    let exporter = Arc::new(PrometheusExporter::with_namespace(
        store.clone(),
        config.namespace.clone(),
    ));
    let health = Arc::new(HealthChecker::new(store.clone()));

    let server = ApiServer::new(
        ApiServerConfig::from(&config),
        AppState::new(exporter, health.clone()),
        cancel.clone(),
    );
    let listener = server.bind().await?;

    let scraper = Arc::new(Scraper::new(source, store, health, config.scrape_interval));
    let scraper_handle = scraper.spawn(cancel.clone());

    tokio::spawn(cancel_on_signal(cancel.clone()));

    let served = server.serve(listener).await;

    cancel.cancel();
    if let Err(e) = scraper_handle.await {
        warn!(error = %e, "Scraper task ended abnormally");
    }
    served?;

    info!("cd-exporter stopped");
    Ok(())
}

/// Cancel `token` on Ctrl+C, or SIGTERM on Unix.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("Received Ctrl+C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C");
    }
    token.cancel();
}
