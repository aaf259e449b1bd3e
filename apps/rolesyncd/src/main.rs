//! rolesyncd: keeps one role per group in step with members' identity tags.

mod config;
mod logging;

use anyhow::Context;
use config::Config;
use rolesync_core::{GroupConfigProvider, InMemoryGroupConfigProvider};
use rolesync_engine::SyncService;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Pause between connection checks, and before a new start sequence after
/// one gives up.
const RESTART_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "rolesyncd exited with an error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        api_base_url = %config.api_base_url,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        heartbeat = config.heartbeat_url.is_some(),
        "Starting rolesyncd"
    );

    let provider: Arc<dyn GroupConfigProvider> = match &config.groups_file {
        Some(path) => Arc::new(
            InMemoryGroupConfigProvider::from_json_file(path)
                .await
                .with_context(|| format!("loading groups from {}", path.display()))?,
        ),
        None => {
            warn!("ROLESYNC_GROUPS_FILE not set, no groups are managed");
            Arc::new(InMemoryGroupConfigProvider::new())
        }
    };

    let service = SyncService::from_settings(config.service_settings(), provider)
        .await
        .context("building sync service")?;

    tokio::select! {
        () = supervise(&service) => {}
        () = shutdown_signal() => {}
    }

    service.shutdown().await;
    info!("rolesyncd stopped");
    Ok(())
}

/// Keep the connection up: start it, and start it again whenever a start
/// sequence or a background reconnect has given up.
async fn supervise(service: &SyncService) {
    loop {
        if !service.is_ready() {
            match service.start().await {
                Ok(()) => info!("Connected"),
                Err(e) if e.is_auth_failure() => {
                    error!(error = %e, "Credentials rejected, retrying later");
                }
                Err(e) => warn!(error = %e, "Start failed, retrying later"),
            }
        }
        tokio::time::sleep(RESTART_DELAY).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
