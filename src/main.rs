use anyhow::{Context, Result};
use sftp_upload_service::transport::SftpTransport;
use sftp_upload_service::utils::config::{locate_config, Config};
use sftp_upload_service::utils::logging;
use sftp_upload_service::ServiceLoop;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file is optional
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config_path = locate_config(std::env::args().nth(1));
    let config = Config::load(&config_path)
        .with_context(|| format!("invalid configuration ({})", config_path.display()))?;

    info!("Starting SFTP upload service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path.display());

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let transport = SftpTransport::new(config.io_timeout);
    let mut service = ServiceLoop::new(config, transport, shutdown);
    let summary = service.run().await;

    info!(
        "Uploaded {} file(s) in {} cycle(s) this run",
        summary.uploaded, summary.cycles
    );
    for name in &summary.stranded {
        warn!("{} was uploaded but is still in the watched folder", name);
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
