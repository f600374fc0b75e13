use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tally::config::ServerConfig;
use tally::contracts::TallyError;
use tally::server::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tally=info".parse()?))
        .init();

    tracing::info!("Tally starting...");

    let config = ServerConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        db_file = %config.db_file.display(),
        clustered = config.is_clustered(),
        shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
        "Loaded configuration"
    );

    let root = CancellationToken::new();
    tokio::spawn(cancel_on_signal(root.clone()));

    let server = Server::init(config, root).map_err(TallyError::from)?;
    server.run().await.map_err(TallyError::from)?;

    tracing::info!("Tally stopped");
    Ok(())
}

/// Cancels `root` on SIGINT or SIGTERM.
async fn cancel_on_signal(root: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, exiting"),
        _ = terminate => tracing::info!("Received SIGTERM, exiting"),
    }
    root.cancel();
}
