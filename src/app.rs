use crate::config::Config;
use crate::detector::ProcessDetector;
use crate::relay::RelayService;
use crate::server::HttpServer;
use crate::storage::FrameStore;

use anyhow::Context;
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let store = FrameStore::open(&config.storage)
        .await
        .context("failed to prepare frame storage")?;

    let detector = Arc::new(ProcessDetector::new(&config.detector));
    let relay = Arc::new(RelayService::new(
        detector,
        store,
        config.detector.max_concurrent,
        config.detector.get_timeout(),
    ));
    tracing::info!(
        "Detector `{}` with {} worker slots and {:?} timeout",
        config.detector.program,
        config.detector.max_concurrent,
        config.detector.get_timeout()
    );

    let server = HttpServer::new(relay, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
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
}
