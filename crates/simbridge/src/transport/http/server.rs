//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::BridgeConfig;
use crate::service::SimulatorService;

use super::routes::{cors_layer, routes};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// If true, ignore SIGTERM and wait for explicit /shutdown or SIGINT.
    pub await_explicit_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for ServerConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            cors_origin: config.cors_origin.clone(),
            await_explicit_shutdown: config.await_explicit_shutdown,
        }
    }
}

/// Start the HTTP server with provided service.
pub async fn serve(config: ServerConfig, service: Arc<SimulatorService>) -> anyhow::Result<()> {
    let shutdown_rx = service.shutdown_rx();
    let app = routes(service.clone()).layer(cors_layer(&config.cors_origin));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Starting simbridge server on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.await_explicit_shutdown, shutdown_rx))
        .await?;

    info!("Server shutdown complete");

    // Stops the accept loop as well when the shutdown came from a signal.
    service.trigger_shutdown();
    service.shutdown();

    Ok(())
}

/// Resolve on SIGINT, on SIGTERM unless `await_explicit_shutdown`, or once the
/// service flips its shutdown flag.
async fn shutdown_signal(await_explicit_shutdown: bool, mut shutdown_rx: watch::Receiver<bool>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = if await_explicit_shutdown {
        info!("Explicit shutdown required, SIGTERM will be ignored");
        None
    } else {
        Some(signal(SignalKind::terminate()).expect("install SIGTERM handler"))
    };
    let sigterm_recv = async {
        match sigterm.as_mut() {
            Some(sig) => sig.recv().await,
            None => std::future::pending().await,
        }
    };

    // A dropped sender means no /shutdown is coming.
    let flag = async {
        let closed = shutdown_rx.wait_for(|stop| *stop).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    };

    let source = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm_recv => "SIGTERM",
        () = flag => "/shutdown",
    };
    info!(source, "Shutting down");
}
