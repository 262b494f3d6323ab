//! simbridge binary: serve the simulator HTTP API and accept the worker socket.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use simbridge::transport::{ServerConfig, serve};
use simbridge::{BridgeConfig, SimulatorService, WorkerListener};

/// Log to stderr. `RUST_LOG` wins over `SIMBRIDGE_LOG`; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match std::env::var("SIMBRIDGE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn" | "warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("simbridge={level},tower_http={level}"))
    });

    let output = fmt::layer().with_writer(std::io::stderr);
    let output = if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        output.json().boxed()
    } else {
        output.boxed()
    };

    let _ = tracing_subscriber::registry().with(filter).with(output).try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        socket = %config.socket,
        layout = ?config.wire_layout,
        timeout_ms = config.request_timeout.as_millis() as u64,
        "Starting simbridge"
    );

    let service = Arc::new(SimulatorService::from_config(&config));

    let listener = WorkerListener::bind(config.socket.clone())
        .with_context(|| format!("failed to bind worker socket {}", config.socket))?;
    let accept_loop = service
        .connection()
        .spawn_accept_loop(listener, service.shutdown_rx());

    let result = serve(ServerConfig::from(&config), Arc::clone(&service)).await;

    // serve() can fail before it ever flips the shutdown flag.
    service.trigger_shutdown();
    if let Err(e) = accept_loop.await {
        tracing::warn!(error = %e, "Worker accept loop did not exit cleanly");
    }

    result
}
