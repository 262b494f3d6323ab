//! SimulatorService: transport-agnostic facade over the correlation bridge.
//!
//! This service owns:
//! - The bridge (pending table + worker connection)
//! - The per-request timeout applied to every command
//! - Shutdown coordination (bidirectional)
//!
//! Transports (HTTP today) call one method per command kind and never see
//! correlation ids or the socket.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::bridge::protocol::CommandKind;
use crate::config::{BridgeConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::connection::{ConnectionManager, SHUTDOWN_REASON, WorkerStatus};
use crate::correlator::{Bridge, BridgeError};
use crate::health::Health;
use crate::version::VersionInfo;

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: Health,
    pub worker: WorkerStatus,
    pub pending_requests: usize,
    pub oldest_pending: Option<Duration>,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == Health::Ready
    }
}

pub struct SimulatorService {
    bridge: Bridge,
    request_timeout: Duration,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl SimulatorService {
    pub fn new(bridge: Bridge) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            bridge,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(Bridge::new(config.wire_layout, config.max_frame_bytes))
            .with_request_timeout(config.request_timeout)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn connection(&self) -> &ConnectionManager {
        self.bridge.connection()
    }

    pub async fn invoke(&self, kind: CommandKind, payload: Value) -> Result<Value, BridgeError> {
        self.bridge.invoke(kind, payload, self.request_timeout).await
    }

    pub async fn start_simulation(&self, config: Value) -> Result<Value, BridgeError> {
        self.invoke(CommandKind::StartSimulation, config).await
    }

    pub async fn stop_simulation(&self) -> Result<Value, BridgeError> {
        self.invoke(CommandKind::StopSimulation, Value::Null).await
    }

    pub async fn pause_simulation(&self) -> Result<Value, BridgeError> {
        self.invoke(CommandKind::PauseSimulation, Value::Null).await
    }

    pub async fn send_goose_message(&self, config: Value) -> Result<Value, BridgeError> {
        self.invoke(CommandKind::SendGooseMessage, config).await
    }

    pub fn health(&self) -> HealthSnapshot {
        let worker = self.bridge.worker_status();
        HealthSnapshot {
            state: Health::from_attached(worker.attached),
            worker,
            pending_requests: self.bridge.pending_requests(),
            oldest_pending: self.bridge.oldest_pending_age(),
            version: self.version.clone(),
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Detach the worker and fail everything still waiting.
    pub fn shutdown(&self) {
        if self.bridge.connection().detach(SHUTDOWN_REASON) {
            tracing::info!("Worker connection closed for shutdown");
        }
    }
}
