//! Correlation bridge - the one operation request handlers need.
//!
//! `invoke` tags a command with a fresh correlation id, parks the caller on a
//! pending entry, sends the command and waits for exactly one of: the
//! matching reply, a disconnect drain, or the timeout. Callers never see ids,
//! sockets or the wire format.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::bridge::codec::{DEFAULT_MAX_FRAME_BYTES, encode_command};
use crate::bridge::protocol::{CommandEnvelope, CommandKind, CorrelationId, WireLayout};
use crate::connection::{ConnectionError, ConnectionManager, WorkerStatus};
use crate::pending::{Completion, PendingError, PendingTable, Resolution};

/// Attempts at drawing an id not already pending before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("No simulator application connected")]
    NoWorkerAttached,
    #[error("Failed to send to simulator application: {0}")]
    SendFailed(String),
    #[error("Simulator application disconnected: {0}")]
    WorkerDisconnected(String),
    #[error("No reply from simulator application within {0:?}")]
    RequestTimedOut(Duration),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    fn from_send(e: ConnectionError, timeout: Duration) -> Self {
        match e {
            ConnectionError::NoWorkerAttached => BridgeError::NoWorkerAttached,
            ConnectionError::SendFailed(msg) => BridgeError::SendFailed(msg),
            ConnectionError::TimedOut => BridgeError::RequestTimedOut(timeout),
        }
    }
}

/// Removes the pending entry when `invoke` ends without a resolution,
/// including when the caller's future is dropped mid-wait.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.table.remove(&self.id) {
            tracing::debug!(request_id = %self.id, "Abandoned pending request");
        }
    }
}

pub struct Bridge {
    pending: Arc<PendingTable>,
    connection: ConnectionManager,
    layout: WireLayout,
}

impl Bridge {
    pub fn new(layout: WireLayout, max_frame_bytes: usize) -> Self {
        let pending = Arc::new(PendingTable::new());
        let connection = ConnectionManager::new(Arc::clone(&pending), max_frame_bytes);
        Self {
            pending,
            connection,
            layout,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.pending.oldest_age()
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.connection.status()
    }

    fn register(&self, kind: CommandKind) -> Result<(CorrelationId, Completion), BridgeError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = CorrelationId::generate();
            match self.pending.register(id.clone(), kind) {
                Ok(completion) => return Ok((id, completion)),
                Err(PendingError::DuplicateCorrelationId(dup)) => {
                    tracing::warn!(request_id = %dup, "Correlation id collision, regenerating");
                }
            }
        }
        Err(BridgeError::Internal(
            "could not allocate a unique correlation id".to_string(),
        ))
    }

    /// Send `kind` with `payload` to the worker and wait for its reply.
    pub async fn invoke(
        &self,
        kind: CommandKind,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        // One budget covers the write and the reply wait.
        let deadline = Instant::now() + timeout;
        let (id, mut completion) = self.register(kind)?;
        let guard = PendingGuard {
            table: &self.pending,
            id: id.clone(),
        };

        let envelope = CommandEnvelope::new(kind, id.clone(), payload);
        let frame = encode_command(&envelope, self.layout).map_err(|e| {
            tracing::error!(request_id = %id, %kind, error = %e, "Failed to encode command");
            BridgeError::Internal(e.to_string())
        })?;

        tracing::debug!(request_id = %id, %kind, "Sending command to worker");
        self.connection
            .send(frame, deadline)
            .await
            .map_err(|e| {
                tracing::warn!(request_id = %id, %kind, error = %e, "Command not sent");
                BridgeError::from_send(e, timeout)
            })?;

        let resolution = match tokio::time::timeout_at(deadline, &mut completion).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Resolution::Disconnected("pending request dropped".to_string()),
            Err(_) => {
                if guard.table.remove(&id) {
                    tracing::warn!(request_id = %id, %kind, ?timeout, "Request timed out");
                    return Err(BridgeError::RequestTimedOut(timeout));
                }
                // Resolved in the same instant the timer fired; the resolution wins.
                match completion.try_recv() {
                    Ok(resolution) => resolution,
                    Err(_) => return Err(BridgeError::RequestTimedOut(timeout)),
                }
            }
        };
        drop(guard);

        match resolution {
            Resolution::Reply(reply) => {
                tracing::debug!(request_id = %id, %kind, "Command completed");
                Ok(Value::Object(reply))
            }
            Resolution::Disconnected(reason) => Err(BridgeError::WorkerDisconnected(reason)),
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(WireLayout::default(), DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::codec::{FrameCodec, Frame, decode_command, encode_reply};
    use crate::bridge::protocol::ReplyEnvelope;
    use futures::{SinkExt, StreamExt};
    use serde_json::{Map, json};
    use tokio::net::UnixStream;
    use tokio_util::codec::Framed;

    type Worker = Framed<UnixStream, FrameCodec>;

    fn attach_worker(bridge: &Bridge) -> Worker {
        let (bridge_side, worker_side) = UnixStream::pair().unwrap();
        bridge.connection().attach(bridge_side);
        Framed::new(worker_side, FrameCodec::new())
    }

    async fn next_command(worker: &mut Worker) -> CommandEnvelope {
        match worker.next().await.unwrap().unwrap() {
            Frame::Data(bytes) => decode_command(&bytes, WireLayout::Nested).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    async fn reply(worker: &mut Worker, id: &CorrelationId, body: Value) {
        let Value::Object(payload) = body else {
            panic!("reply body must be an object");
        };
        let bytes = encode_reply(&ReplyEnvelope::new(id.clone(), payload)).unwrap();
        worker.send(bytes).await.unwrap();
    }

    /// Echo worker: answers every command with `{message: "ok"}`.
    fn spawn_echo_worker(mut worker: Worker) {
        tokio::spawn(async move {
            while let Some(Ok(Frame::Data(bytes))) = worker.next().await {
                let cmd = decode_command(&bytes, WireLayout::Nested).unwrap();
                let mut payload = Map::new();
                payload.insert("message".to_string(), json!("ok"));
                payload.insert("kind".to_string(), json!(cmd.kind().as_str()));
                let bytes = encode_reply(&ReplyEnvelope::new(
                    cmd.correlation_id().clone(),
                    payload,
                ))
                .unwrap();
                if worker.send(bytes).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn no_worker_returns_immediately() {
        let bridge = Bridge::default();
        let started = std::time::Instant::now();
        let err = bridge
            .invoke(
                CommandKind::StartSimulation,
                json!({"iface": "eth0"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NoWorkerAttached));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn echo_reply_is_returned_without_request_id() {
        let bridge = Bridge::default();
        spawn_echo_worker(attach_worker(&bridge));

        let result = bridge
            .invoke(
                CommandKind::StartSimulation,
                json!({"iface": "eth0"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"message": "ok", "kind": "start_simulation"}));
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn payload_is_forwarded_verbatim() {
        let bridge = Bridge::default();
        let mut worker = attach_worker(&bridge);
        let payload = json!({"svInterface": "enp0s31f6", "instances": [{"appId": 1}]});

        let call = bridge.invoke(
            CommandKind::SendGooseMessage,
            payload.clone(),
            Duration::from_secs(5),
        );
        let respond = async {
            let cmd = next_command(&mut worker).await;
            assert_eq!(cmd.kind(), CommandKind::SendGooseMessage);
            assert_eq!(cmd.payload(), &payload);
            reply(&mut worker, cmd.correlation_id(), json!({"error": "bad iface"})).await;
        };
        let (result, ()) = tokio::join!(call, respond);
        assert_eq!(result.unwrap(), json!({"error": "bad iface"}));
    }

    #[tokio::test]
    async fn out_of_order_replies_route_by_id() {
        let bridge = Bridge::default();
        let mut worker = attach_worker(&bridge);
        let timeout = Duration::from_secs(5);

        let call_a = bridge.invoke(CommandKind::StartSimulation, json!({"n": "A"}), timeout);
        let call_b = bridge.invoke(CommandKind::SendGooseMessage, json!({"n": "B"}), timeout);
        let respond = async {
            let first = next_command(&mut worker).await;
            let second = next_command(&mut worker).await;
            // Answer in reverse arrival order.
            for cmd in [&second, &first] {
                let name = cmd.payload()["n"].clone();
                reply(&mut worker, cmd.correlation_id(), json!({"message": name})).await;
            }
        };

        let (a, b, ()) = tokio::join!(call_a, call_b, respond);
        assert_eq!(a.unwrap(), json!({"message": "A"}));
        assert_eq!(b.unwrap(), json!({"message": "B"}));
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn timeout_removes_entry_and_late_reply_is_discarded() {
        let bridge = Bridge::default();
        let mut worker = attach_worker(&bridge);

        let err = bridge
            .invoke(
                CommandKind::StopSimulation,
                Value::Null,
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::RequestTimedOut(_)));
        assert_eq!(bridge.pending_requests(), 0);

        // Late reply for the expired id is dropped and the connection survives.
        let cmd = next_command(&mut worker).await;
        reply(&mut worker, cmd.correlation_id(), json!({"message": "late"})).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bridge.connection().is_attached());
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn disconnect_fails_all_pending_without_timeout() {
        let bridge = Bridge::default();
        let mut worker = attach_worker(&bridge);
        let timeout = Duration::from_secs(30);

        let calls = futures::future::join_all((0..3).map(|_| {
            bridge.invoke(CommandKind::StartSimulation, json!({}), timeout)
        }));
        let disconnect = async {
            for _ in 0..3 {
                next_command(&mut worker).await;
            }
            drop(worker);
        };

        let started = std::time::Instant::now();
        let (results, ()) = tokio::join!(calls, disconnect);
        assert!(started.elapsed() < Duration::from_secs(5));
        for result in results {
            assert!(matches!(result, Err(BridgeError::WorkerDisconnected(_))));
        }
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_releases_entry() {
        let bridge = Bridge::default();
        let mut worker = attach_worker(&bridge);

        let call = bridge.invoke(
            CommandKind::StartSimulation,
            json!({}),
            Duration::from_secs(30),
        );
        tokio::select! {
            _ = call => panic!("no reply was sent"),
            cmd = next_command(&mut worker) => {
                assert_eq!(cmd.kind(), CommandKind::StartSimulation);
            }
        }
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn concurrent_invokes_use_distinct_ids() {
        let bridge = Arc::new(Bridge::default());
        let mut worker = attach_worker(&bridge);
        let n = 50;

        let calls = futures::future::join_all((0..n).map(|i| {
            let bridge = Arc::clone(&bridge);
            async move {
                bridge
                    .invoke(CommandKind::StartSimulation, json!({"i": i}), Duration::from_secs(5))
                    .await
            }
        }));
        let respond = async {
            let mut seen = std::collections::HashSet::new();
            for _ in 0..n {
                let cmd = next_command(&mut worker).await;
                assert!(seen.insert(cmd.correlation_id().clone()));
                let i = cmd.payload()["i"].clone();
                reply(&mut worker, cmd.correlation_id(), json!({"i": i})).await;
            }
        };

        let (results, ()) = tokio::join!(calls, respond);
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!({"i": i}));
        }
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn write_failure_returns_send_failed() {
        let bridge = Bridge::default();
        let (bridge_side, worker_side) = UnixStream::pair().unwrap();
        bridge.connection().attach(bridge_side);
        let worker_side = worker_side.into_std().unwrap();
        worker_side.shutdown(std::net::Shutdown::Read).unwrap();

        let err = bridge
            .invoke(
                CommandKind::StartSimulation,
                json!({"iface": "eth0"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SendFailed(_)), "{err:?}");
        assert!(!bridge.connection().is_attached());
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn worker_that_stops_reading_cannot_outlast_timeout() {
        let bridge = Bridge::default();
        let (bridge_side, _worker_side) = UnixStream::pair().unwrap();
        bridge.connection().attach(bridge_side);
        let timeout = Duration::from_millis(200);
        let blob = "x".repeat(4 * 1024 * 1024);

        let large = bridge.invoke(CommandKind::StartSimulation, json!({"blob": blob}), timeout);
        let small = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bridge
                .invoke(CommandKind::StopSimulation, Value::Null, timeout)
                .await
        };

        let (large, small) = tokio::time::timeout(Duration::from_secs(3), async {
            tokio::join!(large, small)
        })
        .await
        .expect("invoke blocked past its timeout");

        assert!(matches!(large, Err(BridgeError::RequestTimedOut(_))), "{large:?}");
        assert!(
            matches!(
                small,
                Err(BridgeError::RequestTimedOut(_)) | Err(BridgeError::WorkerDisconnected(_))
            ),
            "{small:?}"
        );
        assert_eq!(bridge.pending_requests(), 0);
    }
}
