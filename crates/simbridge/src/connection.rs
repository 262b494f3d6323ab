//! Worker connection manager - owns the single worker socket.
//!
//! State machine:
//! - **Disconnected** (initial): sends fail with `NoWorkerAttached`
//! - **Connected**: one socket, one read loop dispatching replies into the pending table
//!
//! A new inbound connection supersedes the current one: pending requests are
//! drained as disconnected and the old read loop is stopped. Every connection
//! carries a generation number so a close reported by a superseded read loop
//! is a no-op.
//!
//! Lock order is connection state, then pending table. Neither is held across I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{Frame, FrameCodec, decode_reply};
use crate::bridge::transport::WorkerListener;
use crate::pending::PendingTable;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Reason given to callers still waiting when the bridge stops.
pub const SHUTDOWN_REASON: &str = "bridge shutting down";

/// Longest slice of a malformed frame echoed into the log.
const MALFORMED_LOG_PREVIEW: usize = 256;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("no worker attached")]
    NoWorkerAttached,
    #[error("write to worker failed: {0}")]
    SendFailed(String),
    #[error("write to worker did not finish before the deadline")]
    TimedOut,
}

/// Snapshot of the worker connection for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub attached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// When the current worker connected (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
}

type WorkerWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

struct Attached {
    generation: u64,
    connected_at: chrono::DateTime<chrono::Utc>,
    writer: Arc<Mutex<WorkerWriter>>,
    reader: JoinHandle<()>,
}

struct Inner {
    state: StdMutex<Option<Attached>>,
    pending: Arc<PendingTable>,
    max_frame_bytes: usize,
    next_generation: AtomicU64,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, Option<Attached>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Connection state mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Drop the current connection if it matches `generation` (any connection if None)
    /// and fail every pending request. Returns false if nothing was detached.
    fn detach(&self, generation: Option<u64>, reason: &str) -> bool {
        let (previous, drained) = {
            let mut state = self.lock_state();
            let matches = state
                .as_ref()
                .is_some_and(|a| generation.is_none_or(|g| a.generation == g));
            if !matches {
                return false;
            }
            let previous = state.take();
            let drained = self.pending.drain_all(reason);
            (previous, drained)
        };

        if let Some(attached) = previous {
            tracing::info!(
                generation = attached.generation,
                %reason,
                drained,
                "Worker detached"
            );
            attached.reader.abort();
        }
        true
    }

    fn dispatch(&self, generation: u64, frame: &[u8]) {
        match decode_reply(frame) {
            Ok(reply) => {
                let id = reply.correlation_id.clone();
                if !self.pending.resolve(&reply.correlation_id, reply.payload) {
                    tracing::warn!(
                        generation,
                        request_id = %id,
                        "No pending request for reply (expired or unknown id), discarding"
                    );
                }
            }
            Err(e) => {
                let preview_len = frame.len().min(MALFORMED_LOG_PREVIEW);
                tracing::warn!(
                    generation,
                    error = %e,
                    frame = %String::from_utf8_lossy(&frame[..preview_len]),
                    "Discarding malformed reply"
                );
            }
        }
    }
}

async fn run_read_loop(
    inner: Arc<Inner>,
    generation: u64,
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
) {
    let reason = loop {
        match reader.next().await {
            Some(Ok(Frame::Data(bytes))) => inner.dispatch(generation, &bytes),
            Some(Ok(Frame::Overflow { discarded })) => {
                tracing::warn!(
                    generation,
                    discarded,
                    limit = inner.max_frame_bytes,
                    "Discarded oversized frame from worker"
                );
            }
            Some(Err(e)) => {
                tracing::error!(generation, error = %e, "Worker socket error");
                break format!("worker connection error: {}", e);
            }
            None => break "worker disconnected".to_string(),
        }
    };

    inner.detach(Some(generation), &reason);
    tracing::debug!(generation, "Worker read loop exiting");
}

/// Handle to the worker connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(pending: Arc<PendingTable>, max_frame_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: StdMutex::new(None),
                pending,
                max_frame_bytes,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Make `stream` the worker connection, superseding any current one.
    /// Returns the new connection's generation.
    pub fn attach(&self, stream: UnixStream) -> u64 {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (read_half, write_half) = stream.into_split();
        let writer = FramedWrite::new(write_half, FrameCodec::new());
        let reader = FramedRead::new(
            read_half,
            FrameCodec::with_max_frame_bytes(self.inner.max_frame_bytes),
        );

        let (previous, drained) = {
            let mut state = self.inner.lock_state();
            // Spawned under the lock so the read loop cannot report a close
            // before this generation is installed.
            let reader = tokio::spawn(run_read_loop(Arc::clone(&self.inner), generation, reader));
            let previous = state.replace(Attached {
                generation,
                connected_at: chrono::Utc::now(),
                writer: Arc::new(Mutex::new(writer)),
                reader,
            });
            let drained = if previous.is_some() {
                self.inner
                    .pending
                    .drain_all("worker superseded by a new connection")
            } else {
                0
            };
            (previous, drained)
        };

        if let Some(old) = previous {
            tracing::warn!(
                old_generation = old.generation,
                generation,
                drained,
                "New worker connection supersedes the current one"
            );
            old.reader.abort();
        }
        tracing::info!(generation, "Worker attached");
        generation
    }

    /// Write one framed envelope to the worker, giving up at `deadline`.
    ///
    /// A write failure detaches the connection (draining pending requests).
    /// So does a write cut off by the deadline, since a partial frame leaves
    /// the stream unusable.
    pub async fn send(&self, frame: Bytes, deadline: Instant) -> Result<(), ConnectionError> {
        let (generation, writer) = {
            let state = self.inner.lock_state();
            let attached = state.as_ref().ok_or(ConnectionError::NoWorkerAttached)?;
            (attached.generation, Arc::clone(&attached.writer))
        };

        // Another caller's write is stuck; that caller detaches at its own deadline.
        let Ok(mut writer) = tokio::time::timeout_at(deadline, writer.lock()).await else {
            tracing::warn!(generation, "Timed out waiting for the worker writer");
            return Err(ConnectionError::TimedOut);
        };

        match tokio::time::timeout_at(deadline, writer.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                drop(writer);
                tracing::error!(generation, error = %e, "Failed to write to worker");
                let reason = format!("write to worker failed: {}", e);
                self.inner.detach(Some(generation), &reason);
                Err(ConnectionError::SendFailed(e.to_string()))
            }
            Err(_) => {
                drop(writer);
                tracing::error!(generation, "Write to worker timed out, worker is not reading");
                self.inner
                    .detach(Some(generation), "write to worker timed out");
                Err(ConnectionError::TimedOut)
            }
        }
    }

    /// Drop the current worker connection, failing pending requests with `reason`.
    pub fn detach(&self, reason: &str) -> bool {
        self.inner.detach(None, reason)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock_state().is_some()
    }

    pub fn status(&self) -> WorkerStatus {
        match self.inner.lock_state().as_ref() {
            Some(attached) => WorkerStatus {
                attached: true,
                generation: Some(attached.generation),
                connected_at: Some(attached.connected_at.to_rfc3339()),
            },
            None => WorkerStatus {
                attached: false,
                generation: None,
                connected_at: None,
            },
        }
    }

    /// Accept worker connections until shutdown, then detach.
    pub fn spawn_accept_loop(
        &self,
        listener: WorkerListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => {
                            manager.attach(stream);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept worker connection");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    },
                    _ = wait_for_shutdown(&mut shutdown_rx) => break,
                }
            }

            manager.detach(SHUTDOWN_REASON);
            tracing::info!(address = %listener.address(), "Worker accept loop exiting");
        })
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
