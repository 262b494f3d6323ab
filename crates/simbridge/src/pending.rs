//! Pending-request table: correlation id -> parked caller.
//!
//! Every in-flight `invoke` owns exactly one entry. An entry is removed the
//! moment it resolves (reply, drain or abandonment), so whichever path gets
//! there first wins and the others find nothing to do.
//!
//! All operations take only the table's own lock and never do I/O under it.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::bridge::protocol::{CommandKind, CorrelationId};

/// How a pending request was completed by the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Reply(Map<String, Value>),
    Disconnected(String),
}

/// Caller side of a pending entry.
pub type Completion = oneshot::Receiver<Resolution>;

#[derive(Debug, thiserror::Error)]
pub enum PendingError {
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(CorrelationId),
}

struct PendingRequest {
    kind: CommandKind,
    created_at: Instant,
    completion: oneshot::Sender<Resolution>,
}

#[derive(Default)]
pub struct PendingTable {
    entries: StdMutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table. On poison the map is still structurally sound, so keep using it.
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingRequest>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Pending table mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn register(
        &self,
        id: CorrelationId,
        kind: CommandKind,
    ) -> Result<Completion, PendingError> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(PendingError::DuplicateCorrelationId(id));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id,
            PendingRequest {
                kind,
                created_at: Instant::now(),
                completion: tx,
            },
        );
        Ok(rx)
    }

    /// Complete the entry for `id` with a worker reply.
    ///
    /// Returns false when no such entry exists (late reply after timeout,
    /// disconnect or abandonment); the reply is dropped.
    pub fn resolve(&self, id: &CorrelationId, payload: Map<String, Value>) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            return false;
        };
        tracing::debug!(
            request_id = %id,
            kind = %entry.kind,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "Reply matched pending request"
        );
        if entry.completion.send(Resolution::Reply(payload)).is_err() {
            tracing::debug!(request_id = %id, "Caller went away before reply delivery");
        }
        true
    }

    /// Remove an entry without completing it. Returns false if already gone.
    pub fn remove(&self, id: &CorrelationId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Complete every entry as disconnected. Returns how many were drained.
    pub fn drain_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            tracing::warn!(request_id = %id, kind = %entry.kind, %reason, "Failing pending request");
            let _ = entry.completion.send(Resolution::Disconnected(reason.to_string()));
        }
        count
    }

    #[cfg(test)]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Age of the longest-waiting entry, if any.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.lock()
            .values()
            .map(|entry| entry.created_at.elapsed())
            .max()
    }
}
