//! Health status types for the bridge.

use serde::{Deserialize, Serialize};

/// Whether commands can currently reach a simulator worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// No worker attached; every invoke fails fast
    #[default]
    NoWorker,
    /// Worker attached and accepting commands
    Ready,
}

impl Health {
    pub fn from_attached(attached: bool) -> Self {
        if attached { Health::Ready } else { Health::NoWorker }
    }
}
