//! simbridge: HTTP to local-socket correlation bridge for the network simulator.

mod health;
mod version;

pub mod bridge;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod pending;
pub mod service;
pub mod transport;
pub mod validation;

pub use bridge::protocol::{CommandKind, CorrelationId, WireLayout};
pub use bridge::transport::{SocketAddress, WorkerListener};
pub use config::{BridgeConfig, ConfigError};
pub use connection::{ConnectionError, ConnectionManager, WorkerStatus};
pub use correlator::{Bridge, BridgeError};
pub use health::Health;
pub use pending::{PendingError, PendingTable, Resolution};
pub use service::{HealthSnapshot, SimulatorService};
pub use version::{SIMBRIDGE_VERSION, VersionInfo};
