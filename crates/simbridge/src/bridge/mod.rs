//! IPC bridge for simulator worker communication.
//!
//! This module provides the wire protocol, codec and socket listener for
//! communication between the bridge (listener) and the simulator worker (client).
//!
//! # Architecture
//!
//! - **protocol**: Envelope types (CommandEnvelope, ReplyEnvelope, CorrelationId)
//! - **codec**: Envelope encode/decode and brace-balanced stream framing
//! - **transport**: Local socket listener (filesystem path or abstract namespace)

pub mod codec;
pub mod protocol;
pub mod transport;
