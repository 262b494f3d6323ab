//! Transport layer for simbridge.
//!
//! Currently provides HTTP transport via axum. The service facade is
//! transport-agnostic, so other front ends can be added as submodules.

pub mod http;

pub use http::{ServerConfig, serve};
