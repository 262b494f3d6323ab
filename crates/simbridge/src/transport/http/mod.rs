//! HTTP transport: axum router and server.

mod routes;
mod server;

pub use routes::{HealthCheckResponse, cors_layer, routes};
pub use server::{ServerConfig, serve};
