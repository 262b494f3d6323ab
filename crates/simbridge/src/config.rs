//! Runtime configuration, read from `SIMBRIDGE_*` environment variables.

use std::time::Duration;

use crate::bridge::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::bridge::protocol::WireLayout;
use crate::bridge::transport::SocketAddress;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/app.sv_simulator";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:4200";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Smallest frame limit accepted; anything lower cannot hold a reply envelope.
const MIN_FRAME_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub socket: SocketAddress,
    pub request_timeout: Duration,
    pub wire_layout: WireLayout,
    pub max_frame_bytes: usize,
    pub cors_origin: String,
    /// If true, ignore SIGTERM and wait for explicit /shutdown or SIGINT.
    pub await_explicit_shutdown: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            socket: SocketAddress::parse(DEFAULT_SOCKET_PATH),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            wire_layout: WireLayout::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            await_explicit_shutdown: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("SIMBRIDGE_HOST") {
            config.host = host.trim().to_string();
        }
        if let Some(port) = get("SIMBRIDGE_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("SIMBRIDGE_PORT", &port, format!("{e}")))?;
        }
        if let Some(socket) = get("SIMBRIDGE_SOCKET") {
            config.socket = SocketAddress::parse(socket.trim());
        }
        if let Some(ms) = get("SIMBRIDGE_REQUEST_TIMEOUT_MS") {
            let millis: u64 = ms.trim().parse().map_err(|e| {
                ConfigError::invalid("SIMBRIDGE_REQUEST_TIMEOUT_MS", &ms, format!("{e}"))
            })?;
            if millis == 0 {
                return Err(ConfigError::invalid(
                    "SIMBRIDGE_REQUEST_TIMEOUT_MS",
                    &ms,
                    "must be greater than zero",
                ));
            }
            config.request_timeout = Duration::from_millis(millis);
        }
        if let Some(layout) = get("SIMBRIDGE_WIRE_LAYOUT") {
            config.wire_layout = WireLayout::parse(layout.trim()).ok_or_else(|| {
                ConfigError::invalid("SIMBRIDGE_WIRE_LAYOUT", &layout, "expected nested or flat")
            })?;
        }
        if let Some(bytes) = get("SIMBRIDGE_MAX_FRAME_BYTES") {
            let max: usize = bytes.trim().parse().map_err(|e| {
                ConfigError::invalid("SIMBRIDGE_MAX_FRAME_BYTES", &bytes, format!("{e}"))
            })?;
            if max < MIN_FRAME_BYTES {
                return Err(ConfigError::invalid(
                    "SIMBRIDGE_MAX_FRAME_BYTES",
                    &bytes,
                    format!("must be at least {MIN_FRAME_BYTES}"),
                ));
            }
            config.max_frame_bytes = max;
        }
        if let Some(origin) = get("SIMBRIDGE_CORS_ORIGIN") {
            config.cors_origin = origin.trim().to_string();
        }
        if let Some(flag) = get("SIMBRIDGE_AWAIT_EXPLICIT_SHUTDOWN") {
            config.await_explicit_shutdown = parse_bool(&flag).ok_or_else(|| {
                ConfigError::invalid(
                    "SIMBRIDGE_AWAIT_EXPLICIT_SHUTDOWN",
                    &flag,
                    "expected true or false",
                )
            })?;
        }

        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_socket(mut self, socket: SocketAddress) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_wire_layout(mut self, layout: WireLayout) -> Self {
        self.wire_layout = layout;
        self
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = origin.into();
        self
    }

    pub fn with_await_explicit_shutdown(mut self, enabled: bool) -> Self {
        self.await_explicit_shutdown = enabled;
        self
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
