//! Version information for simbridge.

/// simbridge version from Cargo.toml
pub const SIMBRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported on `/health-check`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Bridge version.
    pub simbridge: &'static str,
    /// Simulator worker version, when the deployment reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulator: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            simbridge: SIMBRIDGE_VERSION,
            simulator: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_simulator(mut self, version: String) -> Self {
        self.simulator = Some(version);
        self
    }
}
