//! Worker socket listener.
//!
//! Platform-specific addressing:
//! - **Path**: filesystem socket (macOS, Linux, BSD); stale files are removed before bind
//! - **Abstract**: Linux abstract namespace (`@name`), no filesystem entry, auto-cleanup

use std::io;
use std::path::PathBuf;

use tokio::net::{UnixListener, UnixStream};

/// Where the worker dials in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    Path(PathBuf),
    #[cfg(target_os = "linux")]
    Abstract(String),
}

impl SocketAddress {
    /// `@name` selects the abstract namespace on Linux; anything else is a path.
    pub fn parse(s: &str) -> Self {
        #[cfg(target_os = "linux")]
        if let Some(name) = s.strip_prefix('@') {
            return Self::Abstract(name.to_string());
        }
        Self::Path(PathBuf::from(s))
    }
}

impl std::fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            #[cfg(target_os = "linux")]
            Self::Abstract(name) => write!(f, "@{}", name),
        }
    }
}

/// Bound listener for the single worker connection.
pub struct WorkerListener {
    address: SocketAddress,
    listener: UnixListener,
}

impl WorkerListener {
    pub fn bind(address: SocketAddress) -> io::Result<Self> {
        let listener = match &address {
            SocketAddress::Path(path) => {
                if path.exists() {
                    tracing::debug!(path = %path.display(), "Removing stale socket file");
                    std::fs::remove_file(path)?;
                }
                UnixListener::bind(path)?
            }
            #[cfg(target_os = "linux")]
            SocketAddress::Abstract(name) => {
                use std::os::linux::net::SocketAddrExt;
                use std::os::unix::net::{SocketAddr, UnixListener as StdUnixListener};

                let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
                let std_listener = StdUnixListener::bind_addr(&addr)?;
                std_listener.set_nonblocking(true)?;
                UnixListener::from_std(std_listener)?
            }
        };

        tracing::info!(address = %address, "Worker socket listening");
        Ok(Self { address, listener })
    }

    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }
}

impl Drop for WorkerListener {
    fn drop(&mut self) {
        if let SocketAddress::Path(path) = &self.address
            && path.exists()
            && let Err(e) = std::fs::remove_file(path)
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

/// Dial the bridge from the worker side.
pub async fn connect(address: &SocketAddress) -> io::Result<UnixStream> {
    match address {
        SocketAddress::Path(path) => UnixStream::connect(path).await,
        #[cfg(target_os = "linux")]
        SocketAddress::Abstract(name) => {
            use std::os::linux::net::SocketAddrExt;
            use std::os::unix::net::SocketAddr;

            // tokio doesn't support abstract sockets directly
            let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
            let std_stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
            std_stream.set_nonblocking(true)?;
            UnixStream::from_std(std_stream)
        }
    }
}
