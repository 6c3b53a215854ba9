//! Socket Facades
//!
//! One-call setup helpers. Each returns a ready handle or the error of the
//! step that failed.

use std::fs;
use std::path::Path;

use adapters_socket::{SocketError, SocketHandle, UdpEndpoint};
use entities_networking::{ConfigError, OsError, SocketConfig, SocketRole};
use tracing::debug;

/// Facade errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacadeError {
    /// The configuration file could not be read
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: OsError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Read a TOML socket configuration from `path`
///
/// Missing keys take their defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<SocketConfig, FacadeError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| FacadeError::Read {
        path: path.display().to_string(),
        source: e.into(),
    })?;
    let config = SocketConfig::from_toml_str(&text)?;
    debug!(path = %path.display(), role = ?config.role, "loaded socket configuration");
    Ok(config)
}

/// Listening stream handle for `config`, whatever role it names
pub fn listen(config: &SocketConfig) -> Result<SocketHandle, FacadeError> {
    let config = config.clone().with_role(SocketRole::Server);
    let handle = SocketHandle::new();
    handle.initialize(&config)?;
    Ok(handle)
}

/// Connected stream handle for `ip:port`, other options from `config`
pub fn connect(config: &SocketConfig, ip: &str, port: u16) -> Result<SocketHandle, FacadeError> {
    let config = config
        .clone()
        .with_role(SocketRole::Client)
        .with_ip(ip)
        .with_port(port);
    let handle = SocketHandle::new();
    handle.initialize(&config)?;
    Ok(handle)
}

/// UDP endpoint for `config`
pub fn bind_udp(config: &SocketConfig) -> Result<UdpEndpoint, FacadeError> {
    let endpoint = UdpEndpoint::new();
    endpoint.initialize(config)?;
    Ok(endpoint)
}
