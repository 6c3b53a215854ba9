//! Socket Configuration Module
//!
//! Provides the configuration descriptor consumed by stream handles and UDP
//! endpoints. The descriptor is plain data: it never touches a descriptor and
//! can be built in code, deserialized with serde, or loaded from TOML.
//!
//! ## Examples
//!
//! ```rust
//! use entities_networking::{SocketConfig, SocketRole};
//!
//! let config = SocketConfig::server(0)
//!     .with_ip("127.0.0.1")
//!     .with_backlog(32)
//!     .with_non_blocking(true);
//! assert_eq!(config.role, SocketRole::Server);
//! assert!(config.validate().is_ok());
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const IPPROTO_TCP: i32 = 6;
const IPPROTO_UDP: i32 = 17;

/// Role a socket plays once initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketRole {
    /// Bind and listen (stream) or bind (datagram)
    Server,
    /// Connect to a remote peer
    Client,
    /// Raw socket; not supported by the stream handle
    Raw,
}

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl AddressFamily {
    /// Whether `addr` belongs to this family
    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        }
    }

    /// Wildcard ("any") address of this family
    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// Transport protocol number passed to socket creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// Let the OS pick the protocol for the socket type
    Default,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// Any other IANA protocol number
    Other(i32),
}

impl TransportProtocol {
    /// Protocol number, or `None` to let the OS choose
    pub fn to_raw(self) -> Option<i32> {
        match self {
            TransportProtocol::Default => None,
            TransportProtocol::Tcp => Some(IPPROTO_TCP),
            TransportProtocol::Udp => Some(IPPROTO_UDP),
            TransportProtocol::Other(number) => Some(number),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Server role with a negative backlog
    #[error("server backlog must be non-negative, got {0}")]
    NegativeBacklog(i32),
    /// Multicast group is not a multicast address of the configured family
    #[error("invalid multicast group `{0}`")]
    InvalidMulticastGroup(String),
    /// Multicast interface could not be parsed for the configured family
    #[error("invalid multicast interface `{0}`")]
    InvalidMulticastInterface(String),
    /// Role not handled by the component being initialized
    #[error("unsupported socket role {0:?}")]
    UnsupportedRole(SocketRole),
    /// Configuration text could not be parsed
    #[error("failed to parse socket configuration: {0}")]
    Parse(String),
}

/// Socket configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Server, client or raw
    pub role: SocketRole,
    /// IPv4 or IPv6
    pub family: AddressFamily,
    /// Address literal or host name; empty means the wildcard address
    pub ip: String,
    /// Port number
    pub port: u16,
    /// Protocol passed to socket creation
    pub protocol: TransportProtocol,
    /// Listen backlog (server role only)
    pub backlog: i32,
    /// Set SO_REUSEADDR before binding
    pub reuse_address: bool,
    /// Put the descriptor in non-blocking mode
    pub non_blocking: bool,
    /// Receive timeout in milliseconds (0 = none)
    pub recv_timeout_ms: u32,
    /// Send timeout in milliseconds (0 = none)
    pub send_timeout_ms: u32,
    /// Multicast group to join; empty disables multicast
    pub multicast_group: String,
    /// Multicast interface (IPv4 literal, or IPv6 interface index); empty = any
    pub multicast_interface: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            role: SocketRole::Server,
            family: AddressFamily::Ipv4,
            ip: "127.0.0.1".to_string(),
            port: 8080,
            protocol: TransportProtocol::Tcp,
            backlog: 10,
            reuse_address: true,
            non_blocking: false,
            recv_timeout_ms: 5000,
            send_timeout_ms: 5000,
            multicast_group: String::new(),
            multicast_interface: String::new(),
        }
    }
}

impl SocketConfig {
    /// Server configuration on the default loopback address
    pub fn server(port: u16) -> Self {
        Self {
            role: SocketRole::Server,
            port,
            ..Self::default()
        }
    }

    /// Client configuration targeting `ip:port`
    pub fn client(ip: impl Into<String>, port: u16) -> Self {
        Self {
            role: SocketRole::Client,
            ip: ip.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML; missing keys take their defaults
    ///
    /// # Examples
    ///
    /// ```rust
    /// use entities_networking::{AddressFamily, SocketConfig};
    ///
    /// let config = SocketConfig::from_toml_str("family = \"ipv6\"\nip = \"::1\"\nport = 9000\n").unwrap();
    /// assert_eq!(config.family, AddressFamily::Ipv6);
    /// assert_eq!(config.backlog, 10);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn with_role(mut self, role: SocketRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    pub fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Set both timeouts at once (0 disables them)
    pub fn with_timeouts(mut self, recv_ms: u32, send_ms: u32) -> Self {
        self.recv_timeout_ms = recv_ms;
        self.send_timeout_ms = send_ms;
        self
    }

    pub fn with_multicast(mut self, group: impl Into<String>, interface: impl Into<String>) -> Self {
        self.multicast_group = group.into();
        self.multicast_interface = interface.into();
        self
    }

    /// Empty address means "bind/connect to the wildcard address"
    pub fn is_wildcard(&self) -> bool {
        self.ip.is_empty()
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.send_timeout_ms)
    }

    pub fn multicast_enabled(&self) -> bool {
        !self.multicast_group.is_empty()
    }

    /// Parsed multicast group, or `None` when multicast is disabled
    pub fn multicast_group_addr(&self) -> Result<Option<IpAddr>, ConfigError> {
        if !self.multicast_enabled() {
            return Ok(None);
        }
        let group: IpAddr = self
            .multicast_group
            .parse()
            .map_err(|_| ConfigError::InvalidMulticastGroup(self.multicast_group.clone()))?;
        if !self.family.matches(&group) || !group.is_multicast() {
            return Err(ConfigError::InvalidMulticastGroup(self.multicast_group.clone()));
        }
        Ok(Some(group))
    }

    /// IPv4 interface address for multicast membership (empty = any)
    pub fn multicast_interface_v4(&self) -> Result<Ipv4Addr, ConfigError> {
        if self.multicast_interface.is_empty() {
            return Ok(Ipv4Addr::UNSPECIFIED);
        }
        self.multicast_interface
            .parse()
            .map_err(|_| ConfigError::InvalidMulticastInterface(self.multicast_interface.clone()))
    }

    /// IPv6 interface index for multicast membership (empty = 0, any)
    pub fn multicast_interface_v6(&self) -> Result<u32, ConfigError> {
        if self.multicast_interface.is_empty() {
            return Ok(0);
        }
        self.multicast_interface
            .parse()
            .map_err(|_| ConfigError::InvalidMulticastInterface(self.multicast_interface.clone()))
    }

    /// Check the invariants that do not require touching the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role == SocketRole::Server && self.backlog < 0 {
            return Err(ConfigError::NegativeBacklog(self.backlog));
        }
        if self.multicast_group_addr()?.is_some() {
            match self.family {
                AddressFamily::Ipv4 => {
                    self.multicast_interface_v4()?;
                }
                AddressFamily::Ipv6 => {
                    self.multicast_interface_v6()?;
                }
            }
        }
        Ok(())
    }
}

fn timeout_from_ms(ms: u32) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(u64::from(ms)))
    }
}
