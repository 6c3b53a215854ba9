//! UDP Endpoint
//!
//! Connectionless sibling of [`SocketHandle`](crate::SocketHandle): no child
//! registry and no part in lock-pair ordering. Each operation is a single
//! system call made under the endpoint's lock.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

use entities_networking::{ConfigError, OsError, SocketConfig, SocketRole, TransportProtocol};
use socket2::Socket;
use tracing::{debug, warn};

use crate::error::SocketError;
use crate::handle::join_multicast;
use crate::platform::{self, AddressResolver, ResolveQuery, SocketKind, SystemResolver};

#[derive(Default)]
struct UdpInner {
    socket: Option<Socket>,
    address: Option<SocketAddr>,
}

/// Datagram socket
///
/// Servers bind to the configured address; clients connect to it, which
/// fixes the default destination for [`send_to`](Self::send_to) with `None`.
#[derive(Default)]
pub struct UdpEndpoint {
    inner: Mutex<UdpInner>,
    last_error: Mutex<Option<SocketError>>,
}

impl UdpEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up the endpoint described by `config`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Endpoint is bound (server) or connected (client)
    /// * `Err(SocketError)` - The first step that failed; the partial
    ///   descriptor has been closed
    pub fn initialize(&self, config: &SocketConfig) -> Result<(), SocketError> {
        self.initialize_with_resolver(config, &SystemResolver)
    }

    /// Same as [`initialize`](Self::initialize) with an injected resolver
    pub fn initialize_with_resolver(
        &self,
        config: &SocketConfig,
        resolver: &dyn AddressResolver,
    ) -> Result<(), SocketError> {
        let outcome = self.initialize_inner(config, resolver);
        if let Err(err) = &outcome {
            if *err != SocketError::AlreadyInitialized {
                warn!(role = ?config.role, error = %err, "udp setup failed");
            }
        }
        self.record(outcome)
    }

    fn initialize_inner(&self, config: &SocketConfig, resolver: &dyn AddressResolver) -> Result<(), SocketError> {
        if self.lock().socket.is_some() {
            return Err(SocketError::AlreadyInitialized);
        }
        config.validate()?;
        if config.role == SocketRole::Raw {
            return Err(ConfigError::UnsupportedRole(SocketRole::Raw).into());
        }

        // The descriptor default (TCP) makes no sense for a datagram socket
        let protocol = match config.protocol {
            TransportProtocol::Tcp => TransportProtocol::Udp,
            other => other,
        };
        let socket = platform::create_socket(config.family, SocketKind::Datagram, protocol)
            .map_err(|e| SocketError::Creation(e.into()))?;

        let step = |step: &'static str| move |e: std::io::Error| SocketError::Configuration { step, source: e.into() };
        if config.non_blocking {
            socket.set_nonblocking(true).map_err(step("non-blocking"))?;
        }
        if let Some(timeout) = config.recv_timeout() {
            socket.set_read_timeout(Some(timeout)).map_err(step("receive timeout"))?;
        }
        if let Some(timeout) = config.send_timeout() {
            socket.set_write_timeout(Some(timeout)).map_err(step("send timeout"))?;
        }

        let is_server = config.role == SocketRole::Server;
        let query = ResolveQuery::new(config.ip.clone(), config.port, config.family, SocketKind::Datagram)
            .with_protocol(protocol)
            .with_passive(is_server);
        let address = resolver
            .resolve(&query)?
            .into_iter()
            .find(|addr| config.family.matches(&addr.ip()))
            .ok_or_else(|| SocketError::Resolve {
                host: config.ip.clone(),
                reason: format!("no {:?} address", config.family),
            })?;

        if is_server {
            if config.reuse_address {
                socket.set_reuse_address(true).map_err(step("reuse address"))?;
            }
            platform::bind(&socket, address).map_err(|e| SocketError::Bind(e.into()))?;
            join_multicast(&socket, config)?;
        } else {
            platform::connect(&socket, address).map_err(|e| SocketError::Connect(e.into()))?;
        }

        let mut inner = self.lock();
        if inner.socket.is_some() {
            return Err(SocketError::AlreadyInitialized);
        }
        inner.socket = Some(socket);
        inner.address = Some(address);
        drop(inner);

        debug!(%address, server = is_server, "udp endpoint initialized");
        Ok(())
    }

    /// Send one datagram
    ///
    /// # Arguments
    ///
    /// * `data` - Payload
    /// * `flags` - `send(2)` flags
    /// * `destination` - Target address; `None` uses the connected peer
    pub fn send_to(&self, data: &[u8], flags: i32, destination: Option<SocketAddr>) -> Result<usize, SocketError> {
        let outcome = {
            let inner = self.lock();
            match (&inner.socket, destination) {
                (Some(socket), Some(addr)) => {
                    platform::send_to(socket, data, flags, addr).map_err(|e| SocketError::Send(e.into()))
                }
                (Some(socket), None) => platform::send(socket, data, flags).map_err(|e| SocketError::Send(e.into())),
                (None, _) => Err(not_initialized("send")),
            }
        };
        self.record(outcome)
    }

    /// Receive one datagram and its sender
    pub fn receive_from(&self, buf: &mut [u8], flags: i32) -> Result<(usize, SocketAddr), SocketError> {
        let outcome = {
            let inner = self.lock();
            match &inner.socket {
                Some(socket) => platform::recv_from(socket, buf, flags)
                    .map_err(|e| SocketError::Receive(e.into()))
                    .and_then(|(len, from)| match from.as_socket() {
                        Some(addr) => Ok((len, addr)),
                        None => Err(SocketError::Receive(OsError::custom(
                            std::io::ErrorKind::InvalidData,
                            "sender is not an IP address",
                        ))),
                    }),
                None => Err(not_initialized("receive")),
            }
        };
        self.record(outcome)
    }

    /// Close the descriptor; the endpoint may be initialized again
    pub fn close_socket(&self) -> Result<(), SocketError> {
        let socket = self.lock().socket.take();
        let outcome = match socket {
            Some(socket) => platform::close(socket).map_err(|e| SocketError::Close(e.into())),
            None => Ok(()),
        };
        self.record(outcome)
    }

    /// Resolved address the endpoint was set up with
    pub fn address(&self) -> Option<SocketAddr> {
        self.lock().address
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        let inner = self.lock();
        let socket = inner.socket.as_ref().ok_or_else(|| not_initialized("local_addr"))?;
        socket
            .local_addr()
            .map_err(|e| SocketError::Configuration {
                step: "local address",
                source: e.into(),
            })?
            .as_socket()
            .ok_or_else(|| SocketError::Configuration {
                step: "local address",
                source: OsError::custom(std::io::ErrorKind::InvalidData, "not an IP socket address"),
            })
    }

    pub fn last_error(&self) -> Option<SocketError> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock(&self) -> MutexGuard<'_, UdpInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record<T>(&self, outcome: Result<T, SocketError>) -> Result<T, SocketError> {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = outcome.as_ref().err().cloned();
        outcome
    }
}

impl AsRawFd for UdpEndpoint {
    /// `-1` when the endpoint has no descriptor
    fn as_raw_fd(&self) -> RawFd {
        self.lock().socket.as_ref().map(|socket| socket.as_raw_fd()).unwrap_or(-1)
    }
}

fn not_initialized(operation: &'static str) -> SocketError {
    SocketError::InvalidState {
        operation,
        state: "unbound",
    }
}
