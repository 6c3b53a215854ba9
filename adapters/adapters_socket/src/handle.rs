//! Socket Handle
//!
//! A thread-safe, connection-owning stream socket. A handle owns one
//! descriptor (or none), the address it was set up with, and, when it is a
//! server, a registry of accepted child handles.
//!
//! ## Locking
//!
//! - `state` guards the descriptor, address, status and registry. It is never
//!   held across a blocking system call: operations clone the shared socket out
//!   of it and release it first.
//! - `send_lock` serializes writers so two `send_all` calls never interleave
//!   their bytes; readers do not take it.
//! - `last_error` is its own lock so recording an outcome never waits on I/O.
//!
//! A parent's lock covers registry membership only. Each child has its own
//! locks, and moves between handles go through [`lock_pair`].
//!
//! ## State machine
//!
//! `Unbound -> Listening | Connected -> Closed -> (initialize)`. A failed
//! `initialize` leaves `Failed`, which requires
//! [`SocketHandle::reset_to_empty_state`] before the next attempt.

use std::fmt;
use std::mem;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use entities_networking::{ConfigError, OsError, SocketConfig, SocketRole};
use socket2::Socket;
use tracing::{debug, warn};

use crate::error::SocketError;
use crate::liveness;
use crate::lock_order::{lock_pair, LockedPair, OrderedMutex};
use crate::platform::{self, AddressResolver, ResolveQuery, SocketKind, SystemResolver};

/// Pause before retrying a send that would have blocked
const SEND_BACKOFF: Duration = Duration::from_millis(1);

/// Lifecycle state of a [`SocketHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandleState {
    /// No descriptor; ready for `initialize`
    #[default]
    Unbound,
    Listening,
    Connected,
    /// Descriptor closed; may be initialized again
    Closed,
    /// Last `initialize` failed; reset before retrying
    Failed,
}

impl HandleState {
    /// Lowercase name, as used in logs and `InvalidState` errors
    pub fn as_str(self) -> &'static str {
        match self {
            HandleState::Unbound => "unbound",
            HandleState::Listening => "listening",
            HandleState::Connected => "connected",
            HandleState::Closed => "closed",
            HandleState::Failed => "failed",
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`SocketHandle::broadcast_data`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Bytes accepted across all children that were sent to
    pub bytes_sent: usize,
    /// Accept-time descriptors of the children whose send failed
    pub failed: Vec<RawFd>,
}

impl BroadcastOutcome {
    /// Every targeted child accepted the data
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry entry; `fd` is the descriptor at accept time and stays the key
/// even if the child is closed in place
struct Client {
    fd: RawFd,
    handle: SocketHandle,
}

#[derive(Default)]
struct HandleInner {
    socket: Option<Arc<Socket>>,
    address: Option<SocketAddr>,
    status: HandleState,
    children: Vec<Client>,
}

/// Thread-safe stream socket with an optional child registry
pub struct SocketHandle {
    state: OrderedMutex<HandleInner>,
    send_lock: Mutex<()>,
    last_error: Mutex<Option<SocketError>>,
}

impl SocketHandle {
    /// Create an unbound handle
    pub fn new() -> Self {
        Self {
            state: OrderedMutex::default(),
            send_lock: Mutex::new(()),
            last_error: Mutex::new(None),
        }
    }

    fn from_accepted(socket: Socket, peer: Option<SocketAddr>) -> Self {
        let handle = Self::new();
        {
            let mut inner = handle.state.lock();
            inner.socket = Some(Arc::new(socket));
            inner.address = peer;
            inner.status = HandleState::Connected;
        }
        handle
    }

    /// Move-construct: a new handle that takes everything `source` owns
    ///
    /// `source` is left unbound.
    pub fn take(source: &SocketHandle) -> Self {
        let handle = Self::new();
        handle.take_from(source);
        handle
    }

    /// Process-unique identity used for lock ordering
    pub fn id(&self) -> u64 {
        self.state.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> HandleState {
        self.state.lock().status
    }

    /// Bound address (servers), peer address (clients and accepted children)
    pub fn address(&self) -> Option<SocketAddr> {
        self.state.lock().address
    }

    /// Address the OS assigned to the descriptor
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        let socket = self.current_socket("local_addr")?;
        let addr = socket.local_addr().map_err(|e| SocketError::Configuration {
            step: "local address",
            source: e.into(),
        })?;
        addr.as_socket().ok_or_else(|| SocketError::Configuration {
            step: "local address",
            source: OsError::custom(std::io::ErrorKind::InvalidData, "not an IP socket address"),
        })
    }

    /// Outcome of the most recent operation, `None` if it succeeded
    pub fn last_error(&self) -> Option<SocketError> {
        lock_recover(&self.last_error).clone()
    }

    /// Set up the descriptor described by `config`, resolving names with the
    /// system resolver
    ///
    /// # Arguments
    ///
    /// * `config` - Role, address and socket options
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Handle is listening (server) or connected (client)
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
            if !matches!(err, SocketError::AlreadyInitialized | SocketError::InvalidState { .. }) {
                let mut inner = self.state.lock();
                if !matches!(inner.status, HandleState::Listening | HandleState::Connected) {
                    inner.status = HandleState::Failed;
                }
                drop(inner);
                warn!(id = self.id(), role = ?config.role, error = %err, "socket setup failed");
            }
        }
        self.record(outcome)
    }

    fn initialize_inner(&self, config: &SocketConfig, resolver: &dyn AddressResolver) -> Result<(), SocketError> {
        match self.state() {
            HandleState::Listening | HandleState::Connected => return Err(SocketError::AlreadyInitialized),
            HandleState::Failed => {
                return Err(SocketError::InvalidState {
                    operation: "initialize",
                    state: HandleState::Failed.as_str(),
                })
            }
            HandleState::Unbound | HandleState::Closed => {}
        }

        config.validate()?;
        if config.role == SocketRole::Raw {
            return Err(ConfigError::UnsupportedRole(SocketRole::Raw).into());
        }

        // Dropping `socket` on any early return closes the partial descriptor
        let socket = platform::create_socket(config.family, SocketKind::Stream, config.protocol)
            .map_err(|e| SocketError::Creation(e.into()))?;
        apply_options(&socket, config)?;

        let address = resolve_stream_address(config, resolver)?;
        let status = match config.role {
            SocketRole::Server => {
                platform::bind(&socket, address).map_err(|e| SocketError::Bind(e.into()))?;
                platform::listen(&socket, config.backlog).map_err(|e| SocketError::Listen(e.into()))?;
                HandleState::Listening
            }
            _ => {
                match platform::connect(&socket, address) {
                    Ok(()) => {}
                    Err(e) if config.non_blocking && platform::is_connect_in_progress(&e) => {}
                    Err(e) => return Err(SocketError::Connect(e.into())),
                }
                HandleState::Connected
            }
        };
        join_multicast(&socket, config)?;

        let mut inner = self.state.lock();
        if matches!(inner.status, HandleState::Listening | HandleState::Connected) {
            return Err(SocketError::AlreadyInitialized);
        }
        inner.socket = Some(Arc::new(socket));
        inner.address = Some(address);
        inner.status = status;
        drop(inner);

        debug!(id = self.id(), %address, state = %status, "socket initialized");
        Ok(())
    }

    /// Accept one pending connection into the child registry
    ///
    /// # Returns
    ///
    /// * `Ok(RawFd)` - Descriptor of the new child
    /// * `Err(SocketError::OutOfMemory)` - The registry could not grow; the
    ///   accepted descriptor was closed
    /// * `Err(SocketError)` - Not listening, or accept failed
    pub fn accept_connection(&self) -> Result<RawFd, SocketError> {
        let outcome = self.accept_inner();
        self.record(outcome)
    }

    fn accept_inner(&self) -> Result<RawFd, SocketError> {
        let listener = self.socket_in(HandleState::Listening, "accept")?;
        let (socket, peer) = platform::accept(&listener).map_err(|e| SocketError::Accept(e.into()))?;
        let fd = socket.as_raw_fd();
        let child = SocketHandle::from_accepted(socket, peer);

        let mut inner = self.state.lock();
        if inner.status != HandleState::Listening {
            let state = inner.status.as_str();
            drop(inner);
            drop(child);
            return Err(SocketError::InvalidState {
                operation: "accept",
                state,
            });
        }
        if registry_growth_blocked() || inner.children.try_reserve(1).is_err() {
            drop(inner);
            drop(child);
            warn!(id = self.id(), fd, "client registry full, connection dropped");
            return Err(SocketError::OutOfMemory);
        }
        // The kernel just handed out `fd`, so an entry still keyed by it
        // belongs to a child that was closed in place
        let stale = evict_child(&mut inner.children, fd);
        inner.children.push(Client { fd, handle: child });
        let clients = inner.children.len();
        drop(inner);

        drop(stale);
        debug!(id = self.id(), fd, ?peer, clients, "client accepted");
        Ok(fd)
    }

    /// One send call on a connected handle
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes to send; a short write is not retried
    /// * `flags` - `send(2)` flags, combined with the platform defaults
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Bytes the kernel accepted
    /// * `Err(SocketError::InvalidState)` - The handle is not connected
    /// * `Err(SocketError::Send)` - The send call failed, including would-block
    pub fn send_data(&self, data: &[u8], flags: i32) -> Result<usize, SocketError> {
        let outcome = self.socket_in(HandleState::Connected, "send").and_then(|socket| {
            let _writer = lock_recover(&self.send_lock);
            platform::send(&socket, data, flags).map_err(|e| SocketError::Send(e.into()))
        });
        self.record(outcome)
    }

    /// Send every byte of `data`
    ///
    /// Would-block and interrupted sends back off briefly, check that the
    /// peer is still there and retry. The liveness check runs once more after
    /// the last byte is accepted.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Always `data.len()`
    /// * `Err(SocketError::PeerClosed)` - The peer shut the connection down
    /// * `Err(SocketError)` - A send or liveness failure
    pub fn send_all(&self, data: &[u8], flags: i32) -> Result<usize, SocketError> {
        let outcome = self
            .socket_in(HandleState::Connected, "send")
            .and_then(|socket| {
                let _writer = lock_recover(&self.send_lock);
                send_all_on(&socket, data, flags)
            });
        self.record(outcome)
    }

    /// One receive call; `Ok(0)` means the peer shut down its side
    ///
    /// # Arguments
    ///
    /// * `buf` - Destination; at most `buf.len()` bytes are written
    /// * `flags` - `recv(2)` flags
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Bytes received
    /// * `Err(SocketError::Receive)` - The call failed or timed out
    ///
    /// The handle lock is released before the call, so a blocked receive never
    /// blocks senders or accessors.
    pub fn receive_data(&self, buf: &mut [u8], flags: i32) -> Result<usize, SocketError> {
        let outcome = self
            .socket_in(HandleState::Connected, "receive")
            .and_then(|socket| platform::recv(&socket, buf, flags).map_err(|e| SocketError::Receive(e.into())));
        self.record(outcome)
    }

    /// Send to one registered child
    ///
    /// # Arguments
    ///
    /// * `fd` - Descriptor returned by [`accept_connection`](Self::accept_connection)
    /// * `data` - Bytes for one send call
    /// * `flags` - `send(2)` flags
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Bytes the child's send accepted
    /// * `Err(SocketError::ClientNotFound)` - No child is registered under `fd`
    /// * `Err(SocketError)` - The child's send failed
    pub fn send_data_to_client(&self, fd: RawFd, data: &[u8], flags: i32) -> Result<usize, SocketError> {
        let outcome = {
            let inner = self.state.lock();
            match find_child(&inner.children, fd) {
                Some(index) => inner.children[index].handle.send_data(data, flags),
                None => Err(SocketError::ClientNotFound(fd)),
            }
        };
        self.record(outcome)
    }

    /// Send `data` to every child except `exclude_fd`
    ///
    /// Best effort: a failing child does not stop the others. The outcome
    /// lists the children that failed; the last child error is also recorded
    /// in this handle's last-error slot.
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes for one send call per child
    /// * `flags` - `send(2)` flags
    /// * `exclude_fd` - Child to skip, typically the sender of the message
    ///
    /// # Returns
    ///
    /// `Ok(BroadcastOutcome)` with the byte total and the registry keys of the
    /// children whose send failed
    pub fn broadcast_data(
        &self,
        data: &[u8],
        flags: i32,
        exclude_fd: Option<RawFd>,
    ) -> Result<BroadcastOutcome, SocketError> {
        let mut outcome = BroadcastOutcome::default();
        let mut last_failure = None;
        {
            let inner = self.state.lock();
            for client in &inner.children {
                if Some(client.fd) == exclude_fd {
                    continue;
                }
                match client.handle.send_data(data, flags) {
                    Ok(sent) => outcome.bytes_sent += sent,
                    Err(err) => {
                        outcome.failed.push(client.fd);
                        last_failure = Some(err);
                    }
                }
            }
        }

        if !outcome.is_complete() {
            warn!(id = self.id(), failed = ?outcome.failed, "broadcast partially failed");
        }
        *lock_recover(&self.last_error) = last_failure;
        Ok(outcome)
    }

    /// Detach and close one child
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The child was removed and closed
    /// * `Err(SocketError::ClientNotFound)` - No child is registered under `fd`
    /// * `Err(SocketError)` - Removed, but its close failed
    pub fn disconnect_client(&self, fd: RawFd) -> Result<(), SocketError> {
        let outcome = self.detach_child(fd).and_then(|child| {
            debug!(id = self.id(), fd, "client disconnected");
            child.close_socket()
        });
        self.record(outcome)
    }

    /// Detach the whole registry, then close every child outside the lock
    ///
    /// # Returns
    ///
    /// Number of children detached; the first close failure, if any, after
    /// every child has been closed
    pub fn disconnect_all_clients(&self) -> Result<usize, SocketError> {
        let children = mem::take(&mut self.state.lock().children);
        let count = children.len();
        let mut first_failure = None;
        for client in children {
            if let Err(err) = client.handle.close_socket() {
                first_failure.get_or_insert(err);
            }
        }
        debug!(id = self.id(), count, "all clients disconnected");
        let outcome = match first_failure {
            Some(err) => Err(err),
            None => Ok(count),
        };
        self.record(outcome)
    }

    /// Number of registered children, including ones closed in place
    pub fn client_count(&self) -> usize {
        self.state.lock().children.len()
    }

    /// A child is registered under `fd`
    ///
    /// # Arguments
    ///
    /// * `fd` - Descriptor returned by [`accept_connection`](Self::accept_connection)
    pub fn is_client_connected(&self, fd: RawFd) -> bool {
        find_child(&self.state.lock().children, fd).is_some()
    }

    /// Run `f` on one child while the registry is locked
    ///
    /// `f` must not call back into this handle.
    ///
    /// # Returns
    ///
    /// * `Ok(R)` - What `f` returned
    /// * `Err(SocketError::ClientNotFound)` - No child is registered under `fd`
    pub fn with_client<R>(&self, fd: RawFd, f: impl FnOnce(&SocketHandle) -> R) -> Result<R, SocketError> {
        let inner = self.state.lock();
        match find_child(&inner.children, fd) {
            Some(index) => Ok(f(&inner.children[index].handle)),
            None => Err(SocketError::ClientNotFound(fd)),
        }
    }

    /// Remove one child from the registry and hand it to the caller
    ///
    /// The child keeps its descriptor open; the caller owns it from here.
    pub fn take_client(&self, fd: RawFd) -> Result<SocketHandle, SocketError> {
        let outcome = self.detach_child(fd);
        self.record(outcome)
    }

    /// Shut the descriptor down in both directions and close it
    ///
    /// The handle ends up `Closed` with no descriptor even when shutdown
    /// fails; a shutdown failure is still reported. Closing a handle without
    /// a descriptor succeeds.
    pub fn close_socket(&self) -> Result<(), SocketError> {
        let socket = {
            let mut inner = self.state.lock();
            let socket = inner.socket.take();
            if socket.is_some() {
                inner.status = HandleState::Closed;
            }
            socket
        };
        let outcome = match socket {
            Some(socket) => {
                let outcome = shutdown_and_close(socket);
                debug!(id = self.id(), ok = outcome.is_ok(), "socket closed");
                outcome
            }
            None => Ok(()),
        };
        self.record(outcome)
    }

    /// Close children and descriptor, forget the address, return to `Unbound`
    pub fn reset_to_empty_state(&self) -> Result<(), SocketError> {
        let previous = mem::take(&mut *self.state.lock());
        drop(previous.children);
        let outcome = match previous.socket {
            Some(socket) => close_only(socket),
            None => Ok(()),
        };
        self.record(outcome)
    }

    /// Move-assign: take everything `source` owns, leaving it unbound
    ///
    /// What `self` owned before is closed after both locks are released.
    /// Moving a handle into itself does nothing.
    pub fn take_from(&self, source: &SocketHandle) {
        let previous = match lock_pair(&self.state, &source.state) {
            LockedPair::Same(_) => return,
            LockedPair::Distinct { mut first, mut second } => {
                let moved = mem::take(&mut *second);
                mem::replace(&mut *first, moved)
            }
        };
        drop(previous);
        *lock_recover(&self.last_error) = None;
    }

    fn detach_child(&self, fd: RawFd) -> Result<SocketHandle, SocketError> {
        let mut inner = self.state.lock();
        match find_child(&inner.children, fd) {
            Some(index) => Ok(inner.children.remove(index).handle),
            None => Err(SocketError::ClientNotFound(fd)),
        }
    }

    fn current_socket(&self, operation: &'static str) -> Result<Arc<Socket>, SocketError> {
        let inner = self.state.lock();
        inner.socket.clone().ok_or(SocketError::InvalidState {
            operation,
            state: inner.status.as_str(),
        })
    }

    fn socket_in(&self, expected: HandleState, operation: &'static str) -> Result<Arc<Socket>, SocketError> {
        let inner = self.state.lock();
        match &inner.socket {
            Some(socket) if inner.status == expected => Ok(Arc::clone(socket)),
            _ => Err(SocketError::InvalidState {
                operation,
                state: inner.status.as_str(),
            }),
        }
    }

    fn record<T>(&self, outcome: Result<T, SocketError>) -> Result<T, SocketError> {
        *lock_recover(&self.last_error) = outcome.as_ref().err().cloned();
        outcome
    }
}

impl Default for SocketHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRawFd for SocketHandle {
    /// `-1` when the handle has no descriptor
    fn as_raw_fd(&self) -> RawFd {
        self.state
            .lock()
            .socket
            .as_ref()
            .map(|socket| socket.as_raw_fd())
            .unwrap_or(-1)
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.state.lock();
        f.debug_struct("SocketHandle")
            .field("id", &self.state.id())
            .field("fd", &inner.socket.as_ref().map(|socket| socket.as_raw_fd()))
            .field("address", &inner.address)
            .field("state", &inner.status)
            .field("clients", &inner.children.len())
            .finish()
    }
}

fn apply_options(socket: &Socket, config: &SocketConfig) -> Result<(), SocketError> {
    let step = |step: &'static str| move |e: std::io::Error| SocketError::Configuration { step, source: e.into() };

    if config.role == SocketRole::Server && config.reuse_address {
        socket.set_reuse_address(true).map_err(step("reuse address"))?;
    }
    if config.non_blocking {
        socket.set_nonblocking(true).map_err(step("non-blocking"))?;
    }
    if let Some(timeout) = config.recv_timeout() {
        socket.set_read_timeout(Some(timeout)).map_err(step("receive timeout"))?;
    }
    if let Some(timeout) = config.send_timeout() {
        socket.set_write_timeout(Some(timeout)).map_err(step("send timeout"))?;
    }
    Ok(())
}

/// Empty IP is the wildcard; literals are parsed directly; anything else goes
/// through the resolver
fn resolve_stream_address(config: &SocketConfig, resolver: &dyn AddressResolver) -> Result<SocketAddr, SocketError> {
    if config.is_wildcard() {
        return Ok(SocketAddr::new(config.family.unspecified(), config.port));
    }
    let mismatch = || SocketError::Resolve {
        host: config.ip.clone(),
        reason: format!("no {:?} address", config.family),
    };
    if let Some(addr) = platform::parse_literal(&config.ip, config.port) {
        return if config.family.matches(&addr.ip()) {
            Ok(addr)
        } else {
            Err(mismatch())
        };
    }

    let query = ResolveQuery::new(config.ip.clone(), config.port, config.family, SocketKind::Stream)
        .with_protocol(config.protocol)
        .with_passive(config.role == SocketRole::Server);
    resolver
        .resolve(&query)?
        .into_iter()
        .find(|addr| config.family.matches(&addr.ip()))
        .ok_or_else(mismatch)
}

pub(crate) fn join_multicast(socket: &Socket, config: &SocketConfig) -> Result<(), SocketError> {
    let group = match config.multicast_group_addr()? {
        Some(group) => group,
        None => return Ok(()),
    };
    let joined = match group {
        std::net::IpAddr::V4(group) => socket.join_multicast_v4(&group, &config.multicast_interface_v4()?),
        std::net::IpAddr::V6(group) => socket.join_multicast_v6(&group, config.multicast_interface_v6()?),
    };
    joined.map_err(|e| SocketError::Join(e.into()))?;
    debug!(%group, interface = %config.multicast_interface, "joined multicast group");
    Ok(())
}

fn send_all_on(socket: &Socket, data: &[u8], flags: i32) -> Result<usize, SocketError> {
    let mut sent = 0;
    while sent < data.len() {
        match platform::send(socket, &data[sent..], flags) {
            Ok(0) => {
                liveness::verify_peer_alive(socket)?;
                return Err(SocketError::PeerClosed);
            }
            Ok(n) => sent += n,
            Err(e) if platform::is_transient(&e) => {
                thread::sleep(SEND_BACKOFF);
                liveness::verify_peer_alive(socket)?;
            }
            Err(e) => return Err(SocketError::Send(e.into())),
        }
    }
    liveness::verify_peer_alive(socket)?;
    Ok(sent)
}

/// Shutdown then close; `NotConnected` from shutdown is expected for
/// listeners and half-open connections
fn shutdown_and_close(socket: Arc<Socket>) -> Result<(), SocketError> {
    let shutdown = match platform::shutdown(&socket, Shutdown::Both) {
        Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Some(SocketError::Shutdown(e.into())),
        _ => None,
    };
    let closed = close_only(socket);
    match shutdown {
        Some(err) => Err(err),
        None => closed,
    }
}

/// Close now if this is the last reference; otherwise the descriptor closes
/// when the in-flight operation holding the other reference finishes
fn close_only(socket: Arc<Socket>) -> Result<(), SocketError> {
    match Arc::try_unwrap(socket) {
        Ok(socket) => platform::close(socket).map_err(|e| SocketError::Close(e.into())),
        Err(_shared) => Ok(()),
    }
}

fn find_child(children: &[Client], fd: RawFd) -> Option<usize> {
    if fd < 0 {
        return None;
    }
    children.iter().position(|client| client.fd == fd)
}

/// Remove the entry keyed by `fd`, if any; the caller drops it outside the lock
fn evict_child(children: &mut Vec<Client>, fd: RawFd) -> Option<Client> {
    find_child(children, fd).map(|index| children.remove(index))
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
thread_local! {
    static FAIL_REGISTRY_GROWTH: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[cfg(test)]
fn registry_growth_blocked() -> bool {
    FAIL_REGISTRY_GROWTH.with(|flag| flag.get())
}

#[cfg(not(test))]
fn registry_growth_blocked() -> bool {
    false
}
