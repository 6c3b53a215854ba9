//! Platform Transport Primitives
//!
//! Thin, uniform wrappers over the OS socket calls. Everything here returns
//! `io::Result`; the handle and endpoint types translate failures into
//! [`SocketError`](crate::SocketError) at the call site, where the failing step
//! is known.
//!
//! ## Socket creation hook
//!
//! [`set_socket_hook`] replaces descriptor creation for the calling thread.
//! Tests use it to inject creation failures without exhausting descriptors.
//!
//! ## Address resolution
//!
//! [`AddressResolver`] is the seam for name resolution. [`SystemResolver`]
//! calls `getaddrinfo(3)` directly so callers can pass a service string, a
//! socket type and the passive flag, none of which `ToSocketAddrs` exposes.

use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{BorrowedFd, IntoRawFd, RawFd};
use std::ptr;

use entities_networking::{AddressFamily, TransportProtocol};
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};

use crate::error::SocketError;

/// Flags added to every send: suppress SIGPIPE where the OS supports it per call
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const DEFAULT_SEND_FLAGS: i32 = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const DEFAULT_SEND_FLAGS: i32 = 0;

/// Replacement for descriptor creation, see [`set_socket_hook`]
pub type SocketHook = fn(Domain, Type, Option<Protocol>) -> io::Result<Socket>;

thread_local! {
    static SOCKET_HOOK: Cell<Option<SocketHook>> = const { Cell::new(None) };
}

/// Install (or clear, with `None`) the creation hook for the calling thread
///
/// # Returns
///
/// The previously installed hook
pub fn set_socket_hook(hook: Option<SocketHook>) -> Option<SocketHook> {
    SOCKET_HOOK.with(|slot| slot.replace(hook))
}

/// Socket type requested from the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

impl SocketKind {
    fn to_type(self) -> Type {
        match self {
            SocketKind::Stream => Type::STREAM,
            SocketKind::Datagram => Type::DGRAM,
        }
    }

    fn to_raw(self) -> libc::c_int {
        match self {
            SocketKind::Stream => libc::SOCK_STREAM,
            SocketKind::Datagram => libc::SOCK_DGRAM,
        }
    }
}

pub fn domain_for(family: AddressFamily) -> Domain {
    match family {
        AddressFamily::Ipv4 => Domain::IPV4,
        AddressFamily::Ipv6 => Domain::IPV6,
    }
}

/// Create a descriptor, going through the thread's hook when one is set
pub fn create_socket(
    family: AddressFamily,
    kind: SocketKind,
    protocol: TransportProtocol,
) -> io::Result<Socket> {
    let domain = domain_for(family);
    let ty = kind.to_type();
    let protocol = protocol.to_raw().map(Protocol::from);

    let socket = match SOCKET_HOOK.with(Cell::get) {
        Some(hook) => hook(domain, ty, protocol)?,
        None => Socket::new(domain, ty, protocol)?,
    };
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    socket.set_nosigpipe(true)?;
    Ok(socket)
}

/// Parse an IP literal; `None` when `ip` is not one
pub fn parse_literal(ip: &str, port: u16) -> Option<SocketAddr> {
    ip.parse::<IpAddr>().ok().map(|addr| SocketAddr::new(addr, port))
}

pub fn bind(socket: &Socket, addr: SocketAddr) -> io::Result<()> {
    socket.bind(&SockAddr::from(addr))
}

pub fn listen(socket: &Socket, backlog: i32) -> io::Result<()> {
    socket.listen(backlog)
}

pub fn connect(socket: &Socket, addr: SocketAddr) -> io::Result<()> {
    socket.connect(&SockAddr::from(addr))
}

/// Connect failure that only means "still connecting" on a non-blocking descriptor
pub fn is_connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
}

/// Would-block or interrupted
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Accept one connection
///
/// # Returns
///
/// The new descriptor and the peer address when the OS reported an IP one
pub fn accept(socket: &Socket) -> io::Result<(Socket, Option<SocketAddr>)> {
    let (accepted, peer) = socket.accept()?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    accepted.set_nosigpipe(true)?;
    Ok((accepted, peer.as_socket()))
}

pub fn send(socket: &Socket, data: &[u8], flags: i32) -> io::Result<usize> {
    socket.send_with_flags(data, flags | DEFAULT_SEND_FLAGS)
}

pub fn recv(socket: &Socket, buf: &mut [u8], flags: i32) -> io::Result<usize> {
    socket.recv_with_flags(as_uninit(buf), flags)
}

/// Non-destructive, non-blocking read of up to `buf.len()` bytes
pub fn peek(socket: &Socket, buf: &mut [u8]) -> io::Result<usize> {
    socket.recv_with_flags(as_uninit(buf), libc::MSG_PEEK | libc::MSG_DONTWAIT)
}

pub fn send_to(socket: &Socket, data: &[u8], flags: i32, addr: SocketAddr) -> io::Result<usize> {
    socket.send_to_with_flags(data, &SockAddr::from(addr), flags | DEFAULT_SEND_FLAGS)
}

pub fn recv_from(socket: &Socket, buf: &mut [u8], flags: i32) -> io::Result<(usize, SockAddr)> {
    socket.recv_from_with_flags(as_uninit(buf), flags)
}

pub fn shutdown(socket: &Socket, how: Shutdown) -> io::Result<()> {
    socket.shutdown(how)
}

/// Close a descriptor and report what `close(2)` said
///
/// Dropping a `Socket` closes it too, but silently.
pub fn close(socket: Socket) -> io::Result<()> {
    let fd = socket.into_raw_fd();
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Pending error (`SO_ERROR`) on a socket, cleared by the read
pub fn pending_error(socket: &Socket) -> io::Result<Option<io::Error>> {
    socket.take_error()
}

/// Pending error on a descriptor that is not wrapped in a `Socket`
pub fn pending_error_raw(fd: RawFd) -> io::Result<Option<io::Error>> {
    if fd < 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    // SAFETY: the caller owns `fd` and keeps it open across this call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    SockRef::from(&borrowed).take_error()
}

fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: MaybeUninit<u8> has the layout of u8, and the callee only writes
    // initialized bytes into the slice.
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

/// Parameters of one resolution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveQuery {
    /// Host name or literal; empty means "no host" (wildcard or loopback)
    pub host: String,
    /// Service name or decimal port
    pub service: String,
    pub family: AddressFamily,
    pub socket_type: SocketKind,
    pub protocol: TransportProtocol,
    /// Resolve for binding rather than connecting
    pub passive: bool,
}

impl ResolveQuery {
    pub fn new(host: impl Into<String>, port: u16, family: AddressFamily, socket_type: SocketKind) -> Self {
        Self {
            host: host.into(),
            service: port.to_string(),
            family,
            socket_type,
            protocol: TransportProtocol::Default,
            passive: false,
        }
    }

    pub fn with_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    fn failure(&self, reason: impl Into<String>) -> SocketError {
        SocketError::Resolve {
            host: self.host.clone(),
            reason: reason.into(),
        }
    }
}

/// Name resolution collaborator
///
/// Implementations may cache; the handle types never do.
#[cfg_attr(test, mockall::automock)]
pub trait AddressResolver: Send + Sync {
    /// Resolve `query` into one or more addresses, in preference order
    fn resolve(&self, query: &ResolveQuery) -> Result<Vec<SocketAddr>, SocketError>;
}

/// Resolver backed by `getaddrinfo(3)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl AddressResolver for SystemResolver {
    fn resolve(&self, query: &ResolveQuery) -> Result<Vec<SocketAddr>, SocketError> {
        let host = optional_cstring(&query.host).map_err(|_| query.failure("host contains a NUL byte"))?;
        let service =
            optional_cstring(&query.service).map_err(|_| query.failure("service contains a NUL byte"))?;

        // SAFETY: addrinfo is plain data; zero is the documented "no hint" value.
        let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
        hints.ai_family = match query.family {
            AddressFamily::Ipv4 => libc::AF_INET,
            AddressFamily::Ipv6 => libc::AF_INET6,
        };
        hints.ai_socktype = query.socket_type.to_raw();
        hints.ai_protocol = query.protocol.to_raw().unwrap_or(0);
        if query.passive {
            hints.ai_flags = libc::AI_PASSIVE;
        }

        let mut results: *mut libc::addrinfo = ptr::null_mut();
        let rc = unsafe {
            libc::getaddrinfo(
                host.as_ref().map_or(ptr::null(), |h| h.as_ptr()),
                service.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
                &hints,
                &mut results,
            )
        };
        if rc != 0 {
            let reason = if rc == libc::EAI_SYSTEM {
                io::Error::last_os_error().to_string()
            } else {
                unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }
                    .to_string_lossy()
                    .into_owned()
            };
            return Err(query.failure(reason));
        }

        let mut addrs = Vec::new();
        let mut cursor = results;
        while !cursor.is_null() {
            // SAFETY: cursor walks the list getaddrinfo returned, freed below.
            let info = unsafe { &*cursor };
            if let Some(addr) = unsafe { sockaddr_to_std(info.ai_addr, info.ai_addrlen) } {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
            cursor = info.ai_next;
        }
        unsafe { libc::freeaddrinfo(results) };

        if addrs.is_empty() {
            return Err(query.failure("no usable addresses"));
        }
        Ok(addrs)
    }
}

fn optional_cstring(value: &str) -> Result<Option<CString>, std::ffi::NulError> {
    if value.is_empty() {
        Ok(None)
    } else {
        CString::new(value).map(Some)
    }
}

/// # Safety
///
/// `addr` must be null or point to at least `len` readable bytes.
unsafe fn sockaddr_to_std(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<SocketAddr> {
    if addr.is_null() {
        return None;
    }
    let len = len as usize;
    match (*addr).sa_family as libc::c_int {
        libc::AF_INET if len >= mem::size_of::<libc::sockaddr_in>() => {
            let sin = &*(addr as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 if len >= mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = &*(addr as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}
