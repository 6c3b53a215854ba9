//! Socket error taxonomy
//!
//! One variant per failing step, so callers can tell a bind failure from a
//! listen failure without inspecting errno. OS failures are carried as
//! [`OsError`], which keeps the whole enum `Clone + PartialEq` for the
//! last-error slot.

use std::io;
use std::os::unix::io::RawFd;

use adapters_event_loop::EventLoopError;
use entities_networking::{ConfigError, OsError};

/// Socket error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// Configuration rejected before any descriptor was created
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// A socket option could not be applied
    #[error("failed to configure socket ({step}): {source}")]
    Configuration {
        step: &'static str,
        #[source]
        source: OsError,
    },
    #[error("failed to create socket: {0}")]
    Creation(#[source] OsError),
    /// Address resolution failed or produced nothing usable
    #[error("failed to resolve `{host}`: {reason}")]
    Resolve { host: String, reason: String },
    #[error("bind failed: {0}")]
    Bind(#[source] OsError),
    #[error("listen failed: {0}")]
    Listen(#[source] OsError),
    #[error("connect failed: {0}")]
    Connect(#[source] OsError),
    /// Multicast group membership could not be added
    #[error("multicast join failed: {0}")]
    Join(#[source] OsError),
    #[error("accept failed: {0}")]
    Accept(#[source] OsError),
    #[error("send failed: {0}")]
    Send(#[source] OsError),
    #[error("receive failed: {0}")]
    Receive(#[source] OsError),
    /// The peer performed an orderly shutdown
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("shutdown failed: {0}")]
    Shutdown(#[source] OsError),
    #[error("close failed: {0}")]
    Close(#[source] OsError),
    /// Readiness polling failed
    #[error("poll failed: {0}")]
    Poll(#[source] OsError),
    #[error("socket is already initialized")]
    AlreadyInitialized,
    /// Operation not valid in the handle's current state
    #[error("{operation} is not valid while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    /// No registered child has this descriptor
    #[error("no client with descriptor {0}")]
    ClientNotFound(RawFd),
    /// The child registry could not grow
    #[error("out of memory while registering a client")]
    OutOfMemory,
}

impl SocketError {
    /// Underlying OS error, if the variant carries one
    pub fn os_error(&self) -> Option<&OsError> {
        match self {
            SocketError::Configuration { source, .. } => Some(source),
            SocketError::Creation(e)
            | SocketError::Bind(e)
            | SocketError::Listen(e)
            | SocketError::Connect(e)
            | SocketError::Join(e)
            | SocketError::Accept(e)
            | SocketError::Send(e)
            | SocketError::Receive(e)
            | SocketError::Shutdown(e)
            | SocketError::Close(e)
            | SocketError::Poll(e) => Some(e),
            _ => None,
        }
    }

    /// The operation would have blocked on a non-blocking descriptor
    pub fn is_would_block(&self) -> bool {
        self.os_error()
            .map(|e| e.kind() == io::ErrorKind::WouldBlock)
            .unwrap_or(false)
    }
}

impl From<EventLoopError> for SocketError {
    fn from(err: EventLoopError) -> Self {
        match err {
            EventLoopError::Poll { source, .. } => SocketError::Poll(source),
            EventLoopError::InvalidDescriptor(fd) => {
                SocketError::Poll(OsError::custom(io::ErrorKind::InvalidInput, format!("invalid descriptor {}", fd)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_error_accessor() {
        let err = SocketError::Bind(OsError::from_code(libc::EADDRINUSE));
        assert_eq!(err.os_error().and_then(|e| e.code()), Some(libc::EADDRINUSE));
        assert!(SocketError::PeerClosed.os_error().is_none());
        assert!(SocketError::ClientNotFound(4).os_error().is_none());
    }

    #[test]
    fn test_would_block_detection() {
        let err = SocketError::Receive(OsError::from_code(libc::EAGAIN));
        assert!(err.is_would_block());
        assert!(!SocketError::Receive(OsError::from_code(libc::ECONNRESET)).is_would_block());
        assert!(!SocketError::OutOfMemory.is_would_block());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: SocketError = ConfigError::NegativeBacklog(-1).into();
        assert_eq!(err, SocketError::InvalidConfig(ConfigError::NegativeBacklog(-1)));
        assert!(err.to_string().contains("backlog"));
    }

    #[test]
    fn test_event_loop_error_conversion() {
        let err: SocketError = EventLoopError::InvalidDescriptor(-1).into();
        assert!(matches!(err, SocketError::Poll(_)));
    }
}
