//! Event loop errors

use std::os::unix::io::RawFd;

use entities_networking::OsError;

/// Event loop errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventLoopError {
    /// Negative descriptor, or one the backend cannot represent
    #[error("invalid descriptor {0}")]
    InvalidDescriptor(RawFd),
    /// The readiness system call failed
    #[error("{backend} wait failed: {source}")]
    Poll {
        /// Backend that reported the failure
        backend: &'static str,
        #[source]
        source: OsError,
    },
}

impl EventLoopError {
    /// Underlying OS error, if any
    pub fn os_error(&self) -> Option<&OsError> {
        match self {
            EventLoopError::Poll { source, .. } => Some(source),
            EventLoopError::InvalidDescriptor(_) => None,
        }
    }
}
