//! OS Error Values
//!
//! `io::Error` is neither `Clone` nor `PartialEq`, which makes it awkward to keep
//! in a last-error slot or to compare in tests. [`OsError`] captures the parts
//! callers branch on: the error kind, the raw errno when there is one, and the
//! rendered message.

use std::fmt;
use std::io;

/// Cloneable snapshot of an operating-system error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsError {
    kind: io::ErrorKind,
    code: Option<i32>,
    message: String,
}

impl OsError {
    /// Build an error from a raw errno value
    pub fn from_code(code: i32) -> Self {
        Self::from(io::Error::from_raw_os_error(code))
    }

    /// Build an error that did not originate from errno
    pub fn custom(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Capture the calling thread's current errno
    pub fn last_os_error() -> Self {
        Self::from(io::Error::last_os_error())
    }

    /// Error kind as classified by the standard library
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// Raw errno, if the error came from the OS
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Would-block or interrupted: the only conditions worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        )
    }

    /// Rebuild an `io::Error` carrying the same information
    pub fn to_io_error(&self) -> io::Error {
        match self.code {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(self.kind, self.message.clone()),
        }
    }
}

impl From<io::Error> for OsError {
    fn from(err: io::Error) -> Self {
        Self::from(&err)
    }
}

impl From<&io::Error> for OsError {
    fn from(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OsError {}
