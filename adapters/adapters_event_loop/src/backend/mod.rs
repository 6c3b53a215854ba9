//! Readiness Backends
//!
//! Every backend answers the same question: which of these descriptors are
//! readable or writable within `timeout_ms`? The platform backend is fixed at
//! build time through [`PlatformBackend`]; the portable select backend is always
//! compiled so callers can opt into it explicitly.
//!
//! Timeout convention shared by all backends: `0` polls and returns
//! immediately, a negative value blocks until something is ready, a positive
//! value bounds the wait in milliseconds.

use std::collections::HashSet;
use std::io;
use std::os::unix::io::RawFd;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;
pub mod select;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EpollBackend as PlatformBackend;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueBackend as PlatformBackend;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub use select::SelectBackend as PlatformBackend;

pub use select::SelectBackend;

/// Name of the backend selected for this build
pub const BACKEND_NAME: &str = <PlatformBackend as ReadinessBackend>::NAME;

/// A readiness mechanism
pub trait ReadinessBackend {
    /// Short name used in logs and errors
    const NAME: &'static str;

    /// Wait until a descriptor in `read` is readable or one in `write` is
    /// writable, or until the timeout expires
    fn wait(read: &[RawFd], write: &[RawFd], timeout_ms: i32) -> io::Result<Readiness>;
}

/// Descriptors reported ready by one wait
///
/// Both lists preserve the order of the interest sets that produced them and
/// hold each descriptor at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    readable: Vec<RawFd>,
    writable: Vec<RawFd>,
}

impl Readiness {
    /// Filter the interest lists down to the descriptors the backend flagged
    pub(crate) fn from_sets(
        read_interest: &[RawFd],
        write_interest: &[RawFd],
        read_ready: &HashSet<RawFd>,
        write_ready: &HashSet<RawFd>,
    ) -> Self {
        Self {
            readable: ordered_subset(read_interest, read_ready),
            writable: ordered_subset(write_interest, write_ready),
        }
    }

    /// Nothing became ready
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty()
    }

    /// Number of ready (descriptor, direction) pairs
    pub fn ready_count(&self) -> usize {
        self.readable.len() + self.writable.len()
    }

    /// Read-ready descriptors, in read-interest order
    pub fn readable(&self) -> &[RawFd] {
        &self.readable
    }

    /// Write-ready descriptors, in write-interest order
    pub fn writable(&self) -> &[RawFd] {
        &self.writable
    }

    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.readable.contains(&fd)
    }

    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.writable.contains(&fd)
    }
}

fn ordered_subset(interest: &[RawFd], ready: &HashSet<RawFd>) -> Vec<RawFd> {
    let mut seen = HashSet::with_capacity(ready.len());
    interest
        .iter()
        .copied()
        .filter(|fd| ready.contains(fd) && seen.insert(*fd))
        .collect()
}

/// Merge the two interest lists into (descriptor, wants_read, wants_write)
/// entries, one per distinct descriptor, in first-seen order
pub(crate) fn merged_interest(read: &[RawFd], write: &[RawFd]) -> Vec<(RawFd, bool, bool)> {
    let mut merged: Vec<(RawFd, bool, bool)> = Vec::with_capacity(read.len() + write.len());
    for &fd in read {
        match merged.iter_mut().find(|entry| entry.0 == fd) {
            Some(entry) => entry.1 = true,
            None => merged.push((fd, true, false)),
        }
    }
    for &fd in write {
        match merged.iter_mut().find(|entry| entry.0 == fd) {
            Some(entry) => entry.2 = true,
            None => merged.push((fd, false, true)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_interest_combines_directions() {
        let merged = merged_interest(&[3, 4, 3], &[4, 5]);
        assert_eq!(merged, vec![(3, true, false), (4, true, true), (5, false, true)]);
    }

    #[test]
    fn test_readiness_keeps_interest_order() {
        let read_ready: HashSet<RawFd> = [9, 7].into_iter().collect();
        let write_ready: HashSet<RawFd> = HashSet::new();
        let readiness = Readiness::from_sets(&[7, 8, 9, 7], &[10], &read_ready, &write_ready);
        assert_eq!(readiness.readable(), &[7, 9]);
        assert!(readiness.writable().is_empty());
        assert_eq!(readiness.ready_count(), 2);
        assert!(readiness.is_readable(9));
        assert!(!readiness.is_readable(8));
        assert!(!readiness.is_writable(10));
    }

    #[test]
    fn test_default_readiness_is_empty() {
        let readiness = Readiness::default();
        assert!(readiness.is_empty());
        assert_eq!(readiness.ready_count(), 0);
    }
}
