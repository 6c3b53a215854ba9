//! epoll backend (Linux, Android)
//!
//! Each wait builds a short-lived epoll instance from the interest lists, so
//! the interest sets stay the single source of truth and nothing has to be
//! kept in sync between waits.

use std::collections::HashSet;
use std::io;
use std::os::unix::io::{BorrowedFd, RawFd};

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};

use super::{merged_interest, Readiness, ReadinessBackend};

fn read_events() -> EpollFlags {
    EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR
}

fn write_events() -> EpollFlags {
    EpollFlags::EPOLLOUT | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR
}

/// Readiness through `epoll_wait(2)`
pub struct EpollBackend;

impl ReadinessBackend for EpollBackend {
    const NAME: &'static str = "epoll";

    fn wait(read: &[RawFd], write: &[RawFd], timeout_ms: i32) -> io::Result<Readiness> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        let interest = merged_interest(read, write);

        for &(fd, wants_read, wants_write) in &interest {
            if fd < 0 {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            let mut flags = EpollFlags::empty();
            if wants_read {
                flags |= EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP;
            }
            if wants_write {
                flags |= EpollFlags::EPOLLOUT;
            }
            // SAFETY: the caller keeps `fd` open for the duration of the wait,
            // and the registration dies with `epoll` at the end of this call.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            epoll.add(borrowed, EpollEvent::new(flags, fd as u64))?;
        }

        let mut events = vec![EpollEvent::empty(); interest.len().max(1)];
        let timeout = if timeout_ms < 0 { -1 } else { timeout_ms as isize };
        let count = epoll.wait(&mut events, timeout)?;

        let mut read_ready = HashSet::new();
        let mut write_ready = HashSet::new();
        for event in &events[..count] {
            let flags = event.events();
            let fd = event.data() as RawFd;
            if flags.intersects(read_events()) {
                read_ready.insert(fd);
            }
            if flags.intersects(write_events()) {
                write_ready.insert(fd);
            }
        }
        Ok(Readiness::from_sets(read, write, &read_ready, &write_ready))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_epoll_reports_readable_pair() {
        let (left, right) = UnixStream::pair().unwrap();
        let fd = right.as_raw_fd();

        let idle = EpollBackend::wait(&[fd], &[], 0).unwrap();
        assert!(idle.is_empty());

        use std::io::Write;
        (&left).write_all(b"x").unwrap();
        let ready = EpollBackend::wait(&[fd], &[fd], 100).unwrap();
        assert!(ready.is_readable(fd));
        assert!(ready.is_writable(fd));
    }

    #[test]
    fn test_epoll_rejects_bad_descriptor() {
        let err = EpollBackend::wait(&[-1], &[], 0).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
