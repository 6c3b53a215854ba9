//! kqueue backend (macOS, iOS, BSDs)

use std::collections::HashSet;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use super::{Readiness, ReadinessBackend};

/// Readiness through `kevent(2)`
pub struct KqueueBackend;

impl ReadinessBackend for KqueueBackend {
    const NAME: &'static str = "kqueue";

    fn wait(read: &[RawFd], write: &[RawFd], timeout_ms: i32) -> io::Result<Readiness> {
        let kq = create_kqueue()?;

        let mut changes: Vec<libc::kevent> = Vec::with_capacity(read.len() + write.len());
        for &fd in read {
            let mut event = change(fd)?;
            event.filter = libc::EVFILT_READ;
            changes.push(event);
        }
        for &fd in write {
            let mut event = change(fd)?;
            event.filter = libc::EVFILT_WRITE;
            changes.push(event);
        }

        let capacity = changes.len().max(1);
        // SAFETY: kevent is plain data; all-zero is a valid empty record.
        let mut events: Vec<libc::kevent> = vec![unsafe { mem::zeroed() }; capacity];

        let timeout;
        let timeout_ptr = if timeout_ms < 0 {
            ptr::null()
        } else {
            timeout = libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) as libc::c_long) * 1_000_000,
            };
            &timeout as *const libc::timespec
        };

        let count = unsafe {
            libc::kevent(
                kq.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as libc::c_int,
                events.as_mut_ptr(),
                capacity as libc::c_int,
                timeout_ptr,
            )
        };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut read_ready = HashSet::new();
        let mut write_ready = HashSet::new();
        for event in &events[..count as usize] {
            if event.flags & libc::EV_ERROR != 0 {
                return Err(io::Error::from_raw_os_error(event.data as i32));
            }
            let fd = event.ident as RawFd;
            if event.filter == libc::EVFILT_READ {
                read_ready.insert(fd);
            } else if event.filter == libc::EVFILT_WRITE {
                write_ready.insert(fd);
            }
        }
        Ok(Readiness::from_sets(read, write, &read_ready, &write_ready))
    }
}

/// `EV_ADD` record for `fd`; the caller sets the filter, whose integer type
/// differs between the BSDs
fn change(fd: RawFd) -> io::Result<libc::kevent> {
    if fd < 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    // SAFETY: kevent is plain data; the fields that matter are set below.
    let mut event: libc::kevent = unsafe { mem::zeroed() };
    event.ident = fd as libc::uintptr_t;
    event.flags = (libc::EV_ADD | libc::EV_ENABLE) as _;
    Ok(event)
}

fn create_kqueue() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::kqueue() };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: kqueue returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_kqueue_registers_both_filters() {
        let (left, right) = UnixStream::pair().unwrap();
        let fd = right.as_raw_fd();

        let idle = KqueueBackend::wait(&[fd], &[], 0).unwrap();
        assert!(idle.is_empty());

        (&left).write_all(b"x").unwrap();
        let ready = KqueueBackend::wait(&[fd], &[fd], 100).unwrap();
        assert!(ready.is_readable(fd));
        assert!(ready.is_writable(fd));
    }

    #[test]
    fn test_kqueue_rejects_bad_descriptor() {
        let err = KqueueBackend::wait(&[-1], &[], 0).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
