//! Portable `select(2)` backend
//!
//! Limited to descriptors below `FD_SETSIZE`; anything outside that range is
//! rejected with `EINVAL` before the call is made.

use std::collections::HashSet;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

use super::{Readiness, ReadinessBackend};

/// Readiness through `select(2)`
pub struct SelectBackend;

impl ReadinessBackend for SelectBackend {
    const NAME: &'static str = "select";

    fn wait(read: &[RawFd], write: &[RawFd], timeout_ms: i32) -> io::Result<Readiness> {
        let mut read_set = FdSet::new();
        let mut write_set = FdSet::new();
        let mut highest: RawFd = -1;

        for &fd in read {
            read_set.insert(fd)?;
            highest = highest.max(fd);
        }
        for &fd in write {
            write_set.insert(fd)?;
            highest = highest.max(fd);
        }

        let mut timeout;
        let timeout_ptr = if timeout_ms < 0 {
            ptr::null_mut()
        } else {
            timeout = libc::timeval {
                tv_sec: (timeout_ms / 1000) as _,
                tv_usec: ((timeout_ms % 1000) * 1000) as _,
            };
            &mut timeout as *mut libc::timeval
        };

        let count = unsafe {
            libc::select(
                highest + 1,
                read_set.as_mut_ptr(),
                write_set.as_mut_ptr(),
                ptr::null_mut(),
                timeout_ptr,
            )
        };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        let read_ready: HashSet<RawFd> = read.iter().copied().filter(|&fd| read_set.contains(fd)).collect();
        let write_ready: HashSet<RawFd> =
            write.iter().copied().filter(|&fd| write_set.contains(fd)).collect();
        Ok(Readiness::from_sets(read, write, &read_ready, &write_ready))
    }
}

struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> Self {
        // SAFETY: fd_set is plain data and FD_ZERO initializes it fully.
        let mut set: libc::fd_set = unsafe { mem::zeroed() };
        unsafe { libc::FD_ZERO(&mut set) };
        FdSet(set)
    }

    fn insert(&mut self, fd: RawFd) -> io::Result<()> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if fd as usize >= libc::FD_SETSIZE as usize {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        unsafe { libc::FD_SET(fd, &mut self.0) };
        Ok(())
    }

    fn contains(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.0
    }
}
