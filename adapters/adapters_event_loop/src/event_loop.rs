//! Event Loop
//!
//! Read and write interest sets plus the calls that wait on them.
//!
//! ## Overview
//!
//! - [`EventLoop`] is owned by one thread at a time (`&mut self` to register).
//! - [`SharedEventLoop`] wraps the same sets in `Arc<Mutex<_>>`; its `run`
//!   copies the sets and waits without holding the lock, so other threads can
//!   keep registering while a wait is in progress.
//! - [`poll_descriptors`] skips the interest sets entirely.
//!
//! Timeouts: `0` polls, negative blocks, positive bounds the wait in
//! milliseconds.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::backend::{PlatformBackend, Readiness, ReadinessBackend};
use crate::error::EventLoopError;

/// Direction(s) a descriptor is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Read,
    Write,
    Both,
}

impl Interest {
    fn wants_read(self) -> bool {
        matches!(self, Interest::Read | Interest::Both)
    }

    fn wants_write(self) -> bool {
        matches!(self, Interest::Write | Interest::Both)
    }
}

/// Outcome of [`wait_read`] / [`wait_write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    TimedOut,
}

/// Anything that holds interest sets and can wait on them
pub trait Multiplexer {
    /// Register `fd`; returns `false` if it was already registered for every
    /// requested direction
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<bool, EventLoopError>;

    /// Unregister `fd`; returns `true` if anything was removed
    fn remove(&mut self, fd: RawFd, interest: Interest) -> bool;

    /// Wait for readiness on the registered descriptors
    fn run(&mut self, timeout_ms: i32) -> Result<Readiness, EventLoopError>;
}

/// Single-owner readiness multiplexer
#[derive(Debug, Clone, Default)]
pub struct EventLoop {
    read: Vec<RawFd>,
    write: Vec<RawFd>,
}

impl EventLoop {
    /// Create a loop with empty interest sets
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for read readiness
    ///
    /// # Arguments
    ///
    /// * `fd` - Descriptor to watch; must be non-negative
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Inserted
    /// * `Ok(false)` - Already present; the set is unchanged
    /// * `Err(EventLoopError::InvalidDescriptor)` - `fd` is negative
    pub fn add_read(&mut self, fd: RawFd) -> Result<bool, EventLoopError> {
        insert_unique(&mut self.read, fd)
    }

    /// Register for write readiness
    ///
    /// # Arguments
    ///
    /// * `fd` - Descriptor to watch; must be non-negative
    ///
    /// # Returns
    ///
    /// Same as [`add_read`](Self::add_read)
    pub fn add_write(&mut self, fd: RawFd) -> Result<bool, EventLoopError> {
        insert_unique(&mut self.write, fd)
    }

    /// Drop `fd` from the read set
    ///
    /// # Returns
    ///
    /// `true` if it was registered; removing an absent descriptor is a no-op
    pub fn remove_read(&mut self, fd: RawFd) -> bool {
        remove_value(&mut self.read, fd)
    }

    /// Drop `fd` from the write set
    ///
    /// # Returns
    ///
    /// `true` if it was registered
    pub fn remove_write(&mut self, fd: RawFd) -> bool {
        remove_value(&mut self.write, fd)
    }

    /// Read interest set, in registration order
    pub fn read_interest(&self) -> &[RawFd] {
        &self.read
    }

    /// Write interest set, in registration order
    pub fn write_interest(&self) -> &[RawFd] {
        &self.write
    }

    /// No descriptor is registered in either direction
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Forget every registration
    pub fn clear(&mut self) {
        self.read.clear();
        self.write.clear();
    }

    /// Wait on an explicit backend instead of the platform default
    ///
    /// # Arguments
    ///
    /// * `timeout_ms` - `0` polls, negative blocks, positive bounds the wait
    ///
    /// # Returns
    ///
    /// * `Ok(Readiness)` - Ready descriptors in registration order; empty on
    ///   timeout
    /// * `Err(EventLoopError::Poll)` - The backend call failed
    pub fn run_with<B: ReadinessBackend>(&self, timeout_ms: i32) -> Result<Readiness, EventLoopError> {
        wait_with::<B>(&self.read, &self.write, timeout_ms)
    }
}

impl Multiplexer for EventLoop {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<bool, EventLoopError> {
        validate_fd(fd)?;
        let mut inserted = false;
        if interest.wants_read() {
            inserted |= self.add_read(fd)?;
        }
        if interest.wants_write() {
            inserted |= self.add_write(fd)?;
        }
        Ok(inserted)
    }

    fn remove(&mut self, fd: RawFd, interest: Interest) -> bool {
        let mut removed = false;
        if interest.wants_read() {
            removed |= self.remove_read(fd);
        }
        if interest.wants_write() {
            removed |= self.remove_write(fd);
        }
        removed
    }

    fn run(&mut self, timeout_ms: i32) -> Result<Readiness, EventLoopError> {
        self.run_with::<PlatformBackend>(timeout_ms)
    }
}

/// Cloneable, lock-guarded [`EventLoop`]
///
/// Clones share the same interest sets.
#[derive(Debug, Clone, Default)]
pub struct SharedEventLoop {
    inner: Arc<Mutex<EventLoop>>,
}

impl SharedEventLoop {
    /// Create a shared loop with empty interest sets
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EventLoop> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register for read readiness; see [`EventLoop::add_read`]
    pub fn add_read(&self, fd: RawFd) -> Result<bool, EventLoopError> {
        self.lock().add_read(fd)
    }

    /// Register for write readiness; see [`EventLoop::add_write`]
    pub fn add_write(&self, fd: RawFd) -> Result<bool, EventLoopError> {
        self.lock().add_write(fd)
    }

    /// Drop `fd` from the read set; `true` if it was registered
    pub fn remove_read(&self, fd: RawFd) -> bool {
        self.lock().remove_read(fd)
    }

    /// Drop `fd` from the write set; `true` if it was registered
    pub fn remove_write(&self, fd: RawFd) -> bool {
        self.lock().remove_write(fd)
    }

    /// Copy of the current interest sets
    pub fn snapshot(&self) -> EventLoop {
        self.lock().clone()
    }

    /// Wait on a snapshot of the interest sets; the lock is released first
    pub fn run(&self, timeout_ms: i32) -> Result<Readiness, EventLoopError> {
        let snapshot = self.snapshot();
        snapshot.run_with::<PlatformBackend>(timeout_ms)
    }
}

impl Multiplexer for SharedEventLoop {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<bool, EventLoopError> {
        self.lock().add(fd, interest)
    }

    fn remove(&mut self, fd: RawFd, interest: Interest) -> bool {
        self.lock().remove(fd, interest)
    }

    fn run(&mut self, timeout_ms: i32) -> Result<Readiness, EventLoopError> {
        SharedEventLoop::run(self, timeout_ms)
    }
}

/// One-shot readiness check over explicit descriptor lists
///
/// An interrupted wait is retried when blocking indefinitely; with a finite
/// timeout it reports nothing ready.
pub fn poll_descriptors(
    read: &[RawFd],
    write: &[RawFd],
    timeout_ms: i32,
) -> Result<Readiness, EventLoopError> {
    for &fd in read.iter().chain(write) {
        validate_fd(fd)?;
    }
    wait_with::<PlatformBackend>(read, write, timeout_ms)
}

/// Wait until `endpoint` is readable
///
/// The descriptor is unregistered afterwards if this call registered it.
pub fn wait_read<M, E>(mux: &mut M, endpoint: &E, timeout_ms: i32) -> Result<WaitStatus, EventLoopError>
where
    M: Multiplexer + ?Sized,
    E: AsRawFd + ?Sized,
{
    wait_one(mux, endpoint.as_raw_fd(), Interest::Read, timeout_ms)
}

/// Wait until `endpoint` is writable
pub fn wait_write<M, E>(mux: &mut M, endpoint: &E, timeout_ms: i32) -> Result<WaitStatus, EventLoopError>
where
    M: Multiplexer + ?Sized,
    E: AsRawFd + ?Sized,
{
    wait_one(mux, endpoint.as_raw_fd(), Interest::Write, timeout_ms)
}

fn wait_one<M: Multiplexer + ?Sized>(
    mux: &mut M,
    fd: RawFd,
    interest: Interest,
    timeout_ms: i32,
) -> Result<WaitStatus, EventLoopError> {
    let inserted = mux.add(fd, interest)?;
    let outcome = mux.run(timeout_ms);
    if inserted {
        mux.remove(fd, interest);
    }
    let readiness = outcome?;
    let ready = match interest {
        Interest::Read => readiness.is_readable(fd),
        Interest::Write => readiness.is_writable(fd),
        Interest::Both => readiness.is_readable(fd) || readiness.is_writable(fd),
    };
    Ok(if ready {
        WaitStatus::Ready
    } else {
        WaitStatus::TimedOut
    })
}

fn wait_with<B: ReadinessBackend>(
    read: &[RawFd],
    write: &[RawFd],
    timeout_ms: i32,
) -> Result<Readiness, EventLoopError> {
    loop {
        trace!(
            backend = B::NAME,
            read = read.len(),
            write = write.len(),
            timeout_ms,
            "waiting for readiness"
        );
        match B::wait(read, write, timeout_ms) {
            Ok(readiness) => return Ok(readiness),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                if timeout_ms < 0 {
                    continue;
                }
                trace!(backend = B::NAME, "wait interrupted");
                return Ok(Readiness::default());
            }
            Err(err) => {
                return Err(EventLoopError::Poll {
                    backend: B::NAME,
                    source: err.into(),
                })
            }
        }
    }
}

fn validate_fd(fd: RawFd) -> Result<(), EventLoopError> {
    if fd < 0 {
        return Err(EventLoopError::InvalidDescriptor(fd));
    }
    Ok(())
}

fn insert_unique(set: &mut Vec<RawFd>, fd: RawFd) -> Result<bool, EventLoopError> {
    validate_fd(fd)?;
    if set.contains(&fd) {
        return Ok(false);
    }
    set.push(fd);
    Ok(true)
}

fn remove_value(set: &mut Vec<RawFd>, fd: RawFd) -> bool {
    match set.iter().position(|&existing| existing == fd) {
        Some(index) => {
            set.remove(index);
            true
        }
        None => false,
    }
}
