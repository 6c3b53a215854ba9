//! Liveness Verifier
//!
//! A send on a non-blocking descriptor can succeed after the peer has already
//! gone away; the bytes land in the kernel buffer and the failure only shows up
//! later. The verifier probes the connection a bounded number of times:
//!
//! 1. sleep for the policy interval
//! 2. poll the descriptor for read readiness with a zero timeout
//! 3. if readable, peek one byte: `0` means the peer shut down, data means the
//!    connection is alive, would-block or interrupted uses up the attempt
//!
//! After probing, a pending `SO_ERROR` wins over everything else, then an
//! observed shutdown, then a non-transient peek error.
//!
//! The verifier works on a borrowed socket and never takes a handle lock.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::thread;
use std::time::Duration;

use adapters_event_loop::poll_descriptors;
use entities_networking::OsError;
use socket2::Socket;
use tracing::warn;

use crate::error::SocketError;
use crate::platform;

/// How hard the verifier probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_millis(10),
        }
    }
}

/// Classified result of a failed encrypted-channel peek
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The channel needs more input before it can produce data
    WantRead,
    /// The channel must flush output first (renegotiation)
    WantWrite,
    /// The peer sent a close notification
    ZeroReturn,
    /// The transport failed; `None` means an unexpected EOF
    Syscall(Option<OsError>),
    /// The channel protocol failed
    Protocol(String),
}

/// An encrypted stream layered over a socket descriptor
#[cfg_attr(test, mockall::automock)]
pub trait EncryptedChannel {
    /// Underlying descriptor, if the channel is attached to one
    fn raw_fd(&self) -> Option<RawFd>;

    /// Decrypt up to `buf.len()` bytes without consuming them
    fn peek(&mut self, buf: &mut [u8]) -> Result<usize, ChannelStatus>;
}

enum Probe {
    Alive,
    Closed,
    Failed(SocketError),
    Exhausted,
}

/// Check a plain socket with the default policy
pub fn verify_peer_alive(socket: &Socket) -> Result<(), SocketError> {
    verify_peer_alive_with(socket, &LivenessPolicy::default())
}

pub fn verify_peer_alive_with(socket: &Socket, policy: &LivenessPolicy) -> Result<(), SocketError> {
    let fd = socket.as_raw_fd();
    let probe = probe_loop(fd, policy, || {
        let mut byte = [0u8; 1];
        match platform::peek(socket, &mut byte) {
            Ok(0) => Step::Stop(Probe::Closed),
            Ok(_) => Step::Stop(Probe::Alive),
            Err(err) if platform::is_transient(&err) => Step::Retry,
            Err(err) => Step::Stop(Probe::Failed(SocketError::Send(err.into()))),
        }
    })?;
    let pending = platform::pending_error(socket).map_err(|e| SocketError::Send(e.into()))?;
    settle(fd, probe, pending)
}

/// Check an encrypted channel with the default policy
///
/// A channel without a descriptor is treated as alive.
pub fn verify_channel_alive<C: EncryptedChannel + ?Sized>(channel: &mut C) -> Result<(), SocketError> {
    verify_channel_alive_with(channel, &LivenessPolicy::default())
}

pub fn verify_channel_alive_with<C: EncryptedChannel + ?Sized>(
    channel: &mut C,
    policy: &LivenessPolicy,
) -> Result<(), SocketError> {
    let fd = match channel.raw_fd() {
        Some(fd) if fd >= 0 => fd,
        _ => return Ok(()),
    };
    let probe = probe_loop(fd, policy, || {
        let mut byte = [0u8; 1];
        match channel.peek(&mut byte) {
            Ok(0) | Err(ChannelStatus::ZeroReturn) | Err(ChannelStatus::Syscall(None)) => {
                Step::Stop(Probe::Closed)
            }
            Ok(_) => Step::Stop(Probe::Alive),
            Err(ChannelStatus::WantRead) | Err(ChannelStatus::WantWrite) => Step::Retry,
            Err(ChannelStatus::Syscall(Some(err))) if err.is_transient() => Step::Retry,
            Err(ChannelStatus::Syscall(Some(err))) => Step::Stop(Probe::Failed(SocketError::Send(err))),
            Err(ChannelStatus::Protocol(reason)) => Step::Stop(Probe::Failed(SocketError::Send(
                OsError::custom(io::ErrorKind::InvalidData, reason),
            ))),
        }
    })?;
    let pending = platform::pending_error_raw(fd).map_err(|e| SocketError::Send(e.into()))?;
    settle(fd, probe, pending)
}

enum Step {
    Retry,
    Stop(Probe),
}

fn probe_loop<F>(fd: RawFd, policy: &LivenessPolicy, mut peek: F) -> Result<Probe, SocketError>
where
    F: FnMut() -> Step,
{
    for _ in 0..policy.attempts {
        thread::sleep(policy.interval);
        // Interrupted polls come back empty and use up the attempt
        let readiness = poll_descriptors(&[fd], &[], 0)?;
        if !readiness.is_readable(fd) {
            continue;
        }
        match peek() {
            Step::Retry => continue,
            Step::Stop(probe) => return Ok(probe),
        }
    }
    Ok(Probe::Exhausted)
}

fn settle(fd: RawFd, probe: Probe, pending: Option<io::Error>) -> Result<(), SocketError> {
    if let Some(err) = pending {
        warn!(fd, error = %err, "pending socket error after send");
        return Err(SocketError::Send(err.into()));
    }
    match probe {
        Probe::Alive | Probe::Exhausted => Ok(()),
        Probe::Closed => {
            warn!(fd, "peer closed the connection");
            Err(SocketError::PeerClosed)
        }
        Probe::Failed(err) => {
            warn!(fd, error = %err, "liveness probe failed");
            Err(err)
        }
    }
}
