//! Adapters Layer: Sockets
//!
//! Thread-safe socket objects built on the `socket2` crate.
//!
//! ## Overview
//!
//! The `adapters_socket` crate provides:
//! - **Socket handles**: [`SocketHandle`], a stream socket that owns its
//!   descriptor and, as a server, a registry of accepted children
//! - **Lock ordering**: [`lock_pair`] for operations that lock two objects
//! - **Liveness checks**: [`verify_peer_alive`] and [`verify_channel_alive`],
//!   which catch a peer that vanished behind a successful non-blocking send
//! - **UDP endpoints**: [`UdpEndpoint`], the connectionless sibling
//! - **Platform primitives**: [`platform`], thin wrappers over the socket
//!   system calls plus the [`AddressResolver`] seam
//!
//! ## Architecture
//!
//! This crate is part of the adapters layer. It depends on:
//! - `entities_networking`: configuration descriptor and OS error values
//! - `adapters_event_loop`: one-shot readiness polling for liveness checks
//!
//! ## See Also
//!
//! - [`adapters_event_loop`](../adapters_event_loop/index.html): readiness multiplexing

#[cfg(not(unix))]
compile_error!("adapters_socket supports unix targets only");

pub mod error;
pub mod handle;
pub mod liveness;
pub mod lock_order;
pub mod platform;
pub mod udp;

pub use error::SocketError;
pub use handle::{BroadcastOutcome, HandleState, SocketHandle};
pub use liveness::{
    verify_channel_alive, verify_channel_alive_with, verify_peer_alive, verify_peer_alive_with,
    ChannelStatus, EncryptedChannel, LivenessPolicy,
};
pub use lock_order::{lock_pair, LockedPair, OrderedMutex};
pub use platform::{set_socket_hook, AddressResolver, ResolveQuery, SocketKind, SystemResolver};
pub use udp::UdpEndpoint;
