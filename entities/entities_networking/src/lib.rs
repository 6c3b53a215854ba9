//! Entities Layer: Networking
//!
//! Inert data shared by every networking crate in the workspace.
//!
//! ## Overview
//!
//! The `entities_networking` crate provides:
//! - **Socket configuration**: [`SocketConfig`], the descriptor consumed by stream
//!   handles and UDP endpoints when they are initialized
//! - **OS error values**: [`OsError`], a cloneable snapshot of an `io::Error`
//!   (kind plus errno) that can be stored in last-error slots
//!
//! ## Architecture
//!
//! This crate sits in the entities layer and has no knowledge of descriptors or
//! system calls. The adapters layer (`adapters_event_loop`, `adapters_socket`)
//! builds on these types.

pub mod config;
pub mod os_error;

pub use config::{AddressFamily, ConfigError, SocketConfig, SocketRole, TransportProtocol};
pub use os_error::OsError;
