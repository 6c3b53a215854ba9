//! API Facades Layer
//!
//! Single entry point for applications. Re-exports the public types of the
//! inner layers and adds a few one-call helpers in [`socket_facades`] for the
//! common setups: load a configuration file, open a listener, connect a
//! client, bind a UDP endpoint.
//!
//! All facades call the inner layers; nothing here touches a descriptor
//! directly.

pub mod socket_facades;

pub use socket_facades::{bind_udp, connect, listen, load_config, FacadeError};

pub use adapters_event_loop::{
    poll_descriptors, wait_read, wait_write, EventLoop, EventLoopError, Interest, Multiplexer, Readiness,
    SharedEventLoop, WaitStatus, BACKEND_NAME,
};
pub use adapters_socket::{
    lock_pair, set_socket_hook, verify_channel_alive, verify_peer_alive, AddressResolver,
    BroadcastOutcome, ChannelStatus, EncryptedChannel, HandleState, LivenessPolicy, ResolveQuery,
    SocketError, SocketHandle, SocketKind, SystemResolver, UdpEndpoint,
};
pub use entities_networking::{
    AddressFamily, ConfigError, OsError, SocketConfig, SocketRole, TransportProtocol,
};
