//! Socket Transport
//!
//! Local stream sockets addressed by filesystem path:
//! - [`address`]: address validation and the bind/unlink lifecycle guard
//! - [`unix_socket`]: the listener and connector roles

pub mod address;
#[cfg(unix)]
pub mod unix_socket;

pub use address::{lock_path, remove_address, sun_path_capacity, BoundAddress, SocketAddress};

#[cfg(unix)]
pub use unix_socket::{
    ConnectRetry, Connection, Connector, ConnectorState, Listener, ListenerState,
    DEFAULT_BACKLOG,
};
