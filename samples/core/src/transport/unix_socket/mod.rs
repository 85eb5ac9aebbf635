//! Unix Socket Transport
//!
//! One listener, one connector, one request/response pair over a stream
//! socket in the filesystem namespace.
//!
//! # Socket Location
//!
//! Listener default: `unix_sock.server`
//! Connector default: `unix_sock.client`
//!
//! Both are relative to the working directory unless configured otherwise.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                      ┌─────────────────┐
//! │    Connector    │                      │    Listener     │
//! │                 │   unix_sock.server   │                 │
//! │ unix_sock.client├─────────────────────►│ bind / listen   │
//! │                 │                      │ accept (once)   │
//! │  greeting   ───►│  256 bytes, padded   │◄─── receive     │
//! │  receive    ◄───│  reply, unpadded     │───► respond     │
//! └─────────────────┘                      └─────────────────┘
//! ```
//!
//! Messages are not framed: each side does a single read of at most the
//! buffer capacity, so a payload split across several stream segments is
//! truncated to the first one.

mod connection;
mod connector;
mod listener;

pub use connection::Connection;
pub use connector::{ConnectRetry, Connector, ConnectorState};
pub use listener::{Listener, ListenerState, DEFAULT_BACKLOG};

use std::os::fd::OwnedFd;

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};

use crate::error::{IpcError, Result};

/// Open a blocking `AF_UNIX` stream socket
///
/// Callers switch it to non-blocking mode when handing it to tokio.
pub(crate) fn open_stream_socket() -> Result<OwnedFd> {
    socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)
        .map_err(|errno| IpcError::SocketFailed {
            source: errno.into(),
        })
}
