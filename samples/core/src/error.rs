//! Error Types
//!
//! One variant per failing OS call of the sample roles, plus the handful of
//! conditions the roles detect themselves (peer hang-up, timeouts,
//! cancellation, out-of-order calls).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::control::Operation;

/// Errors produced by the sample roles
///
/// Every variant is fatal to the role that hit it. Roles release the
/// resources they hold before returning one of these.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The address is held by a live socket, is not a socket, or is malformed
    #[error("address {path:?} is in use or invalid: {reason}")]
    AddressInUseOrInvalid {
        /// Offending address
        path: PathBuf,
        /// Human-readable explanation
        reason: String,
        /// Underlying OS error, when there was one
        #[source]
        source: Option<io::Error>,
    },

    /// Creating the socket handle failed
    #[error("failed to open socket: {source}")]
    SocketFailed {
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Putting the socket into listening mode failed
    #[error("listen on {path:?} failed: {source}")]
    ListenFailed {
        /// Listening address
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Accepting a pending connection failed
    #[error("accept failed: {source}")]
    AcceptFailed {
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// No listener could be reached at the remote address
    #[error("connect to {path:?} failed: {source}")]
    ConnectFailed {
        /// Remote address
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Writing to the connection failed
    #[error("send failed: {source}")]
    SendFailed {
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Reading from the connection failed
    #[error("receive failed: {source}")]
    ReceiveFailed {
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The peer closed its end before sending anything
    #[error("peer closed the connection without sending data")]
    PeerClosed,

    /// A message does not fit the fixed buffer
    #[error("message of {len} bytes does not fit a {capacity}-byte buffer")]
    MessageTooLong {
        /// Message length in bytes
        len: usize,
        /// Buffer capacity in bytes
        capacity: usize,
    },

    /// A suspension point exceeded its configured timeout
    #[error("{operation} timed out after {after:?}")]
    TimedOut {
        /// Operation that was pending
        operation: Operation,
        /// Configured limit
        after: Duration,
    },

    /// A suspension point was cancelled
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was pending
        operation: Operation,
    },

    /// An operation was called out of order
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A named pipe operation failed
    #[error("named pipe {path:?}: {source}")]
    FifoFailed {
        /// FIFO path
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A shared-memory operation failed
    #[error("shared memory object {name}: {source}")]
    SharedMemoryFailed {
        /// Object name
        name: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

impl IpcError {
    /// Whether a connect attempt may succeed later (nothing listening yet)
    #[must_use]
    pub fn is_listener_absent(&self) -> bool {
        match self {
            Self::ConnectFailed { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ),
            _ => false,
        }
    }
}

/// Result alias for the sample roles
pub type Result<T> = std::result::Result<T, IpcError>;
