//! Unix Socket Connector
//!
//! Client side of the handshake. Optionally binds its own address, connects
//! to the listener, sends one padded message and reads one reply.
//!
//! State machine:
//!
//! ```text
//! Unbound → Bound → Connected → Sent → Received → Closed
//!    └─────────────────↑  (no local address configured)
//! ```

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::time::Duration;

use nix::sys::socket::{connect, UnixAddr};
use tokio::net::UnixStream;

use super::{open_stream_socket, Connection};
use crate::control::{OpControl, Operation};
use crate::error::{IpcError, Result};
use crate::message::{Message, MESSAGE_CAPACITY};
use crate::transport::address::{BoundAddress, SocketAddress};

/// Lifecycle of a [`Connector`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorState {
    /// Nothing allocated yet
    Unbound,
    /// Socket bound to the local address
    Bound,
    /// Connected to the listener
    Connected,
    /// Greeting sent
    Sent,
    /// Reply received
    Received,
    /// All handles closed and the local address removed
    Closed,
}

/// Bounded retry for a connect issued before the listener is ready
///
/// `attempts == 1` means a single try. Only "nothing listening" failures are
/// retried; the delay doubles after each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectRetry {
    /// Total connect attempts, at least 1
    pub attempts: u32,
    /// Delay before the second attempt
    pub backoff: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Client-side Unix socket role
#[derive(Debug)]
pub struct Connector {
    remote: SocketAddress,
    local: Option<SocketAddress>,
    control: OpControl,
    retry: ConnectRetry,
    state: ConnectorState,
    socket: Option<OwnedFd>,
    bound: Option<BoundAddress>,
    connection: Option<Connection>,
}

impl Connector {
    /// Create a connector for the listener at `remote`
    ///
    /// With `local` set, `bind` must be called before `connect`; without it
    /// the OS assigns an anonymous address.
    #[must_use]
    pub fn new(remote: SocketAddress, local: Option<SocketAddress>, control: OpControl) -> Self {
        Self {
            remote,
            local,
            control,
            retry: ConnectRetry::default(),
            state: ConnectorState::Unbound,
            socket: None,
            bound: None,
            connection: None,
        }
    }

    /// Retry a connect that finds no listener
    #[must_use]
    pub fn with_retry(mut self, retry: ConnectRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Listener address
    #[must_use]
    pub fn remote(&self) -> &SocketAddress {
        &self.remote
    }

    /// Local address, if one is configured
    #[must_use]
    pub fn local(&self) -> Option<&SocketAddress> {
        self.local.as_ref()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Bind the socket to the configured local address
    ///
    /// # Errors
    ///
    /// `IpcError::SocketFailed` or `IpcError::AddressInUseOrInvalid`.
    pub fn bind(&mut self) -> Result<()> {
        let result = self.bind_inner();
        self.settle(result)
    }

    fn bind_inner(&mut self) -> Result<()> {
        self.expect_state(ConnectorState::Unbound, "bind")?;
        let local = self
            .local
            .as_ref()
            .ok_or_else(|| IpcError::InvalidState("no local address configured".to_string()))?;

        let socket = open_stream_socket()?;
        let bound = BoundAddress::bind(&socket, local)?;

        self.socket = Some(socket);
        self.bound = Some(bound);
        self.state = ConnectorState::Bound;
        Ok(())
    }

    /// Connect to the listener
    ///
    /// # Errors
    ///
    /// `IpcError::ConnectFailed` when nothing is listening at the remote
    /// address (after the configured retries).
    pub async fn connect(&mut self) -> Result<()> {
        let result = self.connect_inner().await;
        self.settle(result)
    }

    async fn connect_inner(&mut self) -> Result<()> {
        match self.state {
            ConnectorState::Bound => {}
            ConnectorState::Unbound if self.local.is_none() => {
                self.socket = Some(open_stream_socket()?);
            }
            _ => self.expect_state(ConnectorState::Bound, "connect")?,
        }

        let remote = self.remote.path().to_path_buf();
        let mut socket = self
            .socket
            .take()
            .ok_or_else(|| IpcError::InvalidState("socket missing".to_string()))?;

        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.backoff;
        let mut attempt = 1;

        loop {
            let target = remote.clone();
            let join_path = remote.clone();
            let (returned, outcome) = self
                .control
                .run(Operation::Connect, async move {
                    tokio::task::spawn_blocking(move || {
                        let outcome = connect_blocking(&socket, &target);
                        (socket, outcome)
                    })
                    .await
                    .map_err(|e| IpcError::ConnectFailed {
                        path: join_path,
                        source: io::Error::other(e),
                    })
                })
                .await?;
            socket = returned;

            let source = match outcome {
                Ok(()) => break,
                Err(source) => source,
            };
            let err = IpcError::ConnectFailed {
                path: remote.clone(),
                source,
            };
            if attempt >= attempts || !err.is_listener_absent() {
                return Err(err);
            }

            tracing::debug!(attempt, delay = ?delay, "Listener not ready, retrying connect");
            self.control
                .run(Operation::Connect, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            attempt += 1;
            delay = delay.saturating_mul(2);
        }

        let failed = |source: io::Error| IpcError::ConnectFailed {
            path: remote.clone(),
            source,
        };
        let std_stream = std::os::unix::net::UnixStream::from(socket);
        std_stream.set_nonblocking(true).map_err(&failed)?;
        let stream = UnixStream::from_std(std_stream).map_err(&failed)?;

        self.connection = Some(Connection::new(stream, Some(remote.clone())));
        self.state = ConnectorState::Connected;

        tracing::info!(path = ?remote, attempts = attempt, "Connected to listener");
        Ok(())
    }

    /// Send a message null-padded to the full buffer capacity
    ///
    /// # Errors
    ///
    /// `IpcError::SendFailed`.
    pub async fn send(&mut self, message: &Message) -> Result<usize> {
        let result = self.send_inner(message).await;
        self.settle(result)
    }

    async fn send_inner(&mut self, message: &Message) -> Result<usize> {
        self.expect_state(ConnectorState::Connected, "send")?;

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| IpcError::InvalidState("Not connected".to_string()))?;
        let sent = connection.send(&message.padded(), &self.control).await?;

        self.state = ConnectorState::Sent;
        tracing::info!(bytes = sent, "Sent message to listener");
        Ok(sent)
    }

    /// Wait for the listener's reply
    ///
    /// # Errors
    ///
    /// `IpcError::ReceiveFailed`, or `IpcError::PeerClosed` if the listener
    /// hung up without answering.
    pub async fn receive(&mut self) -> Result<Message> {
        let result = self.receive_inner().await;
        self.settle(result)
    }

    async fn receive_inner(&mut self) -> Result<Message> {
        self.expect_state(ConnectorState::Sent, "receive")?;

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| IpcError::InvalidState("Not connected".to_string()))?;
        let message = connection.receive(MESSAGE_CAPACITY, &self.control).await?;

        self.state = ConnectorState::Received;
        tracing::info!(message = %message, "Connector received reply");
        Ok(message)
    }

    /// Close the connection and remove the local address
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ConnectorState::Closed {
            return;
        }

        self.connection = None;
        self.socket = None;
        if let Some(mut bound) = self.bound.take() {
            bound.release();
        }

        tracing::debug!(from = ?self.state, "Connector closed");
        self.state = ConnectorState::Closed;
    }

    fn expect_state(&self, expected: ConnectorState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(IpcError::InvalidState(format!(
                "{operation} requires {expected:?}, connector is {:?}",
                self.state
            )))
        }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, state = ?self.state, "Connector failed, releasing resources");
            self.close();
        }
        result
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.close();
    }
}

/// Issue a blocking `connect(2)` on `socket`
///
/// A failed connect leaves an `AF_UNIX` socket unconnected, so the same
/// handle can be retried.
fn connect_blocking(socket: &OwnedFd, remote: &Path) -> io::Result<()> {
    let addr = UnixAddr::new(remote)?;
    connect(socket.as_raw_fd(), &addr)?;
    Ok(())
}
