//! Unix Socket Listener
//!
//! Server side of the handshake. Binds an address, accepts exactly one
//! connector, reads its message, answers once, and tears everything down.
//!
//! State machine:
//!
//! ```text
//! Unbound → Bound → Listening → Accepted → Exchanged → Closed
//!    └────────┴─────────┴──────────┴─────────────────────↑ (any error)
//! ```

use std::os::fd::OwnedFd;
use std::path::PathBuf;

use nix::sys::socket::{listen, Backlog};
use tokio::net::UnixListener;

use super::{open_stream_socket, Connection};
use crate::control::{OpControl, Operation};
use crate::error::{IpcError, Result};
use crate::message::{Message, MESSAGE_CAPACITY};
use crate::transport::address::{BoundAddress, SocketAddress};

/// Pending-connection queue length used unless configured otherwise
pub const DEFAULT_BACKLOG: u32 = 10;

/// Lifecycle of a [`Listener`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    /// Nothing allocated yet
    Unbound,
    /// Socket bound to its address
    Bound,
    /// Accepting connections
    Listening,
    /// One connector accepted
    Accepted,
    /// Reply sent
    Exchanged,
    /// All handles closed and the address removed
    Closed,
}

/// Server-side Unix socket role
///
/// Accepts a single connection; a second `accept` is an error.
#[derive(Debug)]
pub struct Listener {
    address: SocketAddress,
    backlog: u32,
    control: OpControl,
    state: ListenerState,
    /// Bound socket, until `listen` hands it to tokio
    socket: Option<OwnedFd>,
    listener: Option<UnixListener>,
    connection: Option<Connection>,
    bound: Option<BoundAddress>,
    received: bool,
}

impl Listener {
    /// Create a listener for `address`
    #[must_use]
    pub fn new(address: SocketAddress, control: OpControl) -> Self {
        Self {
            address,
            backlog: DEFAULT_BACKLOG,
            control,
            state: ListenerState::Unbound,
            socket: None,
            listener: None,
            connection: None,
            bound: None,
            received: false,
        }
    }

    /// Override the pending-connection queue length
    #[must_use]
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Get the listening address
    #[must_use]
    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Bind the socket to its address, clearing a stale file first
    ///
    /// # Errors
    ///
    /// `IpcError::SocketFailed` or `IpcError::AddressInUseOrInvalid`.
    pub fn bind(&mut self) -> Result<()> {
        let result = self.bind_inner();
        self.settle(result)
    }

    fn bind_inner(&mut self) -> Result<()> {
        self.expect_state(ListenerState::Unbound, "bind")?;

        let socket = open_stream_socket()?;
        let bound = BoundAddress::bind(&socket, &self.address)?;

        self.socket = Some(socket);
        self.bound = Some(bound);
        self.state = ListenerState::Bound;
        Ok(())
    }

    /// Start accepting connections
    ///
    /// # Errors
    ///
    /// `IpcError::ListenFailed`.
    pub fn listen(&mut self) -> Result<()> {
        let result = self.listen_inner();
        self.settle(result)
    }

    fn listen_inner(&mut self) -> Result<()> {
        self.expect_state(ListenerState::Bound, "listen")?;

        let path = self.address.path().to_path_buf();
        let failed = |source: std::io::Error| IpcError::ListenFailed {
            path: path.clone(),
            source,
        };

        let socket = self
            .socket
            .take()
            .ok_or_else(|| IpcError::InvalidState("bound socket missing".to_string()))?;

        let backlog = i32::try_from(self.backlog)
            .ok()
            .and_then(|n| Backlog::new(n).ok())
            .ok_or_else(|| {
                failed(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("backlog {} out of range", self.backlog),
                ))
            })?;
        listen(&socket, backlog).map_err(|errno| failed(errno.into()))?;

        let std_listener = std::os::unix::net::UnixListener::from(socket);
        std_listener.set_nonblocking(true).map_err(&failed)?;
        let listener = UnixListener::from_std(std_listener).map_err(&failed)?;

        self.listener = Some(listener);
        self.state = ListenerState::Listening;

        tracing::info!(path = ?self.address.path(), backlog = self.backlog, "Socket listening");
        Ok(())
    }

    /// Wait for one connector
    ///
    /// Returns the address the connector bound, if any.
    ///
    /// # Errors
    ///
    /// `IpcError::AcceptFailed`, or `TimedOut`/`Cancelled` from the control.
    pub async fn accept(&mut self) -> Result<Option<PathBuf>> {
        let result = self.accept_inner().await;
        self.settle(result)
    }

    async fn accept_inner(&mut self) -> Result<Option<PathBuf>> {
        self.expect_state(ListenerState::Listening, "accept")?;

        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::InvalidState("Not listening".to_string()))?;

        let (stream, addr) = self
            .control
            .run(Operation::Accept, async {
                listener
                    .accept()
                    .await
                    .map_err(|source| IpcError::AcceptFailed { source })
            })
            .await?;

        let peer = addr.as_pathname().map(std::path::Path::to_path_buf);
        tracing::info!(peer = ?peer, "Connector accepted");

        self.connection = Some(Connection::new(stream, peer.clone()));
        self.state = ListenerState::Accepted;
        Ok(peer)
    }

    /// Read the connector's message
    ///
    /// # Errors
    ///
    /// `IpcError::ReceiveFailed`, or `IpcError::PeerClosed` if the connector
    /// hung up without sending.
    pub async fn receive(&mut self) -> Result<Message> {
        let result = self.receive_inner().await;
        self.settle(result)
    }

    async fn receive_inner(&mut self) -> Result<Message> {
        self.expect_state(ListenerState::Accepted, "receive")?;
        if self.received {
            return Err(IpcError::InvalidState(
                "message already received".to_string(),
            ));
        }

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| IpcError::InvalidState("No connection".to_string()))?;
        let message = connection.receive(MESSAGE_CAPACITY, &self.control).await?;

        self.received = true;
        tracing::info!(message = %message, "Listener received message");
        Ok(message)
    }

    /// Send the reply, unpadded
    ///
    /// # Errors
    ///
    /// `IpcError::SendFailed`.
    pub async fn respond(&mut self, message: &Message) -> Result<usize> {
        let result = self.respond_inner(message).await;
        self.settle(result)
    }

    async fn respond_inner(&mut self, message: &Message) -> Result<usize> {
        self.expect_state(ListenerState::Accepted, "respond")?;

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| IpcError::InvalidState("No connection".to_string()))?;
        let sent = connection
            .send(message.as_bytes(), &self.control)
            .await?;

        self.state = ListenerState::Exchanged;
        tracing::debug!(bytes = sent, "Reply sent");
        Ok(sent)
    }

    /// Close the connection and listening socket, then remove the address
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ListenerState::Closed {
            return;
        }

        self.connection = None;
        self.listener = None;
        self.socket = None;
        if let Some(mut bound) = self.bound.take() {
            bound.release();
        }

        tracing::debug!(path = ?self.address.path(), from = ?self.state, "Listener closed");
        self.state = ListenerState::Closed;
    }

    fn expect_state(&self, expected: ListenerState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(IpcError::InvalidState(format!(
                "{operation} requires {expected:?}, listener is {:?}",
                self.state
            )))
        }
    }

    /// Any error takes the listener straight to `Closed`
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, state = ?self.state, "Listener failed, releasing resources");
            self.close();
        }
        result
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CancelToken;
    use crate::transport::address::lock_path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn listener_in(dir: &TempDir, control: OpControl) -> Listener {
        let address = SocketAddress::new(dir.path().join("server.sock")).unwrap();
        Listener::new(address, control)
    }

    #[tokio::test]
    async fn test_listener_bind_listen_close() {
        let temp_dir = TempDir::new().unwrap();
        let mut listener = listener_in(&temp_dir, OpControl::unbounded());
        assert_eq!(listener.state(), ListenerState::Unbound);

        listener.bind().unwrap();
        assert_eq!(listener.state(), ListenerState::Bound);
        assert!(listener.address().path().exists());

        listener.listen().unwrap();
        assert_eq!(listener.state(), ListenerState::Listening);

        listener.close();
        assert_eq!(listener.state(), ListenerState::Closed);
        assert!(!listener.address().path().exists());
        assert!(!lock_path(listener.address().path()).exists());
    }

    #[tokio::test]
    async fn test_listener_out_of_order_closes() {
        let temp_dir = TempDir::new().unwrap();
        let mut listener = listener_in(&temp_dir, OpControl::unbounded());
        listener.bind().unwrap();

        // Skipping listen is an error, and errors go straight to Closed.
        let result = listener.accept().await;
        assert!(matches!(result, Err(IpcError::InvalidState(_))));
        assert_eq!(listener.state(), ListenerState::Closed);
        assert!(!listener.address().path().exists());
    }

    #[tokio::test]
    async fn test_listener_accept_timeout_releases_address() {
        let temp_dir = TempDir::new().unwrap();
        let control = OpControl::unbounded().with_timeout(Some(Duration::from_millis(30)));
        let mut listener = listener_in(&temp_dir, control);
        listener.bind().unwrap();
        listener.listen().unwrap();

        let result = listener.accept().await;
        assert!(matches!(
            result,
            Err(IpcError::TimedOut {
                operation: Operation::Accept,
                ..
            })
        ));
        assert_eq!(listener.state(), ListenerState::Closed);
        assert!(!listener.address().path().exists());
    }

    #[tokio::test]
    async fn test_listener_accept_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let token = CancelToken::new();
        let mut listener = listener_in(&temp_dir, OpControl::unbounded().with_cancel(token.clone()));
        listener.bind().unwrap();
        listener.listen().unwrap();
        let path = listener.address().path().to_path_buf();

        let pending = tokio::spawn(async move {
            let result = listener.accept().await;
            (listener.state(), result)
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let (state, result) = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(IpcError::Cancelled { .. })));
        assert_eq!(state, ListenerState::Closed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_listener_peer_closed_is_not_a_message() {
        let temp_dir = TempDir::new().unwrap();
        let mut listener = listener_in(&temp_dir, OpControl::unbounded());
        listener.bind().unwrap();
        listener.listen().unwrap();

        let path = listener.address().path().to_path_buf();
        let client = tokio::spawn(async move {
            let stream = tokio::net::UnixStream::connect(&path).await.unwrap();
            drop(stream);
        });

        listener.accept().await.unwrap();
        client.await.unwrap();

        let result = listener.receive().await;
        assert!(matches!(result, Err(IpcError::PeerClosed)));
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn test_listener_drop_removes_address() {
        let temp_dir = TempDir::new().unwrap();
        let mut listener = listener_in(&temp_dir, OpControl::unbounded());
        listener.bind().unwrap();
        let path = listener.address().path().to_path_buf();
        assert!(path.exists());

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_second_listener_on_live_address_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut first = listener_in(&temp_dir, OpControl::unbounded());
        first.bind().unwrap();
        first.listen().unwrap();

        let mut second = listener_in(&temp_dir, OpControl::unbounded());
        let result = second.bind();
        assert!(matches!(
            result,
            Err(IpcError::AddressInUseOrInvalid { .. })
        ));

        // The loser must not remove the winner's address or use up its accept.
        let path = first.address().path().to_path_buf();
        assert!(path.exists());

        let client = tokio::spawn(async move {
            let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
            stream.write_all(b"HELLO FROM CLIENT").await.unwrap();
            let mut reply = vec![0u8; MESSAGE_CAPACITY];
            let n = stream.read(&mut reply).await.unwrap();
            reply.truncate(n);
            reply
        });

        first.accept().await.unwrap();
        let received = first.receive().await.unwrap();
        assert_eq!(received.text(), "HELLO FROM CLIENT");
        first.respond(&Message::new("HELLO FROM SERVER").unwrap()).await.unwrap();
        assert_eq!(first.state(), ListenerState::Exchanged);

        assert_eq!(client.await.unwrap(), b"HELLO FROM SERVER");
    }

    #[tokio::test]
    async fn test_receive_reads_at_most_one_message() {
        let temp_dir = TempDir::new().unwrap();
        let mut listener = listener_in(&temp_dir, OpControl::unbounded());
        listener.bind().unwrap();
        listener.listen().unwrap();

        let path = listener.address().path().to_path_buf();
        let (sent_tx, sent_rx) = tokio::sync::oneshot::channel();
        let client = tokio::spawn(async move {
            let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
            stream.write_all(&[b'x'; MESSAGE_CAPACITY + 44]).await.unwrap();
            sent_tx.send(()).unwrap();
            // Keep the stream open until the listener has read.
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
        });

        listener.accept().await.unwrap();
        sent_rx.await.unwrap();
        let received = listener.receive().await.unwrap();
        assert_eq!(received.len(), MESSAGE_CAPACITY);

        listener.close();
        client.await.unwrap();
    }
}
