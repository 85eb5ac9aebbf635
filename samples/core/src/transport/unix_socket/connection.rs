//! An accepted or connected stream, owned by exactly one role.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::control::{OpControl, Operation};
use crate::error::{IpcError, Result};
use crate::message::Message;

/// Bidirectional byte stream between one listener and one connector
///
/// Closed when dropped.
#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
    peer: Option<PathBuf>,
}

impl Connection {
    pub(crate) fn new(stream: UnixStream, peer: Option<PathBuf>) -> Self {
        Self { stream, peer }
    }

    /// Address the other end reported (None if it never bound one)
    #[must_use]
    pub fn peer_address(&self) -> Option<&Path> {
        self.peer.as_deref()
    }

    /// Read one message with a single read of at most `capacity` bytes
    ///
    /// # Errors
    ///
    /// Returns `IpcError::PeerClosed` on a zero-byte read and
    /// `IpcError::ReceiveFailed` on an OS error.
    pub async fn receive(&mut self, capacity: usize, control: &OpControl) -> Result<Message> {
        let mut buf = vec![0u8; capacity];
        let stream = &mut self.stream;

        let n = control
            .run(Operation::Receive, async {
                stream
                    .read(&mut buf)
                    .await
                    .map_err(|source| IpcError::ReceiveFailed { source })
            })
            .await?;

        if n == 0 {
            return Err(IpcError::PeerClosed);
        }

        tracing::debug!(bytes = n, "Received segment");
        Ok(Message::from_received(&buf[..n]))
    }

    /// Write all of `bytes`
    ///
    /// # Errors
    ///
    /// Returns `IpcError::SendFailed` on an OS error.
    pub async fn send(&mut self, bytes: &[u8], control: &OpControl) -> Result<usize> {
        let stream = &mut self.stream;

        control
            .run(Operation::Send, async {
                stream
                    .write_all(bytes)
                    .await
                    .map_err(|source| IpcError::SendFailed { source })?;
                Ok(bytes.len())
            })
            .await
    }
}
