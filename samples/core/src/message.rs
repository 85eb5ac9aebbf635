//! Fixed-Capacity Messages
//!
//! The socket sample carries short strings in a fixed 256-byte buffer with no
//! length prefix. The receiver knows how many bytes arrived from the read
//! itself; anything from the first NUL onwards is padding, not content.

use std::borrow::Cow;
use std::fmt;

use crate::error::{IpcError, Result};

/// Buffer capacity used by both socket roles
pub const MESSAGE_CAPACITY: usize = 256;

/// Greeting the connector sends
pub const CLIENT_GREETING: &str = "HELLO FROM CLIENT";

/// Reply the listener sends back
pub const SERVER_GREETING: &str = "HELLO FROM SERVER";

/// A short text payload that fits the fixed buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8>,
}

impl Message {
    /// Build a message from text
    ///
    /// One byte of the buffer is kept for the terminating NUL, so the text may
    /// be at most `MESSAGE_CAPACITY - 1` bytes and must not contain NUL.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::MessageTooLong` if the text does not fit, or
    /// `IpcError::InvalidState` if it contains a NUL byte.
    pub fn new(text: &str) -> Result<Self> {
        if text.len() >= MESSAGE_CAPACITY {
            return Err(IpcError::MessageTooLong {
                len: text.len(),
                capacity: MESSAGE_CAPACITY,
            });
        }
        if text.as_bytes().contains(&0) {
            return Err(IpcError::InvalidState(
                "message text contains a NUL byte".to_string(),
            ));
        }
        Ok(Self {
            bytes: text.as_bytes().to_vec(),
        })
    }

    /// Interpret the bytes of one read
    ///
    /// `received` must be exactly the bytes the read reported; content ends at
    /// the first NUL.
    #[must_use]
    pub fn from_received(received: &[u8]) -> Self {
        let end = received
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(received.len());
        Self {
            bytes: received[..end].to_vec(),
        }
    }

    /// Content bytes, without padding
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content as text (lossy for non-UTF-8 input)
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Content length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the message has no content
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content null-padded to the full buffer capacity
    #[must_use]
    pub fn padded(&self) -> Vec<u8> {
        let mut buf = vec![0u8; MESSAGE_CAPACITY];
        buf[..self.bytes.len()].copy_from_slice(&self.bytes);
        buf
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_padding_is_not_content() {
        let msg = Message::new(CLIENT_GREETING).unwrap();
        let padded = msg.padded();
        assert_eq!(padded.len(), MESSAGE_CAPACITY);

        let received = Message::from_received(&padded);
        assert_eq!(received.text(), CLIENT_GREETING);
        assert_eq!(received.len(), CLIENT_GREETING.len());
    }

    #[test]
    fn test_unpadded_read() {
        let received = Message::from_received(SERVER_GREETING.as_bytes());
        assert_eq!(received, Message::new(SERVER_GREETING).unwrap());
    }

    #[test]
    fn test_garbage_after_nul_ignored() {
        let received = Message::from_received(b"HI\0stale bytes");
        assert_eq!(received.as_bytes(), b"HI");
    }

    #[test]
    fn test_too_long() {
        let text = "x".repeat(MESSAGE_CAPACITY);
        assert!(matches!(
            Message::new(&text),
            Err(IpcError::MessageTooLong { len: 256, .. })
        ));

        let fits = "x".repeat(MESSAGE_CAPACITY - 1);
        assert!(Message::new(&fits).is_ok());
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert!(matches!(
            Message::new("a\0b"),
            Err(IpcError::InvalidState(_))
        ));
    }
}
