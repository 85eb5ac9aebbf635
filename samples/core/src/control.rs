//! Suspension-Point Control
//!
//! Every blocking step of a role (accept, connect, send, receive, FIFO
//! open/read/write) runs through [`OpControl::run`], which applies an
//! optional timeout and an optional [`CancelToken`]. With neither set the
//! step waits indefinitely.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{IpcError, Result};

/// The suspension points a role can be waiting in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Waiting for a connector
    Accept,
    /// Waiting for a listener to take the connection
    Connect,
    /// Waiting for the OS to take outgoing bytes
    Send,
    /// Waiting for incoming bytes
    Receive,
    /// Waiting for the other end of a FIFO to open
    Open,
    /// Waiting for the shared-memory lock
    Lock,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Connect => write!(f, "connect"),
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
            Self::Open => write!(f, "open"),
            Self::Lock => write!(f, "lock"),
        }
    }
}

/// Cancellation handle shared between a role and whoever may stop it
///
/// Cancelling is sticky: operations started after `cancel()` fail
/// immediately.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel every operation waiting on this token
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `cancel()` has been called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Timeout and cancellation applied to each suspension point
#[derive(Clone, Debug, Default)]
pub struct OpControl {
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl OpControl {
    /// No timeout, no cancellation
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Limit each suspension point to `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Abort pending operations when `token` is cancelled
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Configured per-operation timeout
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run one suspension point under this control
    ///
    /// # Errors
    ///
    /// Returns `IpcError::TimedOut` or `IpcError::Cancelled` when the limit
    /// elapses or the token fires first, otherwise whatever `fut` returns.
    pub async fn run<T, F>(&self, operation: Operation, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(IpcError::Cancelled { operation });
        }

        let bounded = async {
            match self.timeout {
                Some(after) => tokio::time::timeout(after, fut)
                    .await
                    .map_err(|_| IpcError::TimedOut { operation, after })?,
                None => fut.await,
            }
        };

        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::debug!(%operation, "Operation cancelled");
                    Err(IpcError::Cancelled { operation })
                }
                result = bounded => result,
            },
            None => bounded.await,
        }
    }
}
