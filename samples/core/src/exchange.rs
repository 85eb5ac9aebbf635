//! Handshake Role Bodies
//!
//! The scripted exchange each socket role runs: the connector says
//! `HELLO FROM CLIENT`, the listener answers `HELLO FROM SERVER`, both tear
//! down. [`run_exchange`] runs both roles as tasks in one process.

use std::path::PathBuf;

use crate::error::{IpcError, Result};
use crate::message::{Message, CLIENT_GREETING, SERVER_GREETING};
use crate::transport::{Connector, Listener};

/// What the listener saw during its run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerReport {
    /// Address the connector bound, if any
    pub peer: Option<PathBuf>,
    /// Message received from the connector
    pub received: Message,
    /// Reply bytes written
    pub replied: usize,
}

/// What the connector saw during its run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorReport {
    /// Greeting bytes written (padding included)
    pub sent: usize,
    /// Reply received from the listener
    pub reply: Message,
}

/// Bind, listen, then answer one connector
///
/// # Errors
///
/// The first error of any step; the listener has already released its
/// handles and address by then.
pub async fn serve_once(mut listener: Listener, reply: &Message) -> Result<ListenerReport> {
    listener.bind()?;
    listener.listen()?;
    answer_one(listener, reply).await
}

/// Accept, receive, respond and close on a listener that is already listening
///
/// # Errors
///
/// The first error of any step.
pub async fn answer_one(mut listener: Listener, reply: &Message) -> Result<ListenerReport> {
    tracing::info!(path = ?listener.address().path(), "Waiting for connector");
    let peer = listener.accept().await?;
    let received = listener.receive().await?;
    let replied = listener.respond(reply).await?;
    listener.close();

    Ok(ListenerReport {
        peer,
        received,
        replied,
    })
}

/// Bind (when a local address is configured), connect, send, await the reply
///
/// # Errors
///
/// The first error of any step; the connector has already released its
/// handles and address by then.
pub async fn greet_once(mut connector: Connector, greeting: &Message) -> Result<ConnectorReport> {
    if connector.local().is_some() {
        connector.bind()?;
    }
    connector.connect().await?;
    let sent = connector.send(greeting).await?;
    let reply = connector.receive().await?;
    connector.close();

    Ok(ConnectorReport { sent, reply })
}

/// The reference greeting the connector sends
///
/// # Errors
///
/// Never in practice; the constant fits the buffer.
pub fn client_greeting() -> Result<Message> {
    Message::new(CLIENT_GREETING)
}

/// The reference reply the listener sends
///
/// # Errors
///
/// Never in practice; the constant fits the buffer.
pub fn server_greeting() -> Result<Message> {
    Message::new(SERVER_GREETING)
}

/// Run both roles of the reference exchange as concurrent tasks
///
/// The listener is bound and listening before the connector starts, so no
/// connect retry is needed.
///
/// # Errors
///
/// The listener's error if it failed, otherwise the connector's.
pub async fn run_exchange(
    mut listener: Listener,
    connector: Connector,
) -> Result<(ListenerReport, ConnectorReport)> {
    listener.bind()?;
    listener.listen()?;

    let reply = server_greeting()?;
    let greeting = client_greeting()?;

    let server = tokio::spawn(async move { answer_one(listener, &reply).await });
    let client = tokio::spawn(async move { greet_once(connector, &greeting).await });

    let (server, client) = tokio::join!(server, client);
    let server = server.map_err(|e| IpcError::InvalidState(format!("listener task failed: {e}")))?;
    let client = client.map_err(|e| IpcError::InvalidState(format!("connector task failed: {e}")))?;

    Ok((server?, client?))
}
