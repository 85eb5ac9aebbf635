//! Role bodies
//!
//! Each function runs one sample role against the resolved configuration and
//! prints its transcript on stdout. Logs go to stderr.

use std::path::Path;

use anyhow::{Context, Result};
use ipc_samples_core::{
    client_greeting, consume, produce, run_exchange, server_greeting, take_turns, CancelToken,
    ConnectorReport, IpcError, ListenerReport, Operation, SamplesConfig, Turn,
};
use tracing::info;

/// Bind, listen, answer one connector, reporting each step as it completes
pub async fn listen(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let control = config.socket.control(cancel);
    let mut listener = config.socket.listener(control)?;
    let reply = server_greeting()?;

    listener.bind()?;
    listener.listen()?;
    println!("SERVER: Socket listening...");

    let peer = listener.accept().await?;
    print_peer(peer.as_deref());

    println!("SERVER: Waiting for message...");
    let received = listener.receive().await?;
    println!("SERVER: Server received message: {received}.");

    let replied = listener.respond(&reply).await?;
    println!("SERVER: Responded with {replied} bytes");

    listener.close();
    println!("SERVER: Done!");
    Ok(())
}

/// Greet the listener and wait for its answer, reporting each step
pub async fn connect(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let control = config.socket.control(cancel);
    let mut connector = config.socket.connector(control)?;
    let greeting = client_greeting()?;

    if connector.local().is_some() {
        connector.bind()?;
    }
    connector.connect().await?;
    println!("CLIENT: Connected to server.");

    connector.send(&greeting).await?;
    println!("CLIENT: Sent a message to server.");

    let reply = connector.receive().await?;
    println!("CLIENT: Message received: {reply}");

    connector.close();
    println!("CLIENT: Done!");
    Ok(())
}

/// Both socket roles as tasks of this process
pub async fn exchange_in_process(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let listener = config.socket.listener(config.socket.control(cancel.clone()))?;
    let connector = config.socket.connector(config.socket.control(cancel))?;

    let (server, client) = run_exchange(listener, connector).await?;
    print_listener(&server);
    print_connector(&client);
    Ok(())
}

fn print_peer(peer: Option<&Path>) {
    match peer {
        Some(peer) => println!("SERVER: Connected to client at: {}", peer.display()),
        None => println!("SERVER: Connected to an unbound client"),
    }
}

fn print_listener(report: &ListenerReport) {
    print_peer(report.peer.as_deref());
    println!("SERVER: Server received message: {}.", report.received);
    println!("SERVER: Responded with {} bytes", report.replied);
    println!("SERVER: Done!");
}

fn print_connector(report: &ConnectorReport) {
    println!("CLIENT: Connected to server.");
    println!("CLIENT: Sent a message to server.");
    println!("CLIENT: Message received: {}", report.reply);
    println!("CLIENT: Done!");
}

/// Write the configured number of records
pub async fn fifo_produce(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let control = config.socket.control(cancel);
    let pid = current_pid()?;

    let written = produce(&config.fifo.plan(), pid, &control).await?;
    for record in &written {
        println!("PRODUCER {pid}: Wrote {}.", record.counter);
    }
    Ok(())
}

/// Read the configured number of records
pub async fn fifo_consume(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let control = config.socket.control(cancel);
    let pid = current_pid()?;

    let received = consume(&config.fifo.plan(), &control).await?;
    for record in &received {
        println!(
            "CONSUMER {pid}: Received value {} from process {}.",
            record.counter, record.pid
        );
    }
    Ok(())
}

/// Take the configured number of turns on the shared counter
pub async fn shm_take_turns(
    config: &SamplesConfig,
    id: Option<i32>,
    cancel: CancelToken,
) -> Result<()> {
    let participant = match id {
        Some(id) => id,
        None => current_pid()?,
    };
    let plan = config.shm.plan()?;

    let turns = tokio::select! {
        turns = take_turns(&plan, participant) => turns?,
        () = cancel.cancelled() => {
            return Err(IpcError::Cancelled { operation: Operation::Lock }.into());
        }
    };

    for turn in &turns {
        match turn {
            Turn::Waiting => println!("PARTICIPANT {participant}: No new value available."),
            Turn::Advanced { from, value } => println!(
                "PARTICIPANT {participant}: Received {} from {from}, wrote {value}.",
                value.wrapping_sub(1)
            ),
        }
    }
    println!("PARTICIPANT {participant}: End after {} turns", turns.len());
    info!(participant, "Participant finished");
    Ok(())
}

fn current_pid() -> Result<i32> {
    i32::try_from(std::process::id()).context("process id does not fit an i32")
}
