//! IPC Samples Core - POSIX Inter-Process Communication Roles
//!
//! This crate holds the role logic for a small set of IPC samples, with no
//! dependency on the command-line runner. Each role can run as its own OS
//! process or as a tokio task next to its peer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ipc-sample (runner)                       │
//! │       CLI dispatch · config · logging · signals · exit codes     │
//! └───────────────┬──────────────────┬──────────────────┬────────────┘
//!                 │                  │                  │
//! ┌───────────────┼──────────────────┼──────────────────┼────────────┐
//! │               ▼       IPC SAMPLES CORE              ▼            │
//! │  ┌──────────────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │  transport (socket)  │  │     fifo     │  │      shm       │  │
//! │  │ Listener ◄► Connector│  │ produce ──►  │  │ SharedCounter  │  │
//! │  │     BoundAddress     │  │   consume    │  │  take_turn     │  │
//! │  └──────────┬───────────┘  └──────┬───────┘  └───────┬────────┘  │
//! │             └──────── OpControl (timeout/cancel) ────┘           │
//! │                         IpcError · Message · CounterRecord       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Listener`] / [`Connector`]: the two halves of the socket handshake
//! - [`BoundAddress`]: unlink-then-bind, removed exactly once
//! - [`NamedPipe`]: FIFO created on demand and removed on drop
//! - [`SharedCounter`]: lock-guarded counter in POSIX shared memory
//! - [`OpControl`]: per-operation timeout and cancellation
//! - [`IpcError`]: every failure a role can report
//!
//! # Quick Start
//!
//! ```ignore
//! use ipc_samples_core::{run_exchange, Connector, Listener, OpControl, SocketAddress};
//!
//! #[tokio::main]
//! async fn main() -> ipc_samples_core::Result<()> {
//!     let server = SocketAddress::new("unix_sock.server")?;
//!     let client = SocketAddress::new("unix_sock.client")?;
//!
//!     let listener = Listener::new(server.clone(), OpControl::unbounded());
//!     let connector = Connector::new(server, Some(client), OpControl::unbounded());
//!
//!     let (server_report, client_report) = run_exchange(listener, connector).await?;
//!     println!("{} / {}", server_report.received, client_report.reply);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: UNIX domain socket listener and connector
//! - [`exchange`]: the scripted greeting each socket role runs
//! - [`fifo`]: named pipe producer and consumer
//! - [`shm`]: shared-memory counter and participants
//! - [`control`]: timeouts and cancellation for suspension points
//! - [`config`]: layered configuration (defaults, TOML, env, CLI)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod control;
pub mod error;
pub mod exchange;
pub mod fifo;
pub mod message;
pub mod record;
pub mod role;
pub mod shm;
pub mod transport;

// Re-exports for convenience
pub use control::{CancelToken, OpControl, Operation};
pub use error::{IpcError, Result};
pub use message::{Message, CLIENT_GREETING, MESSAGE_CAPACITY, SERVER_GREETING};
pub use record::CounterRecord;
pub use role::Role;

// Socket exports
pub use exchange::{
    answer_one, client_greeting, greet_once, run_exchange, serve_once, server_greeting,
    ConnectorReport, ListenerReport,
};
pub use transport::{
    remove_address, BoundAddress, ConnectRetry, Connector, ConnectorState, Listener,
    ListenerState, SocketAddress,
};

// FIFO exports
pub use fifo::{consume, produce, FifoPlan, NamedPipe};

// Shared-memory exports
pub use shm::{take_turns, SharedCounter, Turn, TurnPlan};

// Config exports
pub use config::{
    load_config, load_config_from_path, load_config_with, ConfigError, ConfigOverrides,
    ConfigSource, SamplesConfig,
};
