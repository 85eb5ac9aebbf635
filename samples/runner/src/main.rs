//! IPC Sample Runner
//!
//! One executable for every role of the IPC samples. The role is picked by
//! subcommand; `demo` subcommands re-run this executable once per role.
//!
//! # Usage
//!
//! ```bash
//! # Socket handshake as two processes
//! ipc-sample socket demo
//!
//! # Or by hand, in two terminals
//! ipc-sample socket listen
//! ipc-sample socket connect
//!
//! # Named pipe and shared memory
//! ipc-sample fifo demo
//! ipc-sample shm demo
//!
//! # With a config file and verbose logging
//! RUST_LOG=debug ipc-sample --config samples.toml socket demo --in-process
//! ```
//!
//! # Output
//!
//! The sample transcript goes to stdout, logs to stderr. A failed role prints
//! `ROLE: error` (for example `CLIENT: failed to connect ...`) on stderr and
//! exits with status 1.
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: cancel the pending operation; sockets, FIFOs and
//!   bound addresses are released before exit. Demos forward SIGTERM to their
//!   child processes and wait for them before exiting.

mod cli;
mod demo;
mod roles;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ipc_samples_core::{load_config_from_path, CancelToken};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use cli::{Args, Command, FifoCommand, ShmCommand, SocketCommand};

/// How long exit waits for blocking work (such as a FIFO open nobody answers)
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Initialize logging on stderr with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("ipc_sample={level},ipc_samples_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `token` on the first SIGINT or SIGTERM
///
/// The handlers are registered before this returns, so a signal arriving
/// while the role starts up is never handled by the default action.
fn spawn_signal_handler(token: CancelToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, cancelling"),
            _ = sigint.recv() => info!("Received SIGINT, cancelling"),
        }
        token.cancel();
    });
}

async fn run(args: Args, cancel: CancelToken) -> Result<()> {
    let mut config = load_config_from_path(args.config.clone())
        .with_context(|| "Failed to load configuration")?;
    args.command
        .overrides()
        .apply(&mut config)
        .with_context(|| "Invalid command-line option")?;
    debug!(source = %config.source(), ?config, "Configuration resolved");

    match &args.command {
        Command::Socket(SocketCommand::Listen(_)) => roles::listen(&config, cancel).await,
        Command::Socket(SocketCommand::Connect(_)) => roles::connect(&config, cancel).await,
        Command::Socket(SocketCommand::Demo { in_process: true }) => {
            roles::exchange_in_process(&config, cancel).await
        }
        Command::Socket(SocketCommand::Demo { in_process: false }) => {
            demo::socket(&config, cancel).await
        }
        Command::Fifo(FifoCommand::Produce(_)) => roles::fifo_produce(&config, cancel).await,
        Command::Fifo(FifoCommand::Consume(_)) => roles::fifo_consume(&config, cancel).await,
        Command::Fifo(FifoCommand::Demo(_)) => demo::fifo(&config, cancel).await,
        Command::Shm(ShmCommand::TakeTurns(turns)) => {
            roles::shm_take_turns(&config, turns.id, cancel).await
        }
        Command::Shm(ShmCommand::Demo(_)) => demo::shm(&config, cancel).await,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let label = args.command.label();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{label}: failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancelToken::new();
    let result = runtime.block_on(async {
        spawn_signal_handler(cancel.clone());
        run(args, cancel).await
    });

    // A FIFO open abandoned on cancellation keeps a blocking thread busy.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{label}: {e:#}");
            ExitCode::FAILURE
        }
    }
}
