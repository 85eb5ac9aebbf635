//! Command-line interface

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use ipc_samples_core::config::{ConfigOverrides, CONFIG_PATH_ENV};
use ipc_samples_core::Role;

/// IPC samples - UNIX domain socket, named pipe and shared-memory roles
#[derive(Parser, Debug)]
#[command(name = "ipc-sample")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = CONFIG_PATH_ENV, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[arg(
        short = 'l',
        long,
        global = true,
        env = "IPC_SAMPLES_LOG_LEVEL",
        default_value = "info"
    )]
    pub log_level: String,

    /// Sample to run
    #[command(subcommand)]
    pub command: Command,
}

/// Samples
#[derive(Subcommand, Debug)]
pub enum Command {
    /// UNIX domain socket handshake
    #[command(subcommand)]
    Socket(SocketCommand),

    /// Named pipe producer/consumer
    #[command(subcommand)]
    Fifo(FifoCommand),

    /// Shared-memory counter
    #[command(subcommand)]
    Shm(ShmCommand),
}

/// Socket roles
#[derive(Subcommand, Debug)]
pub enum SocketCommand {
    /// Accept one connector and answer its greeting
    Listen(ListenArgs),

    /// Greet a listener and wait for the answer
    Connect(ConnectArgs),

    /// Run listener and connector together
    Demo {
        /// Run both roles as tasks in this process instead of child processes
        #[arg(long)]
        in_process: bool,
    },
}

/// Listener options
#[derive(ClapArgs, Debug, Default)]
pub struct ListenArgs {
    /// Address to bind
    #[arg(short = 'a', long, value_name = "PATH")]
    pub address: Option<PathBuf>,

    /// Pending-connection queue length
    #[arg(short = 'b', long, value_name = "N")]
    pub backlog: Option<u32>,

    /// Per-operation timeout in milliseconds (0 = none)
    #[arg(short = 't', long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

/// Connector options
#[derive(ClapArgs, Debug, Default)]
pub struct ConnectArgs {
    /// Listener address to connect to
    #[arg(short = 'a', long, value_name = "PATH")]
    pub address: Option<PathBuf>,

    /// Local address to bind before connecting
    #[arg(long, value_name = "PATH", conflicts_with = "no_local_bind")]
    pub local_address: Option<PathBuf>,

    /// Connect from an unbound socket
    #[arg(long)]
    pub no_local_bind: bool,

    /// Per-operation timeout in milliseconds (0 = none)
    #[arg(short = 't', long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Connect attempts while no listener is bound (1 = no retry)
    #[arg(long, value_name = "N")]
    pub connect_attempts: Option<u32>,
}

/// Named pipe roles
#[derive(Subcommand, Debug)]
pub enum FifoCommand {
    /// Write counter records into the FIFO
    Produce(FifoArgs),

    /// Read counter records from the FIFO
    Consume(FifoArgs),

    /// Run producer and consumer as child processes
    Demo(FifoArgs),
}

/// Options shared by the named pipe roles
#[derive(ClapArgs, Debug, Default)]
pub struct FifoArgs {
    /// FIFO path
    #[arg(short = 'p', long, value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Records to transfer
    #[arg(short = 'n', long, value_name = "N")]
    pub count: Option<u32>,

    /// Per-operation timeout in milliseconds (0 = none)
    #[arg(short = 't', long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

/// Shared-memory roles
#[derive(Subcommand, Debug)]
pub enum ShmCommand {
    /// Take turns incrementing the counter
    TakeTurns(TakeTurnsArgs),

    /// Initialize the counter and run two participants as child processes
    Demo(ShmArgs),
}

/// Options shared by the shared-memory roles
#[derive(ClapArgs, Debug, Default)]
pub struct ShmArgs {
    /// Shared-memory object name (`/name`)
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Turns per participant
    #[arg(short = 'r', long, value_name = "N")]
    pub rounds: Option<u32>,
}

/// Participant options
#[derive(ClapArgs, Debug, Default)]
pub struct TakeTurnsArgs {
    /// Participant id written next to the counter (defaults to the process id)
    #[arg(long)]
    pub id: Option<i32>,

    #[command(flatten)]
    pub shm: ShmArgs,
}

impl Command {
    /// Prefix for the diagnostic printed when this command fails
    pub fn label(&self) -> &'static str {
        match self {
            Self::Socket(SocketCommand::Listen(_)) => Role::Listener.label(),
            Self::Socket(SocketCommand::Connect(_)) => Role::Connector.label(),
            Self::Fifo(FifoCommand::Produce(_)) => Role::Producer.label(),
            Self::Fifo(FifoCommand::Consume(_)) => Role::Consumer.label(),
            Self::Shm(ShmCommand::TakeTurns(_)) => Role::Participant.label(),
            Self::Socket(SocketCommand::Demo { .. })
            | Self::Fifo(FifoCommand::Demo(_))
            | Self::Shm(ShmCommand::Demo(_)) => "DEMO",
        }
    }

    /// CLI flags as configuration overrides
    pub fn overrides(&self) -> ConfigOverrides {
        match self {
            Self::Socket(SocketCommand::Listen(args)) => ConfigOverrides {
                server_address: args.address.clone(),
                backlog: args.backlog,
                timeout_ms: args.timeout_ms,
                ..ConfigOverrides::default()
            },
            Self::Socket(SocketCommand::Connect(args)) => ConfigOverrides {
                server_address: args.address.clone(),
                client_address: args.local_address.clone(),
                no_local_bind: args.no_local_bind,
                timeout_ms: args.timeout_ms,
                connect_attempts: args.connect_attempts,
                ..ConfigOverrides::default()
            },
            Self::Socket(SocketCommand::Demo { .. }) => ConfigOverrides::default(),
            Self::Fifo(
                FifoCommand::Produce(args) | FifoCommand::Consume(args) | FifoCommand::Demo(args),
            ) => ConfigOverrides {
                fifo_path: args.path.clone(),
                fifo_count: args.count,
                timeout_ms: args.timeout_ms,
                ..ConfigOverrides::default()
            },
            Self::Shm(ShmCommand::TakeTurns(TakeTurnsArgs { shm, .. }) | ShmCommand::Demo(shm)) => {
                ConfigOverrides {
                    shm_name: shm.name.clone(),
                    shm_rounds: shm.rounds,
                    ..ConfigOverrides::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_connect_flags() {
        let args = Args::try_parse_from([
            "ipc-sample",
            "socket",
            "connect",
            "--address",
            "srv.sock",
            "--no-local-bind",
            "--connect-attempts",
            "4",
        ])
        .unwrap();

        assert_eq!(args.command.label(), "CLIENT");
        let overrides = args.command.overrides();
        assert_eq!(overrides.server_address, Some(PathBuf::from("srv.sock")));
        assert!(overrides.no_local_bind);
        assert_eq!(overrides.connect_attempts, Some(4));
    }

    #[test]
    fn test_local_address_conflicts_with_no_local_bind() {
        let result = Args::try_parse_from([
            "ipc-sample",
            "socket",
            "connect",
            "--local-address",
            "c.sock",
            "--no-local-bind",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let args =
            Args::try_parse_from(["ipc-sample", "shm", "take-turns", "--id", "3", "-c", "x.toml"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
        assert_eq!(args.command.label(), "PARTICIPANT");
        assert!(matches!(
            args.command,
            Command::Shm(ShmCommand::TakeTurns(TakeTurnsArgs { id: Some(3), .. }))
        ));
    }

    #[test]
    fn test_demo_labels() {
        let args = Args::try_parse_from(["ipc-sample", "fifo", "demo", "-n", "2"]).unwrap();
        assert_eq!(args.command.label(), "DEMO");
        assert_eq!(args.command.overrides().fifo_count, Some(2));
    }
}
