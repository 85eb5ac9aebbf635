//! Multi-process demos
//!
//! Each demo re-runs this executable once per role and waits for every child.
//! Children inherit stdout/stderr, the working directory and the environment.
//! On cancellation they get SIGTERM and a grace period to release their
//! sockets and FIFOs before they are killed.

use std::ffi::OsString;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ipc_samples_core::{CancelToken, CounterRecord, SamplesConfig, SharedCounter};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Connect attempts the demo connector makes while the listener starts up
const DEMO_CONNECT_ATTEMPTS: u32 = 20;

/// How long cancelled children get to exit on SIGTERM before SIGKILL
const CHILD_GRACE: Duration = Duration::from_secs(2);

/// Listener and connector as separate processes
pub async fn socket(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let (listen, connect) = socket_role_args(config);

    // The connector retries, so the launch order does not matter.
    let children = vec![
        ("listener", spawn(config, &listen)?),
        ("connector", spawn(config, &connect)?),
    ];
    wait_all(children, &cancel).await
}

/// Producer and consumer as separate processes
pub async fn fifo(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let children = vec![
        ("producer", spawn(config, &fifo_role_args(config, "produce"))?),
        ("consumer", spawn(config, &fifo_role_args(config, "consume"))?),
    ];
    wait_all(children, &cancel).await
}

/// Initialize the counter, run two participants, report and unlink
pub async fn shm(config: &SamplesConfig, cancel: CancelToken) -> Result<()> {
    let counter = config.shm.counter()?;
    on_counter(&counter, |c| c.initialize(CounterRecord::UNOWNED)).await?;
    println!("Initialized the counter.");

    let outcome = match (
        spawn(config, &shm_role_args(config, &counter, 1)),
        spawn(config, &shm_role_args(config, &counter, 2)),
    ) {
        (Ok(first), Ok(second)) => {
            wait_all(vec![("participant 1", first), ("participant 2", second)], &cancel).await
        }
        (Err(e), _) | (_, Err(e)) => Err(e),
    };

    let finished = match outcome {
        Ok(()) => on_counter(&counter, SharedCounter::read).await.map(|record| {
            println!(
                "Final counter {} written by participant {}.",
                record.counter, record.pid
            );
        }),
        Err(e) => Err(e),
    };

    // The object outlives its users, so the demo removes it either way.
    on_counter(&counter, SharedCounter::unlink).await?;
    finished
}

/// Run a locking counter call on the blocking pool
async fn on_counter<T, F>(counter: &SharedCounter, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SharedCounter) -> ipc_samples_core::Result<T> + Send + 'static,
{
    let counter = counter.clone();
    let result = tokio::task::spawn_blocking(move || call(&counter))
        .await
        .context("shared-memory task failed")?;
    Ok(result?)
}

/// `socket listen` and `socket connect` argument lists
pub(crate) fn socket_role_args(config: &SamplesConfig) -> (Vec<OsString>, Vec<OsString>) {
    let socket = &config.socket;

    let mut listen: Vec<OsString> = vec!["socket".into(), "listen".into()];
    listen.extend(flag("--address", socket.server_address.as_os_str()));
    listen.extend(flag("--backlog", socket.backlog.to_string()));
    listen.extend(timeout_flag(config));

    let mut connect: Vec<OsString> = vec!["socket".into(), "connect".into()];
    connect.extend(flag("--address", socket.server_address.as_os_str()));
    match &socket.client_address {
        Some(local) => connect.extend(flag("--local-address", local.as_os_str())),
        None => connect.push("--no-local-bind".into()),
    }
    let attempts = socket.retry.attempts.max(DEMO_CONNECT_ATTEMPTS);
    connect.extend(flag("--connect-attempts", attempts.to_string()));
    connect.extend(timeout_flag(config));

    (listen, connect)
}

/// `fifo produce` or `fifo consume` argument list
pub(crate) fn fifo_role_args(config: &SamplesConfig, role: &str) -> Vec<OsString> {
    let fifo = &config.fifo;
    let mut args: Vec<OsString> = vec!["fifo".into(), role.into()];
    args.extend(flag("--path", fifo.path.as_os_str()));
    args.extend(flag("--count", fifo.count.to_string()));
    args.extend(timeout_flag(config));
    args
}

/// `shm take-turns` argument list for participant `id`
pub(crate) fn shm_role_args(
    config: &SamplesConfig,
    counter: &SharedCounter,
    id: i32,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["shm".into(), "take-turns".into()];
    args.extend(flag("--name", counter.name()));
    args.extend(flag("--rounds", config.shm.rounds.to_string()));
    args.extend(flag("--id", id.to_string()));
    args
}

fn flag(name: &str, value: impl Into<OsString>) -> [OsString; 2] {
    [name.into(), value.into()]
}

fn timeout_flag(config: &SamplesConfig) -> Vec<OsString> {
    config
        .socket
        .timeout
        .map(|t| flag("--timeout-ms", t.as_millis().to_string()).to_vec())
        .unwrap_or_default()
}

fn spawn(config: &SamplesConfig, args: &[OsString]) -> Result<Child> {
    let exe = std::env::current_exe().context("cannot locate the ipc-sample executable")?;

    let mut command = Command::new(&exe);
    if let Some(path) = &config.config_file_path {
        command.arg("--config").arg(path);
    }
    // Backstop only; cancellation stops children with SIGTERM first.
    command.args(args).kill_on_drop(true);

    let child = command
        .spawn()
        .with_context(|| format!("failed to start {} {}", exe.display(), display_args(args)))?;
    info!(pid = child.id(), args = %display_args(args), "Started child");
    Ok(child)
}

async fn wait_all(mut children: Vec<(&'static str, Child)>, cancel: &CancelToken) -> Result<()> {
    let mut failed = Vec::new();

    for i in 0..children.len() {
        let name = children[i].0;
        let child = &mut children[i].1;

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            () = cancel.cancelled() => None,
        };
        let Some(status) = waited else {
            stop_all(&mut children).await;
            bail!("cancelled while waiting for child processes");
        };

        let status: ExitStatus = status.with_context(|| format!("failed to wait for {name}"))?;
        if !status.success() {
            failed.push(format!("{name} exited with {status}"));
        }
    }

    if !failed.is_empty() {
        bail!("{}", failed.join("; "));
    }
    Ok(())
}

/// SIGTERM every running child, then SIGKILL whatever is left after the grace period
async fn stop_all(children: &mut [(&'static str, Child)]) {
    for (name, child) in children.iter_mut() {
        let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
            continue;
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => info!(pid, child = %name, "Forwarded SIGTERM"),
            Err(e) => warn!(pid, child = %name, error = %e, "Failed to forward SIGTERM"),
        }
    }

    let deadline = tokio::time::Instant::now() + CHILD_GRACE;
    for (name, child) in children.iter_mut() {
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => info!(child = %name, %status, "Child stopped"),
            Ok(Err(e)) => warn!(child = %name, error = %e, "Failed to wait for child"),
            Err(_) => {
                warn!(child = %name, "Child ignored SIGTERM, killing it");
                if let Err(e) = child.kill().await {
                    warn!(child = %name, error = %e, "Failed to kill child");
                }
            }
        }
    }
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
