//! Named Pipe Producer/Consumer
//!
//! The producer writes a fixed number of [`CounterRecord`]s into a FIFO; the
//! consumer reads them back with exact-size reads. Opening either end waits
//! until the other end opens, which is the FIFO's rendezvous.
//!
//! Both roles create the FIFO if it is missing and remove it when they are
//! done, so whichever finishes first cleans up.

use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::control::{OpControl, Operation};
use crate::error::{IpcError, Result};
use crate::record::{CounterRecord, RECORD_SIZE};
use crate::transport::remove_address;

/// Records exchanged per run unless configured otherwise
pub const DEFAULT_RECORD_COUNT: u32 = 5;

/// Pause between records unless configured otherwise
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// A FIFO on the filesystem, removed when dropped
#[derive(Debug)]
pub struct NamedPipe {
    path: PathBuf,
}

impl NamedPipe {
    /// Create the FIFO with mode 0666, or reuse an existing one
    ///
    /// # Errors
    ///
    /// Returns `IpcError::FifoFailed` if `mkfifo` fails or a non-FIFO file
    /// already occupies the path.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        match mkfifo(&path, Mode::from_bits_truncate(0o666)) {
            Ok(()) => info!(path = ?path, "Created FIFO"),
            Err(Errno::EEXIST) => {
                let is_fifo = std::fs::symlink_metadata(&path)
                    .map(|meta| meta.file_type().is_fifo())
                    .map_err(|source| fifo_error(&path, source))?;
                if !is_fifo {
                    return Err(fifo_error(
                        &path,
                        io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a FIFO"),
                    ));
                }
                debug!(path = ?path, "Reusing existing FIFO");
            }
            Err(errno) => return Err(fifo_error(&path, errno.into())),
        }

        Ok(Self { path })
    }

    /// The FIFO path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self, write: bool, control: &OpControl) -> Result<File> {
        let path = self.path.clone();
        let result = control
            .run(Operation::Open, async {
                OpenOptions::new()
                    .read(!write)
                    .write(write)
                    .open(&path)
                    .await
                    .map_err(|source| fifo_error(&path, source))
            })
            .await;

        if result.is_err() {
            self.release_abandoned_open(write);
        }
        result
    }

    /// Complete an open abandoned on timeout or cancellation
    ///
    /// The blocking `open(2)` keeps waiting for a peer after its future is
    /// dropped. Opening the other end without blocking lets it return.
    fn release_abandoned_open(&self, write: bool) {
        let poke = std::fs::OpenOptions::new()
            .read(write)
            .write(!write)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path);
        if let Err(e) = poke {
            debug!(error = %e, path = ?self.path, "No pending FIFO open to release");
        }
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        match remove_address(&self.path) {
            Ok(true) => debug!(path = ?self.path, "Removed FIFO"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, path = ?self.path, "Failed to remove FIFO"),
        }
    }
}

/// Settings shared by both FIFO roles
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FifoPlan {
    /// FIFO path
    pub path: PathBuf,
    /// Records to transfer
    pub count: u32,
    /// Pause between records
    pub interval: Duration,
}

impl FifoPlan {
    /// Default count and interval at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            count: DEFAULT_RECORD_COUNT,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Write `plan.count` records tagged with `pid`
///
/// Returns the records written, in order.
///
/// # Errors
///
/// `IpcError::FifoFailed` on any FIFO error, or `TimedOut`/`Cancelled` from
/// the control.
pub async fn produce(plan: &FifoPlan, pid: i32, control: &OpControl) -> Result<Vec<CounterRecord>> {
    let pipe = NamedPipe::create(&plan.path)?;
    let mut file = pipe.open(true, control).await?;
    info!(path = ?pipe.path(), "Producer opened FIFO");

    let mut written = Vec::new();
    for i in 0..plan.count {
        let record = CounterRecord::new(pid, i32::try_from(i).unwrap_or(i32::MAX));
        let bytes = record.to_bytes();

        control
            .run(Operation::Send, async {
                file.write_all(&bytes)
                    .await
                    .map_err(|source| fifo_error(pipe.path(), source))?;
                file.flush()
                    .await
                    .map_err(|source| fifo_error(pipe.path(), source))
            })
            .await?;

        info!(pid, counter = record.counter, "Wrote record");
        written.push(record);

        if i + 1 < plan.count {
            tokio::time::sleep(plan.interval).await;
        }
    }

    Ok(written)
}

/// Read `plan.count` records
///
/// # Errors
///
/// `IpcError::PeerClosed` if the producer closes early, `IpcError::FifoFailed`
/// on any other FIFO error, or `TimedOut`/`Cancelled` from the control.
pub async fn consume(plan: &FifoPlan, control: &OpControl) -> Result<Vec<CounterRecord>> {
    let pipe = NamedPipe::create(&plan.path)?;
    let mut file = pipe.open(false, control).await?;
    info!(path = ?pipe.path(), "Consumer opened FIFO");

    let mut received = Vec::new();
    for _ in 0..plan.count {
        let mut bytes = [0u8; RECORD_SIZE];
        control
            .run(Operation::Receive, async {
                match file.read_exact(&mut bytes).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(IpcError::PeerClosed),
                    Err(source) => Err(fifo_error(pipe.path(), source)),
                }
            })
            .await?;

        let record = CounterRecord::from_bytes(bytes);
        info!(from = record.pid, counter = record.counter, "Read record");
        received.push(record);
    }

    Ok(received)
}

fn fifo_error(path: &Path, source: io::Error) -> IpcError {
    IpcError::FifoFailed {
        path: path.to_path_buf(),
        source,
    }
}
