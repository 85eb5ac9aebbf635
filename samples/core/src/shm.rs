//! Shared-Memory Counter
//!
//! Participants take turns incrementing a [`CounterRecord`] kept in a POSIX
//! shared-memory object. A participant only increments when someone else
//! wrote last.
//!
//! Every read-modify-write happens under an exclusive `flock` on the
//! shared-memory descriptor. Each operation opens its own descriptor, so the
//! lock excludes other processes and other threads of this process alike.
//!
//! ```text
//! shm_open ─► flock(EX) ─► ftruncate ─► mmap ─► read/modify/write ─► munmap ─► unlock+close
//! ```

use std::io;
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::ptr::NonNull;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg, OFlag};
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use tracing::{debug, info};

use crate::error::{IpcError, Result};
use crate::record::{CounterRecord, RECORD_SIZE};

/// Turns each participant takes unless configured otherwise
pub const DEFAULT_ROUNDS: u32 = 5;

/// Pause between turns unless configured otherwise
pub const DEFAULT_TURN_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one [`SharedCounter::take_turn`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    /// This participant wrote last; nothing to do
    Waiting,
    /// Counter incremented
    Advanced {
        /// Who wrote the value we incremented
        from: i32,
        /// Value written
        value: i32,
    },
}

/// Handle to a named shared-memory counter
///
/// Holds only the name; every operation maps the object for its own
/// duration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedCounter {
    name: String,
}

impl SharedCounter {
    /// Validate a POSIX shared-memory object name (`/name`, no further slashes)
    ///
    /// # Errors
    ///
    /// Returns `IpcError::SharedMemoryFailed` for a malformed name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = name.len() > 1
            && name.starts_with('/')
            && !name[1..].contains('/')
            && !name.contains('\0');
        if !valid {
            return Err(IpcError::SharedMemoryFailed {
                name,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "name must be '/' followed by at least one character and no further '/'",
                ),
            });
        }
        Ok(Self { name })
    }

    /// Object name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overwrite the record
    ///
    /// # Errors
    ///
    /// `IpcError::SharedMemoryFailed` on any OS error.
    pub fn initialize(&self, record: CounterRecord) -> Result<()> {
        self.with_locked(|current| *current = record)?;
        info!(name = %self.name, pid = record.pid, counter = record.counter, "Initialized counter");
        Ok(())
    }

    /// Snapshot of the record
    ///
    /// # Errors
    ///
    /// `IpcError::SharedMemoryFailed` on any OS error.
    pub fn read(&self) -> Result<CounterRecord> {
        self.with_locked(|current| *current)
    }

    /// Increment the counter unless `participant` wrote last
    ///
    /// # Errors
    ///
    /// `IpcError::SharedMemoryFailed` on any OS error.
    pub fn take_turn(&self, participant: i32) -> Result<Turn> {
        let turn = self.with_locked(|current| {
            if current.pid == participant {
                return Turn::Waiting;
            }
            let from = current.pid;
            let value = current.counter.wrapping_add(1);
            *current = CounterRecord::new(participant, value);
            Turn::Advanced { from, value }
        })?;

        match turn {
            Turn::Waiting => debug!(participant, "No new value available"),
            Turn::Advanced { from, value } => {
                info!(participant, from, value, "Increased the counter");
            }
        }
        Ok(turn)
    }

    /// Remove the object name
    ///
    /// Returns whether the object existed.
    ///
    /// # Errors
    ///
    /// `IpcError::SharedMemoryFailed` for anything but "not found".
    pub fn unlink(&self) -> Result<bool> {
        match shm_unlink(self.name.as_str()) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(errno) => Err(self.error(errno.into())),
        }
    }

    fn with_locked<T>(&self, f: impl FnOnce(&mut CounterRecord) -> T) -> Result<T> {
        let fd = shm_open(
            self.name.as_str(),
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|errno| self.error(errno.into()))?;

        let locked = Flock::lock(fd, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.error(errno.into()))?;

        // Sizing an already-sized object is a no-op.
        ftruncate(&*locked, RECORD_SIZE as libc::off_t)
            .map_err(|errno| self.error(errno.into()))?;

        let mapping = Mapping::new(&*locked).map_err(|e| self.error(e))?;
        let mut record = mapping.load();
        let out = f(&mut record);
        mapping.store(record);

        // Unmap before the lock is released.
        drop(mapping);
        drop(locked);
        Ok(out)
    }

    fn error(&self, source: io::Error) -> IpcError {
        IpcError::SharedMemoryFailed {
            name: self.name.clone(),
            source,
        }
    }
}

/// A shared mapping of exactly one record, unmapped on drop
struct Mapping {
    ptr: NonNull<CounterRecord>,
}

impl Mapping {
    fn new(fd: impl AsFd) -> io::Result<Self> {
        let len = NonZeroUsize::new(RECORD_SIZE)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "zero-sized record"))?;

        // SAFETY: a fresh shared mapping of an object at least RECORD_SIZE
        // bytes long; no existing Rust memory is aliased.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        }?;

        Ok(Self { ptr: ptr.cast() })
    }

    fn load(&self) -> CounterRecord {
        // SAFETY: the mapping is valid, page-aligned and holds RECORD_SIZE
        // bytes; any bit pattern is a valid CounterRecord.
        unsafe { std::ptr::read_volatile(self.ptr.as_ptr()) }
    }

    fn store(&self, record: CounterRecord) {
        // SAFETY: as in `load`; writers are serialized by the flock.
        unsafe { std::ptr::write_volatile(self.ptr.as_ptr(), record) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr came from mmap with this length and is not used again.
        if let Err(e) = unsafe { munmap(self.ptr.cast(), RECORD_SIZE) } {
            tracing::warn!(error = %e, "munmap failed");
        }
    }
}

/// Settings for one participant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnPlan {
    /// Shared object
    pub counter: SharedCounter,
    /// Turns to take
    pub rounds: u32,
    /// Pause between turns
    pub interval: Duration,
}

/// Take `plan.rounds` turns as `participant`
///
/// Each locked turn runs on the blocking pool.
///
/// # Errors
///
/// `IpcError::SharedMemoryFailed` on any OS error.
pub async fn take_turns(plan: &TurnPlan, participant: i32) -> Result<Vec<Turn>> {
    let mut turns = Vec::with_capacity(plan.rounds as usize);

    for round in 0..plan.rounds {
        let counter = plan.counter.clone();
        let turn = tokio::task::spawn_blocking(move || counter.take_turn(participant))
            .await
            .map_err(|e| IpcError::SharedMemoryFailed {
                name: plan.counter.name().to_string(),
                source: io::Error::other(e),
            })??;
        turns.push(turn);

        if round + 1 < plan.rounds {
            tokio::time::sleep(plan.interval).await;
        }
    }

    Ok(turns)
}
