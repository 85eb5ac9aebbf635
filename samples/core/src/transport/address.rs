//! Filesystem-Namespace Socket Addresses
//!
//! [`SocketAddress`] validates a path against the platform `sun_path` limit.
//! [`BoundAddress`] is the one piece of lifecycle logic both socket roles
//! share: it clears a stale socket file, binds, and removes the file again
//! exactly once, whichever way the role exits.
//!
//! Ownership of an address is an advisory lock on a sibling `<path>.lock`
//! file, held for as long as the [`BoundAddress`] lives. A second role asking
//! for the same address fails the non-blocking lock and never touches the
//! owner's socket.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::socket::{bind, UnixAddr};
use tracing::{debug, info, warn};

use crate::error::{IpcError, Result};

/// Size of `sockaddr_un::sun_path`, including the terminating NUL
#[must_use]
pub fn sun_path_capacity() -> usize {
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_path.len()
}

/// A validated socket path
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocketAddress {
    path: PathBuf,
}

impl SocketAddress {
    /// Validate `path` as a filesystem-namespace socket address
    ///
    /// # Errors
    ///
    /// Returns `IpcError::AddressInUseOrInvalid` if the path is empty,
    /// contains a NUL byte, or is longer than `sun_path_capacity() - 1`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = path.as_os_str().as_bytes();
        let max = sun_path_capacity() - 1;

        let problem = if bytes.is_empty() {
            Some("path is empty".to_string())
        } else if bytes.contains(&0) {
            Some("path contains a NUL byte".to_string())
        } else if bytes.len() > max {
            Some(format!("path is {} bytes, limit is {max}", bytes.len()))
        } else {
            None
        };

        match problem {
            Some(reason) => Err(IpcError::AddressInUseOrInvalid {
                path,
                reason,
                source: None,
            }),
            None => Ok(Self { path }),
        }
    }

    /// The socket path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Remove the file at `path`, treating "not found" as already removed
///
/// Returns whether a file was actually removed.
///
/// # Errors
///
/// Returns the underlying error for anything other than `NotFound`.
pub fn remove_address(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Path of the lock file guarding `path`
#[must_use]
pub fn lock_path(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

/// An address this process has bound; removed from the filesystem on release
///
/// The socket file and its lock file are only removed if they are still the
/// inodes that were bound, so a role never deletes an address someone else
/// has since bound.
pub struct BoundAddress {
    path: PathBuf,
    identity: Option<(u64, u64)>,
    lock: Option<OwnerLock>,
    released: bool,
}

struct OwnerLock {
    path: PathBuf,
    identity: (u64, u64),
    _held: Flock<File>,
}

impl std::fmt::Debug for BoundAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundAddress")
            .field("path", &self.path)
            .field("locked", &self.lock.is_some())
            .field("released", &self.released)
            .finish()
    }
}

impl BoundAddress {
    /// Take ownership of `address`, clear a stale socket file, then bind
    /// `socket` to it
    ///
    /// # Errors
    ///
    /// Returns `IpcError::AddressInUseOrInvalid` if another role owns the
    /// address, a live socket answers there, a non-socket file occupies it,
    /// or the bind call fails.
    pub fn bind(socket: &OwnedFd, address: &SocketAddress) -> Result<Self> {
        let path = address.path();
        let lock = OwnerLock::acquire(path)?;
        if let Err(e) = bind_unowned(socket, path) {
            lock.remove();
            return Err(e);
        }

        debug!(path = ?path, "Bound socket address");
        Ok(Self {
            path: path.to_path_buf(),
            identity: identity_of(path),
            lock: Some(lock),
            released: false,
        })
    }

    /// The bound path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the address from the filesystem; later calls do nothing
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let current = identity_of(&self.path);
        if current.is_none() {
            debug!(path = ?self.path, "Socket address already gone");
        } else if self.identity.is_some() && current != self.identity {
            warn!(path = ?self.path, "Address was re-bound by someone else, leaving it");
        } else {
            match remove_address(&self.path) {
                Ok(_) => debug!(path = ?self.path, "Removed socket address"),
                Err(e) => warn!(error = %e, path = ?self.path, "Failed to remove socket address"),
            }
        }

        // Unlinked while still held; the lock itself goes with the handle.
        if let Some(lock) = self.lock.take() {
            lock.remove();
        }
    }
}

impl Drop for BoundAddress {
    fn drop(&mut self) {
        self.release();
    }
}

impl OwnerLock {
    fn acquire(path: &Path) -> Result<Self> {
        let lock_path = lock_path(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&lock_path)
            .map_err(|e| invalid(path, "cannot open the address lock file", e))?;

        let held = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(held) => held,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(invalid(
                    path,
                    "another role owns this address",
                    io::Error::from(io::ErrorKind::AddrInUse),
                ));
            }
            Err((_, errno)) => return Err(invalid(path, "cannot lock the address", errno.into())),
        };

        let meta = held
            .metadata()
            .map_err(|e| invalid(path, "cannot inspect the address lock file", e))?;

        Ok(Self {
            path: lock_path,
            identity: (meta.dev(), meta.ino()),
            _held: held,
        })
    }

    fn remove(self) {
        if identity_of(&self.path) != Some(self.identity) {
            return;
        }
        if let Err(e) = remove_address(&self.path) {
            warn!(error = %e, path = ?self.path, "Failed to remove address lock file");
        }
    }
}

fn bind_unowned(socket: &OwnedFd, path: &Path) -> Result<()> {
    clear_stale(path)?;
    let addr = UnixAddr::new(path).map_err(|errno| invalid(path, "bad address", errno.into()))?;
    bind(socket.as_raw_fd(), &addr).map_err(|errno| invalid(path, "bind failed", errno.into()))
}

fn identity_of(path: &Path) -> Option<(u64, u64)> {
    fs::symlink_metadata(path)
        .ok()
        .map(|meta| (meta.dev(), meta.ino()))
}

fn invalid(path: &Path, reason: &str, source: io::Error) -> IpcError {
    IpcError::AddressInUseOrInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
        source: Some(source),
    }
}

/// Unlink a leftover socket file from a previous run
///
/// Only called with the address lock held, so no role of this crate is
/// serving there. A socket that still accepts connections belongs to some
/// other live process and is left alone.
fn clear_stale(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(invalid(path, "cannot inspect existing file", e)),
    };

    if !meta.file_type().is_socket() {
        return Err(IpcError::AddressInUseOrInvalid {
            path: path.to_path_buf(),
            reason: "an existing file that is not a socket occupies the address".to_string(),
            source: None,
        });
    }

    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_stream) => Err(invalid(
            path,
            "a live socket is bound at this address",
            io::Error::from(io::ErrorKind::AddrInUse),
        )),
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            info!(path = ?path, "Removing stale socket file");
            remove_address(path)
                .map(|_| ())
                .map_err(|e| invalid(path, "failed to remove stale socket", e))
        }
        Err(e) => Err(invalid(path, "cannot check the existing socket", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::unix_socket::open_stream_socket;
    use tempfile::TempDir;

    #[test]
    fn test_address_length_limit() {
        let max = sun_path_capacity() - 1;

        let fits = "a".repeat(max);
        assert!(SocketAddress::new(fits).is_ok());

        let too_long = "a".repeat(max + 1);
        assert!(matches!(
            SocketAddress::new(too_long),
            Err(IpcError::AddressInUseOrInvalid { source: None, .. })
        ));
    }

    #[test]
    fn test_empty_address_rejected() {
        assert!(SocketAddress::new("").is_err());
    }

    #[test]
    fn test_remove_missing_address() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("never-bound.sock");
        assert!(!remove_address(&path).unwrap());
        assert!(!remove_address(&path).unwrap());
    }

    #[test]
    fn test_bind_then_rebind_after_restart() {
        let temp_dir = TempDir::new().unwrap();
        let address = SocketAddress::new(temp_dir.path().join("restart.sock")).unwrap();

        // A crashed owner leaves its socket and an unlocked lock file behind.
        drop(std::os::unix::net::UnixListener::bind(address.path()).unwrap());
        fs::write(lock_path(address.path()), b"").unwrap();
        assert!(address.path().exists());

        let socket = open_stream_socket().unwrap();
        let mut bound = BoundAddress::bind(&socket, &address).unwrap();
        assert!(address.path().exists());

        bound.release();
        assert!(!address.path().exists());
        assert!(!lock_path(address.path()).exists());
    }

    #[test]
    fn test_owned_address_is_refused_without_connecting() {
        let temp_dir = TempDir::new().unwrap();
        let address = SocketAddress::new(temp_dir.path().join("owned.sock")).unwrap();

        let owner_socket = open_stream_socket().unwrap();
        let owner = BoundAddress::bind(&owner_socket, &address).unwrap();
        nix::sys::socket::listen(&owner_socket, nix::sys::socket::Backlog::new(1).unwrap())
            .unwrap();

        let socket = open_stream_socket().unwrap();
        let result = BoundAddress::bind(&socket, &address);
        assert!(matches!(
            result,
            Err(IpcError::AddressInUseOrInvalid { .. })
        ));

        // Nothing was queued on the owner's socket.
        let std_listener = std::os::unix::net::UnixListener::from(owner_socket);
        std_listener.set_nonblocking(true).unwrap();
        let pending = std_listener.accept();
        assert!(matches!(pending, Err(e) if e.kind() == io::ErrorKind::WouldBlock));

        drop(owner);
        assert!(!address.path().exists());
        assert!(!lock_path(address.path()).exists());
    }

    #[test]
    fn test_release_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let address = SocketAddress::new(temp_dir.path().join("once.sock")).unwrap();
        let socket = open_stream_socket().unwrap();

        let mut bound = BoundAddress::bind(&socket, &address).unwrap();
        bound.release();
        bound.release();
        drop(bound);
        assert!(!address.path().exists());
    }

    #[test]
    fn test_live_listener_is_not_clobbered() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("live.sock");
        let _live = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let address = SocketAddress::new(&path).unwrap();
        let socket = open_stream_socket().unwrap();
        let result = BoundAddress::bind(&socket, &address);

        assert!(matches!(
            result,
            Err(IpcError::AddressInUseOrInvalid { .. })
        ));
        assert!(path.exists());
    }

    #[test]
    fn test_regular_file_is_not_removed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        fs::write(&path, b"keep me").unwrap();

        let address = SocketAddress::new(&path).unwrap();
        let socket = open_stream_socket().unwrap();
        assert!(BoundAddress::bind(&socket, &address).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
        assert!(!lock_path(&path).exists());
    }

    #[test]
    fn test_rebound_address_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let address = SocketAddress::new(temp_dir.path().join("moved.sock")).unwrap();

        let socket = open_stream_socket().unwrap();
        let mut bound = BoundAddress::bind(&socket, &address).unwrap();

        // Someone else replaces the file with their own socket.
        fs::remove_file(address.path()).unwrap();
        let _other = std::os::unix::net::UnixListener::bind(address.path()).unwrap();

        bound.release();
        assert!(address.path().exists());
    }
}
