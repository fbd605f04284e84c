//! Single-instance lock
//!
//! The lock is a small JSON record in the state directory naming the pid that
//! owns the relay. A record whose pid no longer exists is stale and may be
//! reclaimed. Acquisition is scoped: [`InstanceLock::acquire_guard`] returns a
//! guard that removes the record when dropped.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current version from git describe (set at compile time)
pub const VERSION: &str = env!("GIT_DESCRIBE");

/// Errors from acquiring the instance lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another relay instance is running with PID {pid}")]
    Held { pid: u32 },

    #[error("Instance lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Persisted lock record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process id of the owning relay
    pub pid: u32,
    /// Build version of the owner
    pub version: String,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            version: VERSION.to_string(),
            acquired_at: Utc::now(),
        }
    }
}

/// Lock status information
#[derive(Debug)]
pub struct LockStatus {
    /// Whether a live process holds the lock
    pub running: bool,
    /// The record on disk, live or stale
    pub record: Option<LockRecord>,
    /// Lock file path
    pub lock_file: PathBuf,
}

/// Instance lock backed by a record file
#[derive(Debug, Clone)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Create a lock handle for the given record path (nothing is written yet)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "InstanceLock::new: called");
        Self { path }
    }

    /// Get the lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock, returning whether it was acquired
    pub fn acquire(&self) -> bool {
        debug!(?self.path, "InstanceLock::acquire: called");
        match self.try_acquire() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "InstanceLock::acquire: not acquired");
                false
            }
        }
    }

    /// Try to take the lock, reporting why it failed
    ///
    /// Fails closed: an I/O error while reading or writing the record is an
    /// acquisition failure.
    pub fn try_acquire(&self) -> Result<(), LockError> {
        debug!(?self.path, "InstanceLock::try_acquire: called");
        if let Some(record) = self.read_existing()? {
            if is_process_alive(record.pid) {
                debug!(pid = record.pid, "InstanceLock::try_acquire: owner is alive");
                return Err(LockError::Held { pid: record.pid });
            }
            info!(pid = record.pid, "Reclaiming stale instance lock");
        }

        self.write_record(&LockRecord::current())?;
        info!(pid = std::process::id(), path = ?self.path, "Instance lock acquired");
        Ok(())
    }

    /// Take the lock and return a guard that releases it on drop
    pub fn acquire_guard(self) -> Result<LockGuard, LockError> {
        self.try_acquire()?;
        Ok(LockGuard { lock: self })
    }

    /// Remove the lock record unconditionally
    pub fn release(&self) {
        debug!(?self.path, "InstanceLock::release: called");
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = ?self.path, "Instance lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("InstanceLock::release: lock file already gone");
            }
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to remove lock file"),
        }
    }

    /// Read the record, ignoring missing or malformed files
    pub fn read_record(&self) -> Option<LockRecord> {
        self.read_existing().ok().flatten()
    }

    /// Pid of the live owner, if any
    pub fn owner(&self) -> Option<u32> {
        let result = self.read_record().map(|r| r.pid).filter(|&pid| is_process_alive(pid));
        debug!(?result, "InstanceLock::owner: returning");
        result
    }

    /// Get the lock status
    pub fn status(&self) -> LockStatus {
        let record = self.read_record();
        let running = record.as_ref().is_some_and(|r| is_process_alive(r.pid));
        LockStatus {
            running,
            record,
            lock_file: self.path.clone(),
        }
    }

    /// Read the record; `Ok(None)` when absent or unparseable
    fn read_existing(&self) -> Result<Option<LockRecord>, LockError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("InstanceLock::read_existing: no lock file");
                return Ok(None);
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match serde_json::from_str::<LockRecord>(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Malformed lock record, treating as stale");
                Ok(None)
            }
        }
    }

    fn write_record(&self, record: &LockRecord) -> Result<(), LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(record).map_err(|e| io_err(io::Error::other(e)))?;
        let tmp = self.path.with_extension("lock.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(pid = record.pid, path = ?self.path, "Wrote lock record");
        Ok(())
    }
}

/// Holds the instance lock until dropped
#[derive(Debug)]
pub struct LockGuard {
    lock: InstanceLock,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Check if a process with the given PID is running
///
/// Sends signal 0, which checks existence without affecting the process.
/// EPERM means the process exists but belongs to someone else.
pub fn is_process_alive(pid: u32) -> bool {
    // 0 and negative pids address process groups
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    let result = match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    };
    debug!(pid, result, "is_process_alive: checked");
    result
}

/// Send SIGTERM to a pid, escalating to SIGKILL if it outlives `grace`
pub fn terminate(pid: u32, grace: Duration) -> eyre::Result<()> {
    debug!(pid, ?grace, "terminate: called");
    let raw = i32::try_from(pid).map_err(|_| eyre::eyre!("Invalid PID {}", pid))?;
    if raw <= 0 {
        return Err(eyre::eyre!("Invalid PID {}", pid));
    }

    info!(pid, "Sending SIGTERM");
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| eyre::eyre!("Failed to send SIGTERM to {}: {}", pid, e))?;

    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while is_process_alive(pid) && waited < grace {
        std::thread::sleep(step);
        waited += step;
    }

    if is_process_alive(pid) {
        warn!(pid, "Relay did not stop gracefully, sending SIGKILL");
        let _ = kill(Pid::from_raw(raw), Signal::SIGKILL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Above the kernel's maximum pid (2^22), so never a live process
    const DEAD_PID: u32 = 4_194_400;

    fn write_raw(path: &Path, record: &LockRecord) {
        fs::write(path, serde_json::to_string(record).unwrap()).unwrap();
    }

    #[test]
    fn test_acquire_creates_record_with_own_pid() {
        let temp = TempDir::new().unwrap();
        let lock = InstanceLock::new(temp.path().join("relay.lock"));

        assert!(lock.acquire());
        let record = lock.read_record().unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.version, VERSION);
    }

    #[test]
    fn test_second_acquire_fails_while_holder_alive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relay.lock");

        let first = InstanceLock::new(&path);
        let second = InstanceLock::new(&path);
        assert!(first.acquire());
        assert!(!second.acquire());

        match second.try_acquire() {
            Err(LockError::Held { pid }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected Held, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relay.lock");
        write_raw(
            &path,
            &LockRecord {
                pid: DEAD_PID,
                version: "old".to_string(),
                acquired_at: Utc::now(),
            },
        );

        let lock = InstanceLock::new(&path);
        assert!(lock.owner().is_none());
        assert!(lock.acquire());
        assert_eq!(lock.read_record().unwrap().pid, std::process::id());
    }

    #[test]
    fn test_malformed_lock_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relay.lock");
        fs::write(&path, "12345 not json").unwrap();

        let lock = InstanceLock::new(&path);
        assert!(lock.acquire());
        assert_eq!(lock.read_record().unwrap().pid, std::process::id());
    }

    #[test]
    fn test_acquire_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let lock = InstanceLock::new(temp.path().join("nested").join("state").join("relay.lock"));
        assert!(lock.acquire());
        assert!(lock.path().exists());
    }

    #[test]
    fn test_io_error_fails_closed() {
        let temp = TempDir::new().unwrap();
        // A directory where the record should be makes reads fail with a non-NotFound error
        let path = temp.path().join("relay.lock");
        fs::create_dir(&path).unwrap();

        let lock = InstanceLock::new(&path);
        assert!(!lock.acquire());
        assert!(matches!(lock.try_acquire(), Err(LockError::Io { .. })));
    }

    #[test]
    fn test_release_removes_record() {
        let temp = TempDir::new().unwrap();
        let lock = InstanceLock::new(temp.path().join("relay.lock"));
        assert!(lock.acquire());

        lock.release();
        assert!(!lock.path().exists());

        // Releasing again is harmless
        lock.release();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relay.lock");

        {
            let guard = InstanceLock::new(&path).acquire_guard().unwrap();
            assert!(guard.path().exists());
            assert!(InstanceLock::new(&path).acquire_guard().is_err());
        }

        assert!(!path.exists());
        assert!(InstanceLock::new(&path).acquire());
    }

    #[test]
    fn test_status() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relay.lock");
        let lock = InstanceLock::new(&path);

        let status = lock.status();
        assert!(!status.running);
        assert!(status.record.is_none());
        assert_eq!(status.lock_file, path);

        assert!(lock.acquire());
        let status = lock.status();
        assert!(status.running);
        assert_eq!(status.record.unwrap().pid, std::process::id());
    }

    #[test]
    fn test_is_process_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(DEAD_PID));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
    }
}
