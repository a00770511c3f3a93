//! Cross-process sprint lock.
//!
//! The lock is an advisory marker file beside the sprint state file holding
//! the decimal pid of the engine instance that owns the sprint. Acquisition
//! uses the filesystem's exclusive-create primitive; a marker left behind by
//! a crashed engine is reclaimed after a liveness probe shows the recorded
//! process is gone.

use crate::errors::EngineError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Holds the sprint lock for the life of an engine instance. Removed on
/// graceful shutdown via `release`; `Drop` removes it best-effort.
pub struct SprintLock {
    path: PathBuf,
    released: bool,
}

impl SprintLock {
    /// Acquire the lock for `sprint` at `path`.
    ///
    /// If a marker already exists, the recorded process is probed: a live
    /// holder fails acquisition with an explicit already-running error; a
    /// dead one is overwritten, transferring ownership silently.
    pub fn acquire(path: impl Into<PathBuf>, sprint: &str) -> Result<Self, EngineError> {
        let path = path.into();
        let pid = std::process::id();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| EngineError::StatePersist {
                path: path.clone(),
                source,
            })?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(pid.to_string().as_bytes()).map_err(|source| {
                    EngineError::StatePersist {
                        path: path.clone(),
                        source,
                    }
                })?;
                debug!(lock = %path.display(), pid, "acquired sprint lock");
                Ok(Self {
                    path,
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok());

                match holder {
                    Some(holder_pid) if process_alive(holder_pid) => {
                        Err(EngineError::LockContention {
                            sprint: sprint.to_string(),
                            holder_pid,
                            lock_path: path,
                        })
                    }
                    _ => {
                        // Holder is dead or the marker is garbage: take over.
                        warn!(
                            lock = %path.display(),
                            stale_pid = ?holder,
                            "reclaiming sprint lock from dead holder"
                        );
                        fs::write(&path, pid.to_string()).map_err(|source| {
                            EngineError::StatePersist {
                                path: path.clone(),
                                source,
                            }
                        })?;
                        Ok(Self {
                            path,
                            released: false,
                        })
                    }
                }
            }
            Err(source) => Err(EngineError::StatePersist { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Removing an already-missing marker is not an error.
    pub fn release(mut self) {
        self.remove_marker();
        self.released = true;
    }

    fn remove_marker(&self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(lock = %self.path.display(), error = %e, "failed to remove sprint lock");
        }
    }
}

impl Drop for SprintLock {
    fn drop(&mut self) {
        if !self.released {
            self.remove_marker();
        }
    }
}

/// Probe whether a process is alive. Reads `/proc` where available and
/// falls back to a `kill -0` style signal probe elsewhere.
fn process_alive(pid: u32) -> bool {
    if Path::new("/proc").is_dir() {
        return Path::new(&format!("/proc/{}", pid)).exists();
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // A pid far above any real pid table; never alive.
    const DEAD_PID: u32 = 999_999_999;

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-core-1.lock");

        let lock = SprintLock::acquire(&path, "core-1").unwrap();
        let recorded: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(recorded, std::process::id());
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_against_live_holder_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-core-1.lock");

        // Our own pid is certainly alive.
        fs::write(&path, std::process::id().to_string()).unwrap();

        match SprintLock::acquire(&path, "core-1") {
            Err(EngineError::LockContention {
                sprint, holder_pid, ..
            }) => {
                assert_eq!(sprint, "core-1");
                assert_eq!(holder_pid, std::process::id());
            }
            other => panic!("Expected LockContention, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dead_holder_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-core-1.lock");

        fs::write(&path, DEAD_PID.to_string()).unwrap();

        let lock = SprintLock::acquire(&path, "core-1").unwrap();
        let recorded: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(recorded, std::process::id());
        lock.release();
    }

    #[test]
    fn test_garbage_marker_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-core-1.lock");

        fs::write(&path, "not a pid").unwrap();
        let lock = SprintLock::acquire(&path, "core-1").unwrap();
        lock.release();
    }

    #[test]
    fn test_release_of_missing_marker_is_silent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-core-1.lock");

        let lock = SprintLock::acquire(&path, "core-1").unwrap();
        fs::remove_file(&path).unwrap();
        // Must not panic or error.
        lock.release();
    }

    #[test]
    fn test_drop_removes_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sprint-core-1.lock");

        {
            let _lock = SprintLock::acquire(&path, "core-1").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
