//! Per-project advisory locking.
//!
//! Two processes installing versions of the *same* project must serialize;
//! different projects install fully in parallel. The lock is an exclusive
//! advisory file lock scoped to the project (not the version), held across
//! the "idempotency re-check → publish" critical section. Release is tied
//! to [`Drop`], so a panic or early return can never leave the lock held
//! within a live process, and the OS reclaims it if the process dies.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::FileExt;
use thiserror::Error;
use tracing::{debug, trace};

use larder_schema::PackageName;

/// How often a blocked acquisition re-polls the lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors produced while acquiring a shelf lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process held the lock for longer than the configured timeout.
    #[error("timed out after {waited:?} waiting for the lock on '{project}'")]
    Timeout {
        /// The contended project.
        project: PackageName,
        /// How long this process waited.
        waited: Duration,
    },

    /// The lock file could not be created or locked.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An exclusive advisory lock on one project's shelf.
///
/// Created with [`ShelfLock::acquire`]; released on drop.
#[derive(Debug)]
pub struct ShelfLock {
    file: std::fs::File,
    path: PathBuf,
}

impl ShelfLock {
    /// Acquire the exclusive lock for `project`, polling until `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the lock stays contended, or any
    /// I/O error from creating the lock file.
    pub async fn acquire(
        locks_dir: &Path,
        project: &PackageName,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        std::fs::create_dir_all(locks_dir)?;
        let path = locks_dir.join(format!("{}.lock", project.escaped()));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    trace!(%project, path = %path.display(), "shelf lock acquired");
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Timeout {
                            project: project.clone(),
                            waited,
                        });
                    }
                    trace!(%project, "shelf lock contended; waiting");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for ShelfLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %e, "failed to unlock shelf lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str) -> PackageName {
        PackageName::new(name)
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ShelfLock::acquire(dir.path(), &project("node"), Duration::from_secs(1))
            .await
            .unwrap();
        drop(lock);

        // Re-acquirable after release.
        ShelfLock::acquire(dir.path(), &project("node"), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn different_projects_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = ShelfLock::acquire(dir.path(), &project("a"), Duration::from_secs(1))
            .await
            .unwrap();
        // Must not block or time out.
        let _b = ShelfLock::acquire(dir.path(), &project("b"), Duration::from_millis(200))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let held = ShelfLock::acquire(dir.path(), &project("node"), Duration::from_secs(1))
            .await
            .unwrap();

        // flock is per open file description; the second open() contends
        // even within one process.
        let err = ShelfLock::acquire(dir.path(), &project("node"), Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        drop(held);
    }

    #[tokio::test]
    async fn slashed_projects_use_flat_lock_names() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = ShelfLock::acquire(
            dir.path(),
            &project("github.com/cli"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        // The lock file sits directly in the locks dir, not nested.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, ["github.com∕cli.lock"]);
    }
}
