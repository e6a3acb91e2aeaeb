// Run lock and health marker
//
// One-shot runs triggered by cron must never overlap, so each run holds an
// exclusive lock file for its lifetime. The health marker is a plain file
// containing the UNIX time of the last completed cycle, for container
// health checks.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A lock older than this is assumed to belong to a crashed run
const STALE_LOCK_AGE: Duration = Duration::from_secs(3600);

/// Exclusive lock held for the duration of a one-shot run
///
/// The lock file is removed when the guard is dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock
    ///
    /// Returns `Ok(None)` when another run holds it.
    pub fn acquire(path: &Path) -> Result<Option<Self>> {
        match Self::create(path) {
            Ok(lock) => Ok(Some(lock)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !Self::is_stale(path) {
                    return Ok(None);
                }

                tracing::warn!(
                    "Removing stale lock file {} (older than {:?})",
                    path.display(),
                    STALE_LOCK_AGE
                );
                fs::remove_file(path)
                    .with_context(|| format!("Failed to remove stale lock {}", path.display()))?;

                match Self::create(path) {
                    Ok(lock) => Ok(Some(lock)),
                    // Another run won the race after the removal
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
                    Err(e) => Err(e)
                        .with_context(|| format!("Failed to create lock {}", path.display())),
                }
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create lock {}", path.display())),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > STALE_LOCK_AGE)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Record "alive at <now>" in the health marker; failures only warn
pub async fn write_health_marker(path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };

    let timestamp = chrono::Utc::now().timestamp().to_string();
    if let Err(e) = tokio::fs::write(path, timestamp).await {
        tracing::warn!("Failed to write health marker {}: {}", path.display(), e);
    }
}
