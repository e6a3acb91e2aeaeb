// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "last_ip": "203.0.113.5",
//   "last_updated": "2025-01-09T12:00:00Z"
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{StateRecord, StateStore};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// File-based state store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use ddns_core::state::FileStateStore;
/// use ddns_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/ddns-update/state.json").await?;
///
///     store.save("203.0.113.5".parse()?).await?;
///     assert_eq!(store.last_ip().await?, Some("203.0.113.5".parse()?));
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    cached: Arc<RwLock<Option<StateRecord>>>,
}

/// Serializable state file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    last_ip: IpAddr,
    last_updated: chrono::DateTime<chrono::Utc>,
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing state file
    /// 3. If it is corrupted, try the backup
    /// 4. If both fail, or the file cannot be read at all, start unset
    ///    (forces an update on the next cycle)
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let record = Self::load_state_with_recovery(&path).await;

        Ok(Self {
            path,
            cached: Arc::new(RwLock::new(record)),
        })
    }

    /// Path of the main state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state from file with automatic recovery
    async fn load_state_with_recovery(path: &Path) -> Option<StateRecord> {
        match Self::load_state(path).await {
            Ok(record) => record,
            Err(LoadError::Corrupted(reason)) => {
                tracing::warn!(
                    "State file appears corrupted: {}. Attempting recovery from backup.",
                    reason
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with unset state.");
                    return None;
                }

                match Self::load_state(&backup_path).await {
                    Ok(record) => {
                        tracing::info!("Recovered state from backup");
                        if let Err(e) = Self::restore_from_backup(path, &backup_path).await {
                            tracing::error!("Failed to restore state file from backup: {}", e);
                        }
                        record
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with unset state.",
                            backup_err
                        );
                        None
                    }
                }
            }
            Err(LoadError::Io(e)) => {
                tracing::warn!("{}. Starting with unset state.", e);
                None
            }
        }
    }

    /// Load state from file
    async fn load_state(path: &Path) -> Result<Option<StateRecord>, LoadError> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::persistence(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            )))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupted(format!("{}: {}", path.display(), e))
        })?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        // 0.0.0.0 / :: is the "never updated" sentinel
        if state_file.last_ip.is_unspecified() {
            return Ok(None);
        }

        Ok(Some(StateRecord {
            last_ip: state_file.last_ip,
            last_updated: state_file.last_updated,
        }))
    }

    /// Write state to file atomically
    async fn write_state(&self, record: &StateRecord) -> Result<(), Error> {
        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            last_ip: record.last_ip,
            last_updated: record.last_updated,
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::persistence(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        if let Err(e) = Self::write_temp(&temp_path, json.as_bytes()).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        // Keep the previous good file around for corruption recovery
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            )));
        }

        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    async fn write_temp(temp_path: &Path, bytes: &[u8]) -> Result<(), Error> {
        let mut file = fs::File::create(temp_path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to create temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.write_all(bytes).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to write to temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            Error::persistence(format!(
                "Failed to sync temp file {}: {}",
                temp_path.display(),
                e
            ))
        })
    }

    /// Restore state file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored state file from backup");
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

/// Distinguishes a damaged file (recoverable) from an I/O failure
enum LoadError {
    Corrupted(String),
    Io(Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Corrupted(reason) => write!(f, "corrupted state file ({})", reason),
            LoadError::Io(e) => write!(f, "{}", e),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<StateRecord>, Error> {
        Ok(self.cached.read().await.clone())
    }

    async fn save(&self, ip: IpAddr) -> Result<(), Error> {
        let record = StateRecord::new(ip);

        // Hold the write lock across the file write so the cache never
        // reports a value that is not on disk
        let mut guard = self.cached.write().await;
        self.write_state(&record).await?;
        *guard = Some(record);
        Ok(())
    }
}
