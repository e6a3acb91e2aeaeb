// # State Store Implementations
//
// This module provides implementations of the StateStore trait for
// different persistence strategies, plus construction from configuration.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::config::StateStoreConfig;
use crate::traits::StateStore;

/// Build the state store described by `config`
pub async fn from_config(config: &StateStoreConfig) -> Result<Box<dyn StateStore>, crate::Error> {
    match config {
        StateStoreConfig::File { path } => {
            if path.trim().is_empty() {
                return Err(crate::Error::config("State store path cannot be empty"));
            }
            Ok(Box::new(FileStateStore::new(path).await?))
        }
        StateStoreConfig::Memory => Ok(Box::new(MemoryStateStore::new())),
    }
}
