// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Crash Behavior
//
// - All state is lost on restart
// - First cycle after a restart treats the IP as new and updates every account
//
// ## When to Use
//
// - Testing environments
// - Deployments where one extra update per restart is harmless

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{StateRecord, StateStore};

/// In-memory state store implementation
///
/// # Example
///
/// ```rust,no_run
/// use ddns_core::state::MemoryStateStore;
/// use ddns_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     store.save("203.0.113.5".parse()?).await?;
///     assert_eq!(store.last_ip().await?, Some("203.0.113.5".parse()?));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<Option<StateRecord>>>,
}

impl MemoryStateStore {
    /// Create a new unset memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `ip`
    pub fn with_last_ip(ip: IpAddr) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(StateRecord::new(ip)))),
        }
    }

    /// Forget the recorded IP
    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<StateRecord>, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, ip: IpAddr) -> Result<(), Error> {
        *self.inner.write().await = Some(StateRecord::new(ip));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStateStore::new();
        assert_eq!(store.last_ip().await.unwrap(), None);

        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        store.save(ip).await.unwrap();
        assert_eq!(store.last_ip().await.unwrap(), Some(ip));

        store.clear().await;
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStateStore::with_last_ip("203.0.113.5".parse().unwrap());
        let clone = store.clone();

        let ip: IpAddr = "198.51.100.9".parse().unwrap();
        clone.save(ip).await.unwrap();

        assert_eq!(store.last_ip().await.unwrap(), Some(ip));
    }
}
