// # State Store Trait
//
// Defines the interface for persisting the last confirmed IP.
//
// ## Purpose
//
// The state store lets the engine skip provider calls when the public IP
// has not moved since the last successful cycle, across restarts.
//
// ## Consistency
//
// The engine writes only after the provider updates it decided to count
// have succeeded. If that write fails the provider is already current but
// the store is not; the next cycle sees a "change", repeats a harmless
// update, and writes again. This lag of one cycle is accepted.

use async_trait::async_trait;
use std::net::IpAddr;

/// Persisted record of the last confirmed update
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StateRecord {
    /// The last IP every counted account confirmed
    pub last_ip: IpAddr,
    /// Timestamp of the write
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl StateRecord {
    /// Create a new state record stamped with the current time
    pub fn new(last_ip: IpAddr) -> Self {
        Self {
            last_ip,
            last_updated: chrono::Utc::now(),
        }
    }
}

/// Trait for state store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Implementation Guidelines
///
/// - **Side-effect-free reads**: `load()` must not modify anything
/// - **Absence is not an error**: return `Ok(None)` on first run
/// - **Atomic writes**: a crash mid-write must leave the old value readable
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last confirmed record
    ///
    /// # Returns
    ///
    /// - `Ok(Some(StateRecord))`: The last confirmed record
    /// - `Ok(None)`: Nothing recorded yet
    /// - `Err(Error)`: Storage error
    async fn load(&self) -> Result<Option<StateRecord>, crate::Error>;

    /// Record `ip` as the last confirmed address
    async fn save(&self, ip: IpAddr) -> Result<(), crate::Error>;

    /// Convenience accessor for the last confirmed IP
    async fn last_ip(&self) -> Result<Option<IpAddr>, crate::Error> {
        Ok(self.load().await?.map(|record| record.last_ip))
    }
}
