// # DNS Provider Trait
//
// Defines the interface for pushing an IP address to one provider account.
//
// ## Implementations
//
// - dyndns2-style HTTP template: `ddns-provider-dyndns` crate

use async_trait::async_trait;
use std::net::IpAddr;

use crate::config::AccountConfig;
use crate::outcome::UpdateResult;

/// Trait for DNS provider implementations
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS calls to the configured endpoint only
/// - ✅ Classify provider responses
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (owned by `DdnsEngine`)
/// - ❌ Access the state store (owned by `DdnsEngine`)
/// - ❌ Decide whether an update is needed (owned by `DdnsEngine`)
/// - ❌ Return without a bounded timeout
///
/// # Failure Reporting
///
/// `update` never returns an error: every failure mode (timeout, refused
/// connection, bad status, provider error code) is classified into the
/// returned [`UpdateResult`]. The engine decides what to do with it.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Perform exactly one update call for `account`
    async fn update(&self, account: &AccountConfig, ip: IpAddr) -> UpdateResult;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}
