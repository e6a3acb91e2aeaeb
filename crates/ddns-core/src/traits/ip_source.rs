// # IP Source Trait
//
// Defines the interface for discovering the host's current public IP.
//
// ## Implementations
//
// - HTTP "what is my IP" services: `ddns-ip-http` crate
// - Ordered fallback over several sources: `FallbackIpSource`
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::IpSource;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* IpSource implementation */;
//     let current_ip = source.current().await?;
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for IP source implementations
///
/// # Trust Level: Semi-Trusted
///
/// IP sources may perform network I/O to their own service only.
///
/// ## Forbidden Capabilities
/// - ❌ Perform DNS updates (use `DnsProvider`)
/// - ❌ Access the state store (owned by `DdnsEngine`)
/// - ❌ Retry or fall back internally (owned by `FallbackIpSource`)
/// - ❌ Block without a timeout
#[async_trait]
pub trait IpSource: Send + Sync {
    /// Get the current public IP address
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: A well-formed, usable address
    /// - `Err(Error)`: If this source could not produce one
    async fn current(&self) -> Result<IpAddr, crate::Error>;

    /// Short label for logs (e.g. the service URL)
    fn name(&self) -> String;
}

/// Whether an address can be published as a public IP
///
/// Rejects the unspecified, loopback and multicast ranges that a broken
/// service or captive portal might hand back.
pub fn is_usable_address(ip: &IpAddr) -> bool {
    !(ip.is_unspecified() || ip.is_loopback() || ip.is_multicast())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_address() {
        assert!(is_usable_address(&IpAddr::from([203, 0, 113, 5])));
        assert!(!is_usable_address(&IpAddr::from([0, 0, 0, 0])));
        assert!(!is_usable_address(&IpAddr::from([127, 0, 0, 1])));
        assert!(!is_usable_address(&IpAddr::from([224, 0, 0, 1])));
        assert!(!is_usable_address(&"::1".parse().unwrap()));
    }
}
