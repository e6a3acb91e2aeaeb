//! Ordered-fallback IP resolution
//!
//! [`FallbackIpSource`] walks a list of [`IpSource`] candidates in order and
//! returns the first usable address. Each attempt is bounded by its own
//! timeout so one stalled service cannot stall the cycle. There is no
//! voting: the first valid answer wins.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IpVersion;
use crate::error::{Error, Result};
use crate::traits::{IpSource, is_usable_address};

/// IP source that tries several candidates in order
pub struct FallbackIpSource {
    candidates: Vec<Box<dyn IpSource>>,
    attempt_timeout: Duration,
    version: IpVersion,
}

impl FallbackIpSource {
    /// Create a fallback chain
    ///
    /// # Parameters
    ///
    /// - `candidates`: Sources in priority order
    /// - `attempt_timeout`: Upper bound for each individual attempt
    pub fn new(candidates: Vec<Box<dyn IpSource>>, attempt_timeout: Duration) -> Self {
        Self {
            candidates,
            attempt_timeout,
            version: IpVersion::V4,
        }
    }

    /// Only accept addresses of the given family
    pub fn with_version(mut self, version: IpVersion) -> Self {
        self.version = version;
        self
    }

    /// Number of candidates in the chain
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    async fn try_candidate(&self, candidate: &dyn IpSource) -> Result<IpAddr> {
        let ip = tokio::time::timeout(self.attempt_timeout, candidate.current())
            .await
            .map_err(|_| {
                Error::resolution(format!("timed out after {:?}", self.attempt_timeout))
            })??;

        if !self.version.matches(&ip) {
            return Err(Error::resolution(format!(
                "returned {} which is not {:?}",
                ip, self.version
            )));
        }
        if !is_usable_address(&ip) {
            return Err(Error::resolution(format!("returned unusable address {}", ip)));
        }

        Ok(ip)
    }
}

#[async_trait]
impl IpSource for FallbackIpSource {
    async fn current(&self) -> Result<IpAddr> {
        let mut failures = Vec::with_capacity(self.candidates.len());

        for candidate in &self.candidates {
            let name = candidate.name();
            debug!("Resolving public IP via {}", name);

            match self.try_candidate(candidate.as_ref()).await {
                Ok(ip) => {
                    info!("Resolved public IP {} via {}", ip, name);
                    return Ok(ip);
                }
                Err(e) => {
                    warn!("IP service {} failed: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        Err(Error::resolution(format!(
            "all {} IP services failed [{}]",
            self.candidates.len(),
            failures.join("; ")
        )))
    }

    fn name(&self) -> String {
        format!("fallback({} services)", self.candidates.len())
    }
}
