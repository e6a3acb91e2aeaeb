//! Core reconciliation engine
//!
//! The DdnsEngine is responsible for:
//! - Resolving the current public IP via IpSource
//! - Comparing it with the last confirmed IP from StateStore
//! - Updating every account via DnsProvider when it changed
//! - Persisting the new IP according to the persist policy
//! - Handing a summary of every cycle to the Notifier
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!    scheduler tick ─▶│  DdnsEngine  │── EngineEvent ──▶ monitoring
//!                     └──────────────┘
//!                            │
//!     ┌──────────────┬───────┴──────┬──────────────┐
//!     ▼              ▼              ▼              ▼
//! ┌──────────┐ ┌────────────┐ ┌────────────┐ ┌──────────┐
//! │ IpSource │ │ StateStore │ │ DnsProvider│ │ Notifier │
//! │(resolve) │ │(load/save) │ │ (per acct) │ │ (summary)│
//! └──────────┘ └────────────┘ └────────────┘ └──────────┘
//! ```
//!
//! ## Cycle
//!
//! 1. Load the last confirmed IP (unset forces an update)
//! 2. Resolve; on failure → `TotalFailure(Resolution)`, nobody contacted
//! 3. Equal to last confirmed → `NoChange`, nobody contacted
//! 4. Update every account (bounded concurrency, join before aggregating)
//! 5. Persist if the policy threshold is met
//! 6. Notify, whatever the outcome

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{AccountConfig, DdnsConfig, PersistPolicy};
use crate::error::Result;
use crate::outcome::{
    CycleOutcome, CycleStatus, FailureStage, UpdateFailure, UpdateOutcome, UpdateResult,
};
use crate::traits::{DnsProvider, IpSource, Notifier, StateStore};

/// Slack on top of the provider's own request timeout before the engine
/// abandons a call
const CALL_GUARD_GRACE: Duration = Duration::from_secs(1);

/// Events emitted by the DdnsEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Cycle started
    CycleStarted { previous_ip: Option<IpAddr> },

    /// Public IP resolved
    IpResolved { ip: IpAddr },

    /// No IP service produced an address
    ResolutionFailed { error: String },

    /// Resolved IP equals the last confirmed IP
    NoChange { ip: IpAddr },

    /// Account update started
    UpdateStarted { account: String, new_ip: IpAddr },

    /// Account is current (updated or already current)
    UpdateSucceeded {
        account: String,
        new_ip: IpAddr,
        unchanged: bool,
    },

    /// Account update failed after all attempts
    UpdateFailed {
        account: String,
        error: String,
        attempts: usize,
    },

    /// New IP written to the state store
    StatePersisted { ip: IpAddr },

    /// State store write failed
    PersistFailed { error: String },

    /// Cycle finished
    CycleCompleted { status: CycleStatus },
}

/// Core DDNS engine
///
/// ## Lifecycle
///
/// 1. Create with [`DdnsEngine::new()`]
/// 2. Call [`DdnsEngine::run_cycle()`] once per scheduled tick
///
/// The engine does no scheduling of its own.
///
/// ## Threading
///
/// Cycles are serialized by an internal lock: a second caller waits for the
/// running cycle to finish. Within a cycle, account updates run concurrently
/// up to `max_concurrent_updates`.
pub struct DdnsEngine {
    /// IP source for resolving the public address
    ip_source: Box<dyn IpSource>,

    /// DNS provider for updating accounts
    provider: Box<dyn DnsProvider>,

    /// State store for the last confirmed IP
    state_store: Box<dyn StateStore>,

    /// Summary sink
    notifier: Box<dyn Notifier>,

    /// Accounts to keep current
    accounts: Vec<AccountConfig>,

    /// Extra attempts for retryable failures
    max_retries: usize,

    /// Delay between attempts
    retry_delay: Duration,

    /// Upper bound for one provider call, including grace
    call_guard: Duration,

    /// Upper bound for one notifier call
    notify_timeout: Duration,

    /// Account updates in flight at once
    max_concurrent_updates: usize,

    /// Partial-success persistence policy
    persist_policy: PersistPolicy,

    /// Held for the duration of a cycle
    cycle_lock: Mutex<()>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl DdnsEngine {
    /// Create a new DDNS engine
    ///
    /// # Parameters
    ///
    /// - `ip_source`: IP source implementation (usually a `FallbackIpSource`)
    /// - `provider`: DNS provider implementation
    /// - `state_store`: State store implementation
    /// - `notifier`: Summary sink
    /// - `config`: DDNS configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        ip_source: Box<dyn IpSource>,
        provider: Box<dyn DnsProvider>,
        state_store: Box<dyn StateStore>,
        notifier: Box<dyn Notifier>,
        config: DdnsConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            ip_source,
            provider,
            state_store,
            notifier,
            max_retries: config.engine.max_retries,
            retry_delay: config.engine.retry_delay(),
            call_guard: config.engine.request_timeout() + CALL_GUARD_GRACE,
            notify_timeout: config.engine.request_timeout(),
            max_concurrent_updates: config.engine.max_concurrent_updates,
            persist_policy: config.engine.persist_policy,
            accounts: config.accounts,
            cycle_lock: Mutex::new(()),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Accounts this engine keeps current
    pub fn accounts(&self) -> &[AccountConfig] {
        &self.accounts
    }

    /// Run one reconciliation cycle to completion
    ///
    /// Never fails: every error is folded into the returned outcome, which
    /// has also been handed to the notifier.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let _cycle = self.cycle_lock.lock().await;
        let started_at = Utc::now();

        let previous_ip = self.load_previous_ip().await;
        self.emit_event(EngineEvent::CycleStarted { previous_ip });

        let mut outcome = CycleOutcome {
            started_at,
            previous_ip,
            resolved_ip: None,
            status: CycleStatus::TotalFailure(FailureStage::Resolution),
            results: Vec::new(),
            resolution_error: None,
            persisted: false,
            persist_error: None,
        };

        // Resolve
        let ip = match self.ip_source.current().await {
            Ok(ip) => ip,
            Err(e) => {
                error!("Could not resolve public IP, skipping cycle: {}", e);
                self.emit_event(EngineEvent::ResolutionFailed {
                    error: e.to_string(),
                });
                outcome.resolution_error = Some(e.to_string());
                return self.finish(outcome).await;
            }
        };
        outcome.resolved_ip = Some(ip);
        self.emit_event(EngineEvent::IpResolved { ip });

        // Compare
        if previous_ip == Some(ip) {
            info!("Public IP unchanged ({}), no update needed", ip);
            self.emit_event(EngineEvent::NoChange { ip });
            outcome.status = CycleStatus::NoChange;
            return self.finish(outcome).await;
        }

        match previous_ip {
            Some(previous) => info!("Public IP changed: {} -> {}", previous, ip),
            None => info!("No recorded IP, forcing update to {}", ip),
        }

        // Apply
        outcome.results = stream::iter(self.accounts.iter())
            .map(|account| self.update_account(account, ip))
            .buffered(self.max_concurrent_updates)
            .collect::<Vec<_>>()
            .await;

        // Aggregate & persist
        let total = outcome.results.len();
        let succeeded = outcome.results.iter().filter(|r| r.is_ok()).count();

        outcome.status = if succeeded == total {
            CycleStatus::Success
        } else if succeeded == 0 {
            CycleStatus::TotalFailure(FailureStage::Update)
        } else {
            CycleStatus::PartialFailure
        };

        if self.persist_policy.should_persist(succeeded, total) {
            match self.state_store.save(ip).await {
                Ok(()) => {
                    debug!("Recorded {} as last confirmed IP", ip);
                    outcome.persisted = true;
                    self.emit_event(EngineEvent::StatePersisted { ip });
                }
                Err(e) => {
                    // Providers are already current; the next cycle repeats
                    // the update and writes again
                    error!("Failed to persist last IP {}: {}", ip, e);
                    self.emit_event(EngineEvent::PersistFailed {
                        error: e.to_string(),
                    });
                    outcome.persist_error = Some(e.to_string());
                }
            }
        } else {
            debug!(
                "{}/{} accounts succeeded, last IP left at {:?}",
                succeeded, total, previous_ip
            );
        }

        self.finish(outcome).await
    }

    /// Read the last confirmed IP; an unreadable store counts as unset
    async fn load_previous_ip(&self) -> Option<IpAddr> {
        match self.state_store.last_ip().await {
            Ok(ip) => ip.filter(|ip| !ip.is_unspecified()),
            Err(e) => {
                warn!("Could not read last IP, treating as unset: {}", e);
                None
            }
        }
    }

    /// Update one account, retrying retryable failures within the cycle
    async fn update_account(&self, account: &AccountConfig, ip: IpAddr) -> UpdateResult {
        let name = account.identity().to_string();

        if let Err(e) = account.validate() {
            warn!("Skipping account '{}': {}", name, e);
            let result =
                UpdateResult::failed(name.clone(), UpdateFailure::configuration(e.to_string()))
                    .with_attempts(0);
            self.emit_event(EngineEvent::UpdateFailed {
                account: name,
                error: e.to_string(),
                attempts: 0,
            });
            return result;
        }

        self.emit_event(EngineEvent::UpdateStarted {
            account: name.clone(),
            new_ip: ip,
        });

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let result = self.guarded_update(account, ip).await.with_attempts(attempt);

            let retry = attempt <= self.max_retries
                && result.failure().is_some_and(|failure| failure.is_retryable());
            if !retry {
                break result;
            }

            if let Some(failure) = result.failure() {
                warn!(
                    "Update attempt {} for '{}' failed: {}. Retrying in {:?}",
                    attempt, name, failure, self.retry_delay
                );
            }
            tokio::time::sleep(self.retry_delay).await;
        };

        match &result.outcome {
            UpdateOutcome::Success | UpdateOutcome::Unchanged => {
                info!("Account '{}' is current at {}", name, ip);
                self.emit_event(EngineEvent::UpdateSucceeded {
                    account: name,
                    new_ip: ip,
                    unchanged: result.outcome == UpdateOutcome::Unchanged,
                });
            }
            UpdateOutcome::Failed(failure) => {
                error!(
                    "Update for '{}' failed after {} attempt(s): {}",
                    name, attempt, failure
                );
                self.emit_event(EngineEvent::UpdateFailed {
                    account: name,
                    error: failure.to_string(),
                    attempts: attempt,
                });
            }
        }

        result
    }

    /// One provider call, abandoned if it outlives the guard
    async fn guarded_update(&self, account: &AccountConfig, ip: IpAddr) -> UpdateResult {
        match tokio::time::timeout(self.call_guard, self.provider.update(account, ip)).await {
            Ok(result) => result,
            Err(_) => UpdateResult::failed(
                account.identity(),
                UpdateFailure::timeout(format!(
                    "{} update did not complete within {:?}",
                    self.provider.provider_name(),
                    self.call_guard
                )),
            ),
        }
    }

    /// Notify and report the terminal state
    async fn finish(&self, outcome: CycleOutcome) -> CycleOutcome {
        let notification = outcome.notification();

        match tokio::time::timeout(self.notify_timeout, self.notifier.notify(&notification)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to deliver cycle notification: {}", e),
            Err(_) => error!(
                "Cycle notification not delivered within {:?}",
                self.notify_timeout
            ),
        }

        info!("Cycle finished: {}", outcome.status);
        self.emit_event(EngineEvent::CycleCompleted {
            status: outcome.status,
        });

        outcome
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_equality() {
        let event = EngineEvent::UpdateSucceeded {
            account: "alice".to_string(),
            new_ip: IpAddr::from([203, 0, 113, 5]),
            unchanged: false,
        };

        assert_eq!(event.clone(), event);
    }
}
