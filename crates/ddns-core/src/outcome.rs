//! Per-account and per-cycle results
//!
//! Everything in here is plain data produced by one reconciliation cycle.
//! The notifier, the log sink and the persistence decision all read from
//! these values rather than from side effects.

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;

/// Why a single account update failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Request did not complete in time
    Timeout,
    /// Could not connect or the transport broke
    Connection,
    /// Provider answered with a non-success status
    HttpStatus(u16),
    /// Provider answered 2xx with an error code (e.g. `badauth`)
    Rejected(String),
    /// Provider answered 2xx with a body we do not understand
    UnrecognizedResponse,
    /// Account credentials or domains are unusable
    Configuration,
}

impl FailureKind {
    /// Whether trying again later in the same cycle can help
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Timeout | FailureKind::Connection => true,
            FailureKind::HttpStatus(status) => *status >= 500 || *status == 429,
            FailureKind::Rejected(code) => code == "911" || code == "dnserr",
            FailureKind::UnrecognizedResponse | FailureKind::Configuration => false,
        }
    }
}

/// A failed update with enough detail for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl UpdateFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Configuration, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for UpdateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Classified result of one provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Provider accepted the new address
    Success,
    /// Provider reported the address was already current
    Unchanged,
    /// Update did not take effect
    Failed(UpdateFailure),
}

impl UpdateOutcome {
    /// `Success` and `Unchanged` both leave the account current
    pub fn is_ok(&self) -> bool {
        !matches!(self, UpdateOutcome::Failed(_))
    }
}

/// Result for one account in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    /// Account identity (user name)
    pub account: String,
    /// Classified outcome
    pub outcome: UpdateOutcome,
    /// HTTP status of the final attempt, when a response was received
    pub status: Option<u16>,
    /// Raw provider response or error summary
    pub detail: Option<String>,
    /// Number of provider calls made (0 when the account was never contacted)
    pub attempts: usize,
}

impl UpdateResult {
    pub fn new(account: impl Into<String>, outcome: UpdateOutcome) -> Self {
        Self {
            account: account.into(),
            outcome,
            status: None,
            detail: None,
            attempts: 1,
        }
    }

    pub fn success(account: impl Into<String>) -> Self {
        Self::new(account, UpdateOutcome::Success)
    }

    pub fn unchanged(account: impl Into<String>) -> Self {
        Self::new(account, UpdateOutcome::Unchanged)
    }

    pub fn failed(account: impl Into<String>, failure: UpdateFailure) -> Self {
        Self::new(account, UpdateOutcome::Failed(failure))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The failure, if this account did not end up current
    pub fn failure(&self) -> Option<&UpdateFailure> {
        match &self.outcome {
            UpdateOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Which stage stopped a totally failed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// No public IP could be determined
    Resolution,
    /// Every account update failed
    Update,
}

/// Terminal state of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Every account is current with the resolved IP
    Success,
    /// Resolved IP equals the last known IP; nobody was contacted
    NoChange,
    /// Some accounts succeeded, some failed
    PartialFailure,
    /// Nothing succeeded
    TotalFailure(FailureStage),
}

impl CycleStatus {
    /// Whether the cycle left every account current
    pub fn is_healthy(&self) -> bool {
        matches!(self, CycleStatus::Success | CycleStatus::NoChange)
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStatus::Success => f.write_str("success"),
            CycleStatus::NoChange => f.write_str("no change"),
            CycleStatus::PartialFailure => f.write_str("partial failure"),
            CycleStatus::TotalFailure(FailureStage::Resolution) => {
                f.write_str("total failure (resolution)")
            }
            CycleStatus::TotalFailure(FailureStage::Update) => f.write_str("total failure (update)"),
        }
    }
}

/// Subject/body pair handed to a [`crate::Notifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub status: CycleStatus,
    pub subject: String,
    pub body: String,
}

/// Aggregate of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// When the cycle began
    pub started_at: DateTime<Utc>,
    /// Last known IP at cycle start (`None` when unset)
    pub previous_ip: Option<IpAddr>,
    /// Freshly resolved IP (`None` when resolution failed)
    pub resolved_ip: Option<IpAddr>,
    /// Terminal state
    pub status: CycleStatus,
    /// One entry per configured account, in configuration order
    pub results: Vec<UpdateResult>,
    /// Resolution error text, for `TotalFailure(Resolution)`
    pub resolution_error: Option<String>,
    /// Whether the resolved IP was written to the state store
    pub persisted: bool,
    /// State write error; the provider updates already happened regardless
    pub persist_error: Option<String>,
}

impl CycleOutcome {
    /// Accounts that ended up current
    pub fn succeeded(&self) -> impl Iterator<Item = &UpdateResult> {
        self.results.iter().filter(|r| r.is_ok())
    }

    /// Accounts that did not
    pub fn failed(&self) -> impl Iterator<Item = &UpdateResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }

    /// Build the operator-facing summary
    pub fn notification(&self) -> Notification {
        let subject = match self.status {
            CycleStatus::Success => "DDNS update succeeded",
            CycleStatus::NoChange => "DDNS address unchanged",
            CycleStatus::PartialFailure => "DDNS update partially failed",
            CycleStatus::TotalFailure(FailureStage::Update) => "DDNS update failed",
            CycleStatus::TotalFailure(FailureStage::Resolution) => "DDNS public IP lookup failed",
        };

        let mut lines = Vec::new();

        match self.status {
            CycleStatus::TotalFailure(FailureStage::Resolution) => {
                lines.push("Could not determine the public IP address from any service.".to_string());
                if let Some(error) = &self.resolution_error {
                    lines.push(format!("Error: {}", error));
                }
                lines.push(
                    "No account was contacted; the next scheduled cycle will try again.".to_string(),
                );
            }
            CycleStatus::NoChange => {
                lines.push(format!(
                    "Public IP is still {}; no account was contacted.",
                    display_ip(self.resolved_ip)
                ));
            }
            _ => {
                lines.push(format!("New IP: {}", display_ip(self.resolved_ip)));
                lines.push(format!("Previous IP: {}", display_ip(self.previous_ip)));
            }
        }

        lines.push(format!(
            "Time: {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        let succeeded: Vec<_> = self.succeeded().collect();
        if !succeeded.is_empty() {
            lines.push(String::new());
            lines.push(format!("Updated accounts ({}):", succeeded.len()));
            for result in succeeded {
                let note = match result.outcome {
                    UpdateOutcome::Unchanged => " (already current)",
                    _ => "",
                };
                lines.push(format!("  - {}{}", result.account, note));
            }
        }

        let failed: Vec<_> = self.failed().collect();
        if !failed.is_empty() {
            lines.push(String::new());
            lines.push(format!("Failed accounts ({}):", failed.len()));
            for result in failed {
                let reason = result
                    .failure()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unknown error");
                lines.push(format!("  - {}: {}", result.account, reason));
            }
        }

        if matches!(
            self.status,
            CycleStatus::Success | CycleStatus::PartialFailure
        ) {
            lines.push(String::new());
            if self.persisted {
                lines.push(format!(
                    "Last known IP recorded as {}.",
                    display_ip(self.resolved_ip)
                ));
            } else if let Some(error) = &self.persist_error {
                lines.push(format!(
                    "Warning: could not record the new IP ({}); the next cycle will repeat the update.",
                    error
                ));
            } else {
                lines.push(
                    "Last known IP left unchanged so failed accounts are retried next cycle."
                        .to_string(),
                );
            }
        }

        Notification {
            status: self.status,
            subject: subject.to_string(),
            body: lines.join("\n"),
        }
    }
}

fn display_ip(ip: Option<IpAddr>) -> String {
    ip.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
