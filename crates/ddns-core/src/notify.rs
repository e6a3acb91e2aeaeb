//! Log-sink notifier
//!
//! Writes every cycle summary through `tracing`, at a level that matches the
//! outcome. Used on its own when no other delivery channel is configured, so
//! no cycle ever finishes silently.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::outcome::{CycleStatus, Notification};
use crate::traits::Notifier;

/// Notifier that logs summaries
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), crate::Error> {
        let subject = &notification.subject;
        let body = &notification.body;

        match notification.status {
            CycleStatus::NoChange => debug!(status = %notification.status, "{}\n{}", subject, body),
            CycleStatus::Success => info!(status = %notification.status, "{}\n{}", subject, body),
            CycleStatus::PartialFailure => {
                warn!(status = %notification.status, "{}\n{}", subject, body)
            }
            CycleStatus::TotalFailure(_) => {
                error!(status = %notification.status, "{}\n{}", subject, body)
            }
        }

        Ok(())
    }
}
