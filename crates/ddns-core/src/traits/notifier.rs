// # Notifier Trait
//
// Delivery boundary for cycle summaries. The engine builds the subject and
// body; implementations only move them somewhere an operator will see.

use async_trait::async_trait;

use crate::outcome::Notification;

/// Trait for notification sinks
///
/// A failed delivery is reported back to the engine, which logs it. It never
/// changes the outcome of the cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one cycle summary
    async fn notify(&self, notification: &Notification) -> Result<(), crate::Error>;
}
