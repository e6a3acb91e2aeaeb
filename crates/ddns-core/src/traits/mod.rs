//! Core traits for the DDNS update agent
//!
//! This module defines the seams the engine is built around.
//!
//! - [`IpSource`]: Discover the current public IP
//! - [`DnsProvider`]: Push an IP to one provider account
//! - [`StateStore`]: Persist the last confirmed IP
//! - [`Notifier`]: Deliver a cycle summary

pub mod dns_provider;
pub mod ip_source;
pub mod notifier;
pub mod state_store;

pub use dns_provider::DnsProvider;
pub use ip_source::{IpSource, is_usable_address};
pub use notifier::Notifier;
pub use state_store::{StateRecord, StateStore};
