// # ddns-core
//
// Core library for the DDNS update agent.
//
// ## Architecture Overview
//
// One reconciliation cycle answers three questions: what is our public IP,
// has it changed since the last confirmed update, and did every account
// accept the new address. The pieces:
//
// - **IpSource**: Trait for discovering the current public IP
// - **FallbackIpSource**: Ordered chain of IP sources with per-attempt timeouts
// - **DnsProvider**: Trait for pushing an IP to one provider account
// - **StateStore**: Trait for persisting the last confirmed IP
// - **Notifier**: Trait for delivering a cycle summary to an operator
// - **DdnsEngine**: Runs resolve → compare → update → persist → notify
//
// ## Design Principles
//
// 1. **Library-First**: The daemon only wires things together
// 2. **Contained failures**: One account failing never affects another
// 3. **Bounded**: Every network call carries an explicit timeout
// 4. **Idempotency**: No provider call when the IP has not changed

pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod outcome;
pub mod resolver;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{AccountConfig, DdnsConfig, EndpointConfig, EngineConfig, PersistPolicy};
pub use engine::{DdnsEngine, EngineEvent};
pub use error::{Error, Result};
pub use notify::LogNotifier;
pub use outcome::{
    CycleOutcome, CycleStatus, FailureKind, FailureStage, Notification, UpdateFailure,
    UpdateOutcome, UpdateResult,
};
pub use resolver::FallbackIpSource;
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{DnsProvider, IpSource, Notifier, StateStore};
