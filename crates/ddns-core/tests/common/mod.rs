//! Test doubles and common utilities for reconciliation contract tests
//!
//! This module provides minimal test doubles that record how the engine
//! drives its collaborators without doing any real I/O.

#![allow(dead_code)]

use ddns_core::error::{Error, Result};
use ddns_core::outcome::{
    FailureKind, Notification, UpdateFailure, UpdateOutcome, UpdateResult,
};
use ddns_core::traits::{DnsProvider, IpSource, Notifier, StateRecord, StateStore};
use ddns_core::{AccountConfig, DdnsConfig, DdnsEngine};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid test IP")
}

/// An IpSource that returns a fixed address, or fails
#[derive(Clone)]
pub struct ScriptedIpSource {
    answer: Arc<Mutex<Option<IpAddr>>>,
    call_count: Arc<AtomicUsize>,
}

impl ScriptedIpSource {
    pub fn answering(ip: IpAddr) -> Self {
        Self {
            answer: Arc::new(Mutex::new(Some(ip))),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call fails as if all services were unreachable
    pub fn failing() -> Self {
        Self {
            answer: Arc::new(Mutex::new(None)),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Change what subsequent calls return
    pub fn set_answer(&self, ip: Option<IpAddr>) {
        *self.answer.lock().unwrap() = ip;
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IpSource for ScriptedIpSource {
    async fn current(&self) -> Result<IpAddr> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let answer = *self.answer.lock().unwrap();
        answer.ok_or_else(|| Error::resolution("all 2 IP services failed [scripted]"))
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

/// Scripted behavior for one provider call
#[derive(Debug, Clone)]
pub enum Reply {
    Good,
    NoChg,
    Fail(FailureKind),
    /// Sleep far beyond any timeout
    Hang,
}

/// A mock DnsProvider with per-account scripted replies
///
/// Replies are consumed in order; when an account's script runs out, the
/// default reply is used.
#[derive(Clone)]
pub struct MockDnsProvider {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    default_reply: Reply,
    calls: Arc<Mutex<Vec<(String, IpAddr)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    call_delay: Duration,
}

impl MockDnsProvider {
    /// Provider that accepts every update
    pub fn new() -> Self {
        Self::with_default(Reply::Good)
    }

    pub fn with_default(default_reply: Reply) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            default_reply,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            call_delay: Duration::ZERO,
        }
    }

    /// Queue replies for one account
    pub fn script(self, account: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(account.to_string(), replies.into());
        self
    }

    /// Make every call take `delay`
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, account: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == account)
            .count()
    }

    /// Every (account, ip) pair the provider was called with
    pub fn calls(&self) -> Vec<(String, IpAddr)> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, account: &str) -> Reply {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(account)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait::async_trait]
impl DnsProvider for MockDnsProvider {
    async fn update(&self, account: &AccountConfig, ip: IpAddr) -> UpdateResult {
        let name = account.identity().to_string();
        self.calls.lock().unwrap().push((name.clone(), ip));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        let reply = self.next_reply(&name);
        if let Reply::Hang = reply {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Reply::Good | Reply::Hang => UpdateResult::success(name).with_status(200),
            Reply::NoChg => UpdateResult::unchanged(name).with_status(200),
            Reply::Fail(kind) => {
                let message = format!("scripted failure: {:?}", kind);
                UpdateResult::new(name, UpdateOutcome::Failed(UpdateFailure::new(kind, message)))
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// A StateStore that counts calls and can be told to fail writes
#[derive(Clone)]
pub struct CountingStateStore {
    last_ip: Arc<Mutex<Option<IpAddr>>>,
    load_count: Arc<AtomicUsize>,
    save_count: Arc<AtomicUsize>,
    fail_load: Arc<AtomicBool>,
    fail_save: Arc<AtomicBool>,
}

impl CountingStateStore {
    pub fn new(last_ip: Option<IpAddr>) -> Self {
        Self {
            last_ip: Arc::new(Mutex::new(last_ip)),
            load_count: Arc::new(AtomicUsize::new(0)),
            save_count: Arc::new(AtomicUsize::new(0)),
            fail_load: Arc::new(AtomicBool::new(false)),
            fail_save: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_loads(self) -> Self {
        self.fail_load.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_saves(self) -> Self {
        self.fail_save.store(true, Ordering::SeqCst);
        self
    }

    pub fn stored_ip(&self) -> Option<IpAddr> {
        *self.last_ip.lock().unwrap()
    }

    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    /// Number of successful or attempted writes
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StateStore for CountingStateStore {
    async fn load(&self) -> Result<Option<StateRecord>> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(Error::persistence("state file unreadable"));
        }
        Ok(self.stored_ip().map(StateRecord::new))
    }

    async fn save(&self, ip: IpAddr) -> Result<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(Error::persistence("disk full"));
        }
        *self.last_ip.lock().unwrap() = Some(ip);
        Ok(())
    }
}

/// A Notifier that keeps every summary it receives
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    received: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then reports a delivery failure
    pub fn failing() -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.received.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(Error::notify("smtp relay refused connection"));
        }
        Ok(())
    }
}

/// Accounts named after the given users, each with a usable password
pub fn accounts(names: &[&str]) -> Vec<AccountConfig> {
    names
        .iter()
        .map(|name| AccountConfig::new(*name, "secret").with_domains([format!("{}.example.com", name)]))
        .collect()
}

/// Configuration with no in-cycle retries, so each account gets one call
pub fn minimal_config(names: &[&str]) -> DdnsConfig {
    let mut config = DdnsConfig::new(accounts(names));
    config.engine.max_retries = 0;
    config.engine.retry_delay_secs = 0;
    config
}

/// Wire the doubles into an engine, keeping handles for assertions
pub fn build_engine(
    ip_source: &ScriptedIpSource,
    provider: &MockDnsProvider,
    state_store: &CountingStateStore,
    notifier: &RecordingNotifier,
    config: DdnsConfig,
) -> DdnsEngine {
    let (engine, _event_rx) = DdnsEngine::new(
        Box::new(ip_source.clone()),
        Box::new(provider.clone()),
        Box::new(state_store.clone()),
        Box::new(notifier.clone()),
        config,
    )
    .expect("engine construction succeeds");

    engine
}
