//! Configuration types for the DDNS update agent
//!
//! The core treats a [`DdnsConfig`] as an already-loaded input. How it gets
//! built (environment, file) is the daemon's business.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Default "what is my IP" services, tried in order
pub const DEFAULT_IP_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://icanhazip.com",
    "https://ifconfig.me/ip",
    "http://ip.3322.net",
    "http://ddns.oray.com/checkip",
];

/// Main DDNS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdnsConfig {
    /// Provider update endpoint, shared by all accounts
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Provider accounts to keep current
    pub accounts: Vec<AccountConfig>,

    /// IP resolution services, in fallback order
    #[serde(default = "default_ip_services")]
    pub ip_services: Vec<IpServiceConfig>,

    /// Address family to resolve and publish
    #[serde(default)]
    pub ip_version: IpVersion,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl DdnsConfig {
    /// Create a configuration for the given accounts with defaults elsewhere
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            accounts,
            ip_services: default_ip_services(),
            ip_version: IpVersion::default(),
            state_store: StateStoreConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    ///
    /// Only problems that make every cycle meaningless are rejected here.
    /// An account with missing credentials is reported per cycle instead.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.accounts.is_empty() {
            return Err(crate::Error::config("No accounts configured"));
        }

        if self.ip_services.is_empty() {
            return Err(crate::Error::config("No IP resolution services configured"));
        }

        for service in &self.ip_services {
            service.validate()?;
        }

        if self.ip_services.len() < 2 {
            tracing::warn!("Only one IP resolution service configured, no fallback available");
        }

        self.endpoint.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}

/// Provider endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Server host name
    #[serde(default = "default_server")]
    pub server: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Scheme used to reach the server
    #[serde(default)]
    pub protocol: Protocol,

    /// Update path (e.g. "/nic/update")
    #[serde(default = "default_path")]
    pub path: String,

    /// Query template; supports `{ip}`, `{domains}` and `{username}`
    ///
    /// A pair whose value expands to an empty string is left out, so an
    /// account without domains sends no `hostname` and the provider
    /// updates every host under that account.
    #[serde(default = "default_query_template")]
    pub query_template: String,

    /// How credentials are presented to the provider
    #[serde(default)]
    pub auth: AuthMode,

    /// User-Agent header sent with update requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl EndpointConfig {
    /// `protocol://server:port/path`, without query
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.protocol.as_str(),
            self.server,
            self.port,
            self.path
        )
    }

    /// Validate the endpoint configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.server.trim().is_empty() {
            return Err(crate::Error::config("Endpoint server cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::config("Endpoint port must be > 0"));
        }
        if !self.path.starts_with('/') {
            return Err(crate::Error::config(format!(
                "Endpoint path must start with '/': {}",
                self.path
            )));
        }
        if !self.query_template.contains("{ip}") {
            return Err(crate::Error::config(
                "Endpoint query template must contain {ip}",
            ));
        }
        Ok(())
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            protocol: Protocol::default(),
            path: default_path(),
            query_template: default_query_template(),
            auth: AuthMode::default(),
            user_agent: default_user_agent(),
        }
    }
}

/// URL scheme for the provider endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(crate::Error::config(format!(
                "Unsupported protocol '{}'. Supported: http, https",
                other
            ))),
        }
    }
}

/// Credential presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// HTTP basic auth header
    #[default]
    Basic,
    /// `username` and hex MD5 `password` as query parameters (Dynu)
    QueryMd5,
    /// `username` and hex SHA-256 `password` as query parameters
    QuerySha256,
}

impl std::str::FromStr for AuthMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthMode::Basic),
            "query_md5" => Ok(AuthMode::QueryMd5),
            "query_sha256" => Ok(AuthMode::QuerySha256),
            other => Err(crate::Error::config(format!(
                "Unsupported auth mode '{}'. Supported: basic, query_md5, query_sha256",
                other
            ))),
        }
    }
}

/// One set of provider credentials plus the domains it controls
///
/// Missing credentials deserialize as empty so that one incomplete entry
/// fails only its own update, via [`AccountConfig::validate`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account user name
    #[serde(default, deserialize_with = "null_as_empty")]
    pub username: String,

    /// Account password or update token
    /// ⚠️ NEVER log this value
    #[serde(default, deserialize_with = "null_as_empty")]
    pub password: String,

    /// Domains to update; empty means every domain under the account
    #[serde(default)]
    pub domains: Vec<String>,
}

// Custom Debug implementation that hides the password
impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("domains", &self.domains)
            .finish()
    }
}

impl AccountConfig {
    /// Create an account that updates every domain it owns
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domains: Vec::new(),
        }
    }

    /// Restrict the account to the given domains
    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Identity used in logs and notifications
    pub fn identity(&self) -> &str {
        &self.username
    }

    /// Check that the account can be used at all
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.username.trim().is_empty() {
            return Err(crate::Error::config("Account username cannot be empty"));
        }
        if self.password.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Account '{}' has an empty password",
                self.username
            )));
        }
        if let Some(domain) = self.domains.iter().find(|d| d.trim().is_empty()) {
            return Err(crate::Error::config(format!(
                "Account '{}' has an empty domain entry ({:?})",
                self.username, domain
            )));
        }
        Ok(())
    }
}

/// One IP resolution service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpServiceConfig {
    /// URL to GET; the body must contain the address somewhere
    pub url: String,
}

impl IpServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(crate::Error::config(format!(
                "IP service URL must use HTTP or HTTPS scheme. Got: {}",
                self.url
            )));
        }
        Ok(())
    }
}

fn default_ip_services() -> Vec<IpServiceConfig> {
    DEFAULT_IP_SERVICES
        .iter()
        .map(|url| IpServiceConfig::new(*url))
        .collect()
}

/// Address family to resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4 only
    #[default]
    V4,
    /// IPv6 only
    V6,
}

impl IpVersion {
    /// Whether `ip` belongs to this family
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            IpVersion::V4 => ip.is_ipv4(),
            IpVersion::V6 => ip.is_ipv6(),
        }
    }
}

impl std::str::FromStr for IpVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4" | "ipv4" | "4" => Ok(IpVersion::V4),
            "v6" | "ipv6" | "6" => Ok(IpVersion::V6),
            other => Err(crate::Error::config(format!(
                "Unsupported IP version '{}'. Supported: v4, v6",
                other
            ))),
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,
}

/// Whether a partially successful cycle advances the last known IP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Persist only when every account succeeded; laggards get retried next cycle
    #[default]
    AllSucceeded,
    /// Persist when at least one account succeeded
    AnySucceeded,
}

impl PersistPolicy {
    /// Decide whether `succeeded` out of `total` accounts is enough to persist
    pub fn should_persist(&self, succeeded: usize, total: usize) -> bool {
        if total == 0 || succeeded == 0 {
            return false;
        }
        match self {
            PersistPolicy::AllSucceeded => succeeded == total,
            PersistPolicy::AnySucceeded => true,
        }
    }
}

impl std::str::FromStr for PersistPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "all_succeeded" => Ok(PersistPolicy::AllSucceeded),
            "any" | "any_succeeded" => Ok(PersistPolicy::AnySucceeded),
            other => Err(crate::Error::config(format!(
                "Unsupported persist policy '{}'. Supported: all_succeeded, any_succeeded",
                other
            ))),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for a single IP resolution attempt (in seconds)
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,

    /// Timeout for a single provider update request (in seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra attempts for a retryable account failure within one cycle
    ///
    /// Set to 0 to leave every retry to the next scheduled cycle.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay between retry attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Upper bound on account updates in flight at once
    #[serde(default = "default_max_concurrent_updates")]
    pub max_concurrent_updates: usize,

    /// Partial-success persistence policy
    #[serde(default)]
    pub persist_policy: PersistPolicy,

    /// Capacity of the monitoring event channel
    ///
    /// When full, new events are dropped with a warning.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.resolve_timeout_secs == 0 {
            return Err(crate::Error::config("Resolve timeout must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        if self.max_concurrent_updates == 0 {
            return Err(crate::Error::config("Max concurrent updates must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_secs: default_resolve_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            max_concurrent_updates: default_max_concurrent_updates(),
            persist_policy: PersistPolicy::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_server() -> String {
    "api-ipv4.dynu.com".to_string()
}

fn default_port() -> u16 {
    8245
}

fn default_path() -> String {
    "/nic/update".to_string()
}

fn default_query_template() -> String {
    "hostname={domains}&myip={ip}".to_string()
}

fn default_user_agent() -> String {
    concat!("ddns-update/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_resolve_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    2
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_concurrent_updates() -> usize {
    4
}

fn default_event_channel_capacity() -> usize {
    256
}
