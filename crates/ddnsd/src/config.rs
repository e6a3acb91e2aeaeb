// Environment configuration for ddnsd
//
// Every setting comes from a `DDNS_*` environment variable. Parsing goes
// through a lookup function so the rules can be tested without touching the
// process environment.

use anyhow::{Context, Result};
use ddns_core::config::{
    AccountConfig, AuthMode, DdnsConfig, IpServiceConfig, IpVersion, PersistPolicy, Protocol,
    StateStoreConfig,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::schedule::CycleSchedule;
use crate::smtp::{IMPLICIT_TLS_PORT, SmtpConfig};

/// Default scheduling interval (5 minutes)
const DEFAULT_INTERVAL_SECS: u64 = 300;

const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 30;

/// Intervals below this are allowed but warned about
const MIN_RECOMMENDED_INTERVAL_SECS: u64 = 60;

const DEFAULT_STATE_PATH: &str = "/var/lib/ddns-update/state.json";
const DEFAULT_LOCK_PATH: &str = "/tmp/ddns-update.lock";
const DEFAULT_HEALTH_FILE: &str = "/tmp/ddns-update.health";

/// Daemon configuration
#[derive(Debug)]
pub struct Config {
    /// Everything the engine needs
    pub ddns: DdnsConfig,

    /// When cycles run
    pub schedule: CycleSchedule,

    /// Run a single cycle and exit
    pub run_once: bool,

    /// Exclusive lock for one-shot runs
    pub lock_path: PathBuf,

    /// Liveness marker; `None` disables it
    pub health_file: Option<PathBuf>,

    pub log_level: String,

    /// Email delivery; `None` means summaries are only logged
    pub smtp: Option<SmtpConfig>,

    /// Account entries that could not be read, reported once logging is up
    pub skipped_accounts: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let accounts_json = var("DDNS_ACCOUNTS").context(
            "DDNS_ACCOUNTS is required. \
            Set it via: export DDNS_ACCOUNTS='[{\"username\":\"me\",\"password\":\"secret\"}]'",
        )?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&accounts_json)
            .context("DDNS_ACCOUNTS must be a JSON array of {username, password, domains}")?;

        // A broken entry costs only that account
        let mut accounts = Vec::with_capacity(entries.len());
        let mut skipped_accounts = Vec::new();
        for (idx, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<AccountConfig>(entry) {
                Ok(account) => accounts.push(account),
                Err(e) => skipped_accounts.push(format!("DDNS_ACCOUNTS entry #{}: {}", idx + 1, e)),
            }
        }

        let mut ddns = DdnsConfig::new(accounts);

        // Endpoint
        if let Some(server) = var("DDNS_SERVER") {
            ddns.endpoint.server = server;
        }
        ddns.endpoint.port = parse_or(&var, "DDNS_PORT", ddns.endpoint.port)?;
        ddns.endpoint.protocol = parse_or::<Protocol, _>(&var, "DDNS_PROTOCOL", ddns.endpoint.protocol)?;
        if let Some(path) = var("DDNS_PATH") {
            ddns.endpoint.path = path;
        }
        if let Some(template) = var("DDNS_QUERY_TEMPLATE") {
            ddns.endpoint.query_template = template;
        }
        ddns.endpoint.auth = parse_or::<AuthMode, _>(&var, "DDNS_AUTH", ddns.endpoint.auth)?;

        // IP resolution
        if let Some(services) = var("DDNS_IP_SERVICES") {
            ddns.ip_services = services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(IpServiceConfig::new)
                .collect();
        }
        ddns.ip_version = parse_or::<IpVersion, _>(&var, "DDNS_IP_VERSION", ddns.ip_version)?;

        // State store
        ddns.state_store = match var("DDNS_STATE_STORE_TYPE").as_deref().unwrap_or("file") {
            "file" => StateStoreConfig::File {
                path: var("DDNS_STATE_STORE_PATH").unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
            },
            "memory" => StateStoreConfig::Memory,
            other => anyhow::bail!(
                "DDNS_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };

        // Engine
        let engine = &mut ddns.engine;
        engine.persist_policy =
            parse_or::<PersistPolicy, _>(&var, "DDNS_PERSIST_POLICY", engine.persist_policy)?;
        engine.max_retries = parse_or(&var, "DDNS_MAX_RETRIES", engine.max_retries)?;
        engine.retry_delay_secs = parse_or(&var, "DDNS_RETRY_DELAY_SECS", engine.retry_delay_secs)?;
        engine.request_timeout_secs =
            parse_or(&var, "DDNS_REQUEST_TIMEOUT_SECS", engine.request_timeout_secs)?;
        engine.resolve_timeout_secs =
            parse_or(&var, "DDNS_RESOLVE_TIMEOUT_SECS", engine.resolve_timeout_secs)?;
        engine.max_concurrent_updates =
            parse_or(&var, "DDNS_MAX_CONCURRENT_UPDATES", engine.max_concurrent_updates)?;

        // Scheduling
        let schedule = match (var("DDNS_SCHEDULE"), var("DDNS_INTERVAL_SECS")) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Set either DDNS_SCHEDULE or DDNS_INTERVAL_SECS, not both")
            }
            (Some(expression), None) => CycleSchedule::cron(&expression)?,
            (None, _) => CycleSchedule::Every(Duration::from_secs(parse_or(
                &var,
                "DDNS_INTERVAL_SECS",
                DEFAULT_INTERVAL_SECS,
            )?)),
        };
        let run_once = parse_bool(&var, "DDNS_RUN_ONCE")?;

        let health_file = match var("DDNS_HEALTH_FILE").as_deref() {
            Some("none") | Some("off") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_HEALTH_FILE)),
        };

        let smtp = smtp_from_vars(&var)?;

        Ok(Self {
            ddns,
            schedule,
            run_once,
            lock_path: PathBuf::from(
                var("DDNS_LOCK_PATH").unwrap_or_else(|| DEFAULT_LOCK_PATH.to_string()),
            ),
            health_file,
            log_level: var("DDNS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            smtp,
            skipped_accounts,
        })
    }

    /// Validate the configuration
    ///
    /// Checks daemon-level settings, then delegates to `DdnsConfig::validate`.
    pub fn validate(&self) -> Result<()> {
        self.schedule.validate()?;

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        if let StateStoreConfig::File { path } = &self.ddns.state_store
            && path.is_empty()
        {
            anyhow::bail!("DDNS_STATE_STORE_PATH cannot be empty when DDNS_STATE_STORE_TYPE=file");
        }

        if let Some(smtp) = &self.smtp {
            if smtp.receivers.is_empty() {
                anyhow::bail!("DDNS_SMTP_RECEIVER must name at least one address");
            }
            if smtp.timeout.is_zero() {
                anyhow::bail!("DDNS_SMTP_TIMEOUT_SECS must be at least 1 second");
            }
        }

        self.ddns.validate()?;

        Ok(())
    }

    /// Whether cycles come closer together than providers tolerate
    pub fn schedule_is_aggressive(&self) -> bool {
        self.schedule
            .shortest_gap()
            .is_some_and(|gap| gap < Duration::from_secs(MIN_RECOMMENDED_INTERVAL_SECS))
    }
}

/// SMTP settings; enabled by `DDNS_SMTP_SERVER`, which then requires the rest
fn smtp_from_vars<F>(var: &F) -> Result<Option<SmtpConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(server) = var("DDNS_SMTP_SERVER") else {
        return Ok(None);
    };

    let required = |name: &str| {
        var(name).with_context(|| format!("{} is required when DDNS_SMTP_SERVER is set", name))
    };

    let receivers = required("DDNS_SMTP_RECEIVER")?
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();

    let starttls = match var("DDNS_SMTP_USE_TLS") {
        Some(_) => parse_bool(var, "DDNS_SMTP_USE_TLS")?,
        None => true,
    };

    Ok(Some(SmtpConfig {
        server,
        port: parse_or(var, "DDNS_SMTP_PORT", IMPLICIT_TLS_PORT)?,
        username: required("DDNS_SMTP_USERNAME")?,
        password: required("DDNS_SMTP_PASSWORD")?,
        sender: required("DDNS_SMTP_SENDER")?,
        receivers,
        starttls,
        timeout: Duration::from_secs(parse_or(
            var,
            "DDNS_SMTP_TIMEOUT_SECS",
            DEFAULT_SMTP_TIMEOUT_SECS,
        )?),
    }))
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        None => Ok(default),
    }
}

fn parse_bool<F>(var: &F, name: &str) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name).map(|v| v.to_lowercase()).as_deref() {
        None | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => anyhow::bail!("{} must be true or false. Got: {}", name, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ACCOUNTS: &str =
        r#"[{"username":"alice","password":"secret","domains":["home.example.com"]},{"username":"bob","password":"pw"}]"#;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DDNS_ACCOUNTS", ACCOUNTS)]).unwrap();

        assert_eq!(config.ddns.accounts.len(), 2);
        assert_eq!(config.ddns.accounts[0].domains, vec!["home.example.com"]);
        assert!(config.ddns.accounts[1].domains.is_empty());
        assert_eq!(config.ddns.endpoint.port, 8245);
        assert!(matches!(config.schedule, CycleSchedule::Every(d) if d == Duration::from_secs(300)));
        assert!(!config.schedule_is_aggressive());
        assert!(config.smtp.is_none());
        assert!(config.skipped_accounts.is_empty());
        assert!(!config.run_once);
        assert_eq!(config.health_file, Some(PathBuf::from("/tmp/ddns-update.health")));
        assert!(matches!(config.ddns.state_store, StateStoreConfig::File { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DDNS_ACCOUNTS", ACCOUNTS),
            ("DDNS_SERVER", "members.example.net"),
            ("DDNS_PORT", "443"),
            ("DDNS_PROTOCOL", "https"),
            ("DDNS_AUTH", "query_sha256"),
            ("DDNS_IP_SERVICES", "https://a.example/ip, https://b.example/ip"),
            ("DDNS_IP_VERSION", "v6"),
            ("DDNS_STATE_STORE_TYPE", "memory"),
            ("DDNS_PERSIST_POLICY", "any"),
            ("DDNS_MAX_RETRIES", "0"),
            ("DDNS_MAX_CONCURRENT_UPDATES", "1"),
            ("DDNS_INTERVAL_SECS", "30"),
            ("DDNS_RUN_ONCE", "true"),
            ("DDNS_HEALTH_FILE", "off"),
        ])
        .unwrap();

        assert_eq!(config.ddns.endpoint.server, "members.example.net");
        assert_eq!(config.ddns.endpoint.protocol, Protocol::Https);
        assert_eq!(config.ddns.endpoint.auth, AuthMode::QuerySha256);
        assert_eq!(config.ddns.ip_services.len(), 2);
        assert_eq!(config.ddns.ip_version, IpVersion::V6);
        assert!(matches!(config.ddns.state_store, StateStoreConfig::Memory));
        assert_eq!(config.ddns.engine.persist_policy, PersistPolicy::AnySucceeded);
        assert_eq!(config.ddns.engine.max_retries, 0);
        assert!(config.run_once);
        assert_eq!(config.health_file, None);
        assert!(config.schedule_is_aggressive());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_incomplete_account_is_not_fatal() {
        let config = load(&[(
            "DDNS_ACCOUNTS",
            r#"[{"username":"alice","password":"s"},{"username":"bob"}]"#,
        )])
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.ddns.accounts.len(), 2);
        assert!(config.ddns.accounts[0].validate().is_ok());
        assert!(config.ddns.accounts[1].validate().is_err());
    }

    #[test]
    fn test_unreadable_account_entry_is_skipped() {
        let config = load(&[(
            "DDNS_ACCOUNTS",
            r#"[{"username":"alice","password":"s"},42,{"username":"carol","password":"pw","domains":"x"}]"#,
        )])
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.ddns.accounts.len(), 1);
        assert_eq!(config.ddns.accounts[0].username, "alice");
        assert_eq!(config.skipped_accounts.len(), 2);
        assert!(config.skipped_accounts[0].contains("entry #2"));
        assert!(config.skipped_accounts[1].contains("entry #3"));
    }

    #[test]
    fn test_cron_schedule() {
        let config = load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_SCHEDULE", "*/5 * * * *")]).unwrap();
        assert!(matches!(config.schedule, CycleSchedule::Cron { .. }));
        assert!(!config.schedule_is_aggressive());
        assert!(config.validate().is_ok());

        let config = load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_SCHEDULE", "* * * * * *")]).unwrap();
        assert!(config.schedule_is_aggressive());

        assert!(load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_SCHEDULE", "whenever")]).is_err());
        assert!(
            load(&[
                ("DDNS_ACCOUNTS", ACCOUNTS),
                ("DDNS_SCHEDULE", "*/5 * * * *"),
                ("DDNS_INTERVAL_SECS", "300"),
            ])
            .is_err()
        );
    }

    #[test]
    fn test_smtp_settings() {
        let config = load(&[
            ("DDNS_ACCOUNTS", ACCOUNTS),
            ("DDNS_SMTP_SERVER", "smtp.example.com"),
            ("DDNS_SMTP_USERNAME", "ddns"),
            ("DDNS_SMTP_PASSWORD", "mailpass"),
            ("DDNS_SMTP_SENDER", "ddns@example.com"),
            ("DDNS_SMTP_RECEIVER", "ops@example.com, oncall@example.com"),
        ])
        .unwrap();

        let smtp = config.smtp.as_ref().unwrap();
        assert_eq!(smtp.port, 465);
        assert!(smtp.starttls);
        assert_eq!(smtp.receivers, vec!["ops@example.com", "oncall@example.com"]);
        assert_eq!(smtp.timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
        assert!(!format!("{:?}", config).contains("mailpass"));

        let err = load(&[
            ("DDNS_ACCOUNTS", ACCOUNTS),
            ("DDNS_SMTP_SERVER", "smtp.example.com"),
            ("DDNS_SMTP_USERNAME", "ddns"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("DDNS_SMTP_RECEIVER"));
    }

    #[test]
    fn test_missing_accounts() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DDNS_ACCOUNTS is required"));
    }

    #[test]
    fn test_malformed_accounts() {
        assert!(load(&[("DDNS_ACCOUNTS", "alice:secret")]).is_err());
    }

    #[test]
    fn test_empty_accounts_fail_validation() {
        let config = load(&[("DDNS_ACCOUNTS", "[]")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_numbers_and_enums() {
        assert!(load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_PORT", "http")]).is_err());
        assert!(load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_PROTOCOL", "gopher")]).is_err());
        assert!(load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_STATE_STORE_TYPE", "redis")]).is_err());
        assert!(load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_RUN_ONCE", "maybe")]).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_INTERVAL_SECS", "0")]).unwrap();
        assert!(config.validate().is_err());

        let config = load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_LOG_LEVEL", "loud")]).unwrap();
        assert!(config.validate().is_err());

        let config = load(&[("DDNS_ACCOUNTS", ACCOUNTS), ("DDNS_PATH", "nic/update")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_does_not_leak_passwords() {
        let config = load(&[("DDNS_ACCOUNTS", ACCOUNTS)]).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
    }
}
