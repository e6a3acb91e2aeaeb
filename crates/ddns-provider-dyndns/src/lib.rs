// # dyndns2 HTTP Provider
//
// This crate provides the update client for providers that speak the
// dyndns2 `nic/update` protocol (Dynu, No-IP, DynDNS and friends).
//
// ## Behavior
//
// - Makes exactly one HTTP request per `update` call
// - Every failure is classified into the returned `UpdateResult`
// - Client-wide request and connect timeouts
// - ❌ NO retry logic (owned by DdnsEngine)
// - ❌ NO state (owned by StateStore)
//
// ## Request
//
// ```text
// GET {protocol}://{server}:{port}{path}?{expanded query template}
// Authorization: Basic base64(username:password)
// User-Agent: ddns-update/<version>
// ```
//
// With `query_md5` or `query_sha256` auth the credentials travel as
// `username=` and a hex-digested `password=` query parameter instead of the
// header.
//
// ## Response
//
// One line per hostname, each starting with a return code:
//
// | Code | Meaning |
// |------|---------|
// | `good <ip>` | updated |
// | `nochg <ip>` | already current |
// | `badauth`, `notfqdn`, `nohost`, `numhost`, `abuse`, `badagent`, `!donator` | rejected |
// | `dnserr`, `911` | provider-side trouble, retryable |
//
// ## Security Requirements
//
// - The password NEVER appears in logs; logged URLs are masked

use async_trait::async_trait;
use ddns_core::config::{AccountConfig, AuthMode, EndpointConfig};
use ddns_core::outcome::{FailureKind, UpdateFailure, UpdateOutcome, UpdateResult};
use ddns_core::traits::DnsProvider;
use ddns_core::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::time::Duration;

/// Longest response excerpt kept in results and logs
const MAX_DETAIL_CHARS: usize = 200;

/// Shown in place of credentials in logged URLs
const MASK: &str = "******";

/// dyndns2 update provider
///
/// # Trust Level: Untrusted
///
/// Stateless and single-shot. All coordination (retries, scheduling,
/// persistence) is owned by `DdnsEngine`.
pub struct DynDnsProvider {
    /// Endpoint shared by every account
    endpoint: EndpointConfig,

    /// HTTP client for update requests
    client: reqwest::Client,
}

// Custom Debug implementation: endpoint summary only
impl std::fmt::Debug for DynDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynDnsProvider")
            .field("endpoint", &self.endpoint.base_url())
            .field("auth", &self.endpoint.auth)
            .finish()
    }
}

impl DynDnsProvider {
    /// Create a new dyndns2 provider
    ///
    /// # Parameters
    ///
    /// - `endpoint`: Server, port, path, query template and auth mode
    /// - `request_timeout`: Upper bound for one update request
    pub fn new(endpoint: EndpointConfig, request_timeout: Duration) -> Result<Self> {
        endpoint.validate()?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .user_agent(endpoint.user_agent.clone())
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { endpoint, client })
    }

    /// Query parameters for one account, in template order
    ///
    /// Pairs whose value expands to nothing are dropped.
    fn query_pairs(&self, account: &AccountConfig, ip: IpAddr) -> Vec<(String, String)> {
        let domains = account.domains.join(",");
        let ip = ip.to_string();

        let mut pairs: Vec<(String, String)> = self
            .endpoint
            .query_template
            .split('&')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let value = value
                    .replace("{ip}", &ip)
                    .replace("{domains}", &domains)
                    .replace("{username}", &account.username);
                if key.is_empty() || value.is_empty() {
                    None
                } else {
                    Some((key.to_string(), value))
                }
            })
            .collect();

        let password = account.password.as_bytes();
        let hashed = match self.endpoint.auth {
            AuthMode::Basic => None,
            AuthMode::QueryMd5 => Some(hex::encode(Md5::digest(password))),
            AuthMode::QuerySha256 => Some(hex::encode(Sha256::digest(password))),
        };
        if let Some(hashed) = hashed {
            pairs.push(("username".to_string(), account.username.clone()));
            pairs.push(("password".to_string(), hashed));
        }

        pairs
    }

    /// URL for logs, with credential values masked
    fn masked_url(&self, pairs: &[(String, String)]) -> String {
        let query = pairs
            .iter()
            .map(|(key, value)| {
                if key == "password" {
                    format!("{}={}", key, MASK)
                } else {
                    format!("{}={}", key, value)
                }
            })
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.endpoint.base_url(), query)
    }
}

#[async_trait]
impl DnsProvider for DynDnsProvider {
    async fn update(&self, account: &AccountConfig, ip: IpAddr) -> UpdateResult {
        let name = account.identity();
        let pairs = self.query_pairs(account, ip);

        tracing::info!("Updating '{}' via {}", name, self.masked_url(&pairs));

        let mut request = self.client.get(self.endpoint.base_url()).query(&pairs);
        if self.endpoint.auth == AuthMode::Basic {
            request = request.basic_auth(&account.username, Some(&account.password));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let failure = transport_failure(&e);
                tracing::warn!("Update request for '{}' failed: {}", name, failure);
                return UpdateResult::failed(name, failure);
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let failure = transport_failure(&e);
                tracing::warn!("Reading response for '{}' failed: {}", name, failure);
                return UpdateResult::failed(name, failure).with_status(status);
            }
        };

        let detail = excerpt(body.trim());
        tracing::info!("Provider response for '{}' ({}): {}", name, status, detail);

        UpdateResult::new(name, classify_response(status, &body))
            .with_status(status)
            .with_detail(detail)
    }

    fn provider_name(&self) -> &'static str {
        "dyndns"
    }
}

/// Classify a provider response
///
/// A multi-host response is a failure if any line carries an error code;
/// it is `Success` if any host was updated and `Unchanged` if every host
/// answered `nochg`.
pub fn classify_response(status: u16, body: &str) -> UpdateOutcome {
    if !(200..300).contains(&status) {
        return UpdateOutcome::Failed(UpdateFailure::new(
            FailureKind::HttpStatus(status),
            format!("HTTP {}: {}", status, excerpt(body.trim())),
        ));
    }

    let codes: Vec<&str> = body
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();

    if codes.is_empty() {
        return UpdateOutcome::Failed(UpdateFailure::new(
            FailureKind::UnrecognizedResponse,
            "empty response from provider",
        ));
    }

    if let Some((code, reason)) = codes
        .iter()
        .find_map(|code| rejection_reason(code).map(|reason| (*code, reason)))
    {
        return UpdateOutcome::Failed(UpdateFailure::new(
            FailureKind::Rejected(code.to_string()),
            format!("{} ({})", reason, code),
        ));
    }

    if codes.iter().all(|code| *code == "good" || *code == "nochg") {
        if codes.contains(&"good") {
            UpdateOutcome::Success
        } else {
            UpdateOutcome::Unchanged
        }
    } else {
        UpdateOutcome::Failed(UpdateFailure::new(
            FailureKind::UnrecognizedResponse,
            format!("unrecognized provider response: {}", excerpt(body.trim())),
        ))
    }
}

fn rejection_reason(code: &str) -> Option<&'static str> {
    let reason = match code {
        "badauth" => "authentication failed, check username and password",
        "notfqdn" => "hostname is not a fully qualified domain name",
        "nohost" => "hostname does not exist under this account",
        "numhost" => "too many hostnames in one request",
        "abuse" => "hostname is blocked for update abuse",
        "badagent" => "provider rejected the client user agent",
        "!donator" => "option not available for this account",
        "dnserr" => "provider DNS error",
        "911" => "provider maintenance, retry later",
        _ => return None,
    };
    Some(reason)
}

fn transport_failure(e: &reqwest::Error) -> UpdateFailure {
    if e.is_timeout() {
        UpdateFailure::timeout(format!("request timed out: {}", e))
    } else {
        UpdateFailure::connection(format!("request failed: {}", e))
    }
}

fn excerpt(s: &str) -> String {
    match s.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
