// # HTTP IP Source
//
// This crate provides HTTP "what is my IP" sources for the DDNS update agent.
//
// ## Architecture
//
// Each [`HttpIpSource`] wraps one service URL and makes exactly one GET per
// `current()` call. Services disagree on response format (plain text, HTML,
// localized prose), so the body is scanned for the first address of the
// wanted family with a permissive pattern instead of being parsed as a
// whole.
//
// Falling over from one service to the next is the job of
// `ddns_core::FallbackIpSource`; [`fallback_from_config`] builds that chain
// from the configured service list.

use ddns_core::config::{DdnsConfig, IpVersion};
use ddns_core::traits::{IpSource, is_usable_address};
use ddns_core::{Error, FallbackIpSource, Result};
use regex::Regex;

use std::net::IpAddr;
use std::time::Duration;

/// User-Agent sent to IP services
const USER_AGENT: &str = concat!("ddns-update/", env!("CARGO_PKG_VERSION"));

/// Single HTTP IP service
pub struct HttpIpSource {
    /// URL to fetch the address from
    url: String,

    /// Address family to look for in the body
    version: IpVersion,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpIpSource {
    /// Create a new HTTP IP source
    ///
    /// # Parameters
    ///
    /// - `url`: URL to fetch the IP from (e.g., "https://api.ipify.org")
    /// - `version`: Address family to extract
    /// - `timeout`: Upper bound for the whole request
    pub fn new(url: impl Into<String>, version: IpVersion, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            version,
            client,
        })
    }

    /// Service URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch current IP from the HTTP service
    async fn fetch_ip(&self) -> Result<IpAddr> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::http(format!("Request timed out: {}", e))
            } else {
                Error::http(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(format!("HTTP error: {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response: {}", e)))?;

        extract_address(&body, self.version).ok_or_else(|| {
            Error::resolution(format!(
                "No {:?} address in response: {:?}",
                self.version,
                truncate(body.trim(), 80)
            ))
        })
    }
}

#[async_trait::async_trait]
impl IpSource for HttpIpSource {
    async fn current(&self) -> Result<IpAddr> {
        let ip = self.fetch_ip().await?;
        tracing::debug!("{} reported {}", self.url, ip);
        Ok(ip)
    }

    fn name(&self) -> String {
        self.url.clone()
    }
}

/// Dotted-quad candidates; octet range is checked by the parser
const IPV4_PATTERN: &str = r"[0-9]{1,3}(?:\.[0-9]{1,3}){3}";

/// Colon-separated hex groups, optionally ending in an embedded IPv4 tail
const IPV6_PATTERN: &str = r"[0-9A-Fa-f]{0,4}(?::[0-9A-Fa-f]{0,4}){2,7}(?:\.[0-9]{1,3}){0,3}";

/// Find the first usable address of the wanted family in a response body
///
/// Handles plain-text answers (`203.0.113.5\n`), HTML pages
/// (`<body>Current IP Address: 203.0.113.5</body>`), addresses glued to
/// labels or ports (`IP:203.0.113.5`, `203.0.113.5:443`) and prose with
/// non-ASCII punctuation (`当前 IP：203.0.113.5 来自于：...`).
///
/// Candidates that are not publishable (loopback, unspecified, multicast)
/// are skipped and scanning continues.
pub fn extract_address(body: &str, version: IpVersion) -> Option<IpAddr> {
    let pattern = match version {
        IpVersion::V4 => IPV4_PATTERN,
        IpVersion::V6 => IPV6_PATTERN,
    };
    let re = Regex::new(pattern).ok()?;

    re.find_iter(body)
        .flat_map(|m| {
            // `IPv6:2001:db8::1` matches from the `6`; only the suffixes are real
            let glued = body[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric());
            candidates(m.as_str()).skip(usize::from(glued))
        })
        .filter_map(|candidate| candidate.parse::<IpAddr>().ok())
        .find(|ip| version.matches(ip) && is_usable_address(ip))
}

/// The match itself, then whatever follows each colon
fn candidates(token: &str) -> impl Iterator<Item = &str> {
    std::iter::once(token).chain(
        token
            .match_indices(':')
            .map(move |(idx, _)| &token[idx + 1..])
            .filter(|rest| !rest.is_empty()),
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Build the ordered resolution chain from configuration
pub fn fallback_from_config(config: &DdnsConfig) -> Result<FallbackIpSource> {
    let timeout = config.engine.resolve_timeout();

    let candidates = config
        .ip_services
        .iter()
        .map(|service| -> Result<Box<dyn IpSource>> {
            service.validate()?;
            let source = HttpIpSource::new(service.url.clone(), config.ip_version, timeout)?;
            Ok(Box::new(source))
        })
        .collect::<Result<Vec<_>>>()?;

    if candidates.is_empty() {
        return Err(Error::config("No IP resolution services configured"));
    }

    tracing::info!(
        "IP resolution chain: {} service(s), {:?} each",
        candidates.len(),
        timeout
    );

    Ok(FallbackIpSource::new(candidates, timeout).with_version(config.ip_version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use ddns_core::config::{AccountConfig, IpServiceConfig};
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// URL of a port nobody listens on
    async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[test]
    fn test_extract_plain_text() {
        assert_eq!(
            extract_address("203.0.113.5\n", IpVersion::V4),
            Some("203.0.113.5".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_from_html() {
        let body = "<html><head><title>Current IP Check</title></head>\
                    <body>Current IP Address: 198.51.100.9</body></html>";
        assert_eq!(
            extract_address(body, IpVersion::V4),
            Some("198.51.100.9".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_from_localized_prose() {
        let body = "当前 IP：203.0.113.77  来自于：中国 上海 电信";
        assert_eq!(
            extract_address(body, IpVersion::V4),
            Some("203.0.113.77".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_trailing_period() {
        assert_eq!(
            extract_address("Your address is 203.0.113.5.", IpVersion::V4),
            Some("203.0.113.5".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_respects_family() {
        let body = "ipv4=203.0.113.5 ipv6=2001:db8::42";
        assert_eq!(
            extract_address(body, IpVersion::V6),
            Some("2001:db8::42".parse().unwrap())
        );
        assert_eq!(
            extract_address(body, IpVersion::V4),
            Some("203.0.113.5".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_glued_to_label_or_port() {
        let expected: IpAddr = "203.0.113.5".parse().unwrap();
        for body in [
            "Your IP:203.0.113.5",
            "Current IP Address:203.0.113.5",
            "203.0.113.5:443",
        ] {
            assert_eq!(extract_address(body, IpVersion::V4), Some(expected), "{}", body);
        }
    }

    #[test]
    fn test_extract_skips_unusable_candidates() {
        assert_eq!(
            extract_address("ip: 127.0.0.1 public: 203.0.113.5", IpVersion::V4),
            Some("203.0.113.5".parse().unwrap())
        );
        assert_eq!(
            extract_address("via ::1 from 2001:db8::7", IpVersion::V6),
            Some("2001:db8::7".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_v6_glued_to_label() {
        let expected: IpAddr = "2001:db8::1".parse().unwrap();
        for body in ["IPv6:2001:db8::1", "Address:2001:db8::1", "addr=2001:db8::1\n"] {
            assert_eq!(extract_address(body, IpVersion::V6), Some(expected), "{}", body);
        }
    }

    #[test]
    fn test_extract_ignores_digits_glued_to_words() {
        assert_eq!(extract_address("build1203.0.113.5", IpVersion::V4), None);
    }

    #[test]
    fn test_extract_nothing_usable() {
        assert_eq!(extract_address("rate limited, try later", IpVersion::V4), None);
        assert_eq!(extract_address("", IpVersion::V4), None);
        assert_eq!(extract_address("999.1.1.1", IpVersion::V4), None);
        assert_eq!(extract_address("127.0.0.1", IpVersion::V4), None);
        assert_eq!(extract_address("uptime 12:30:45", IpVersion::V6), None);
    }

    #[tokio::test]
    async fn test_fetch_from_mock_service() {
        let url = serve(Router::new().route("/", get(|| async { "203.0.113.5\n" }))).await;

        let source = HttpIpSource::new(url, IpVersion::V4, Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.current().await.unwrap(),
            "203.0.113.5".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let url = serve(Router::new().route(
            "/",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "203.0.113.5") }),
        ))
        .await;

        let source = HttpIpSource::new(url, IpVersion::V4, Duration::from_secs(5)).unwrap();
        let err = source.current().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let url = serve(Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "203.0.113.5"
            }),
        ))
        .await;

        let source = HttpIpSource::new(url, IpVersion::V4, Duration::from_millis(200)).unwrap();
        assert!(source.current().await.is_err());
    }

    #[tokio::test]
    async fn test_fallback_chain_skips_dead_and_garbled_services() {
        let dead = closed_port_url().await;
        let garbled =
            serve(Router::new().route("/", get(|| async { "<html>maintenance</html>" }))).await;
        let good = serve(Router::new().route(
            "/",
            get(|| async { "<body>Current IP Address: 198.51.100.9</body>" }),
        ))
        .await;

        let mut config = DdnsConfig::new(vec![AccountConfig::new("alice", "secret")]);
        config.ip_services = vec![
            IpServiceConfig::new(dead),
            IpServiceConfig::new(garbled),
            IpServiceConfig::new(good),
        ];

        let chain = fallback_from_config(&config).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.current().await.unwrap(),
            "198.51.100.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_fallback_rejects_bad_scheme() {
        let mut config = DdnsConfig::new(vec![AccountConfig::new("alice", "secret")]);
        config.ip_services = vec![IpServiceConfig::new("ftp://example.com/ip")];

        assert!(fallback_from_config(&config).is_err());
    }
}
