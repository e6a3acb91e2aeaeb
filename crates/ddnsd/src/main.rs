// # ddnsd - DDNS Update Daemon
//
// This is a THIN integration layer. All reconciliation logic lives in
// ddns-core; the daemon only:
//
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Wires the IP resolver, provider, state store and notifier together
// 4. Schedules cycles (interval, cron expression, or one-shot under a lock file)
//
// ## Configuration
//
// ### Accounts & endpoint
// - `DDNS_ACCOUNTS`: JSON array of `{username, password, domains}` (required)
// - `DDNS_SERVER`, `DDNS_PORT`, `DDNS_PROTOCOL` (http, https), `DDNS_PATH`
// - `DDNS_QUERY_TEMPLATE`: e.g. `hostname={domains}&myip={ip}`
// - `DDNS_AUTH`: `basic`, `query_md5` or `query_sha256`
//
// ### IP resolution
// - `DDNS_IP_SERVICES`: Comma-separated URLs, tried in order
// - `DDNS_IP_VERSION`: `v4` or `v6`
//
// ### State Store
// - `DDNS_STATE_STORE_TYPE`: Type of state store (file, memory)
// - `DDNS_STATE_STORE_PATH`: Path to state file (for file store)
// - `DDNS_PERSIST_POLICY`: `all_succeeded` or `any_succeeded`
//
// ### Engine
// - `DDNS_MAX_RETRIES`, `DDNS_RETRY_DELAY_SECS`
// - `DDNS_REQUEST_TIMEOUT_SECS`, `DDNS_RESOLVE_TIMEOUT_SECS`
// - `DDNS_MAX_CONCURRENT_UPDATES`
//
// ### Notifications
// - `DDNS_SMTP_SERVER`: Enables email summaries (otherwise they are only logged)
// - `DDNS_SMTP_PORT`: 465 for implicit TLS (default), anything else uses STARTTLS
// - `DDNS_SMTP_USE_TLS`: `false` disables STARTTLS on non-465 ports
// - `DDNS_SMTP_USERNAME`, `DDNS_SMTP_PASSWORD`
// - `DDNS_SMTP_SENDER`, `DDNS_SMTP_RECEIVER` (comma-separated)
// - `DDNS_SMTP_TIMEOUT_SECS`: Delivery timeout (default 30)
//
// ### Scheduling
// - `DDNS_INTERVAL_SECS`: Seconds between cycles (default 300)
// - `DDNS_SCHEDULE`: Cron expression instead of an interval (e.g. `*/5 * * * *`)
// - `DDNS_RUN_ONCE`: Run one cycle and exit (for cron)
// - `DDNS_LOCK_PATH`: Lock file for one-shot runs
// - `DDNS_HEALTH_FILE`: Liveness marker (`off` disables it)
// - `DDNS_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export DDNS_ACCOUNTS='[{"username":"me","password":"secret","domains":["home.example.com"]}]'
// export DDNS_STATE_STORE_PATH=/var/lib/ddns-update/state.json
//
// ddnsd
// ```

mod config;
mod lock;
mod schedule;
mod smtp;

use anyhow::Result;
use ddns_core::{CycleStatus, DdnsEngine, EngineEvent, LogNotifier, Notifier};
use ddns_ip_http::fallback_from_config;
use ddns_provider_dyndns::DynDnsProvider;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::config::Config;
use crate::lock::{RunLock, write_health_marker};
use crate::smtp::SmtpNotifier;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown, or a one-shot cycle that left every account current
/// - 1: Configuration or startup error (including a held run lock)
/// - 2: Runtime error, or a one-shot cycle that did not fully succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error or failed cycle
    RuntimeError = 2,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl DdnsExitCode {
    fn for_cycle(status: CycleStatus) -> Self {
        if status.is_healthy() {
            DdnsExitCode::CleanShutdown
        } else {
            DdnsExitCode::RuntimeError
        }
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DdnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    info!("Starting ddnsd daemon");
    info!(
        "Configuration loaded: {} account(s), endpoint {}",
        config.ddns.accounts.len(),
        config.ddns.endpoint.base_url()
    );
    for skipped in &config.skipped_accounts {
        warn!("Skipping unreadable account: {}", skipped);
    }

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        // Taken before the state store is opened so overlapping runs never
        // read state concurrently
        let _lock = if config.run_once {
            match RunLock::acquire(&config.lock_path) {
                Ok(Some(lock)) => Some(lock),
                Ok(None) => {
                    warn!(
                        "Another run holds {}, refusing to start",
                        config.lock_path.display()
                    );
                    return DdnsExitCode::ConfigError;
                }
                Err(e) => {
                    error!("Startup error: {:#}", e);
                    return DdnsExitCode::ConfigError;
                }
            }
        } else {
            None
        };

        let engine = match build_engine(&config).await {
            Ok(engine) => engine,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return DdnsExitCode::ConfigError;
            }
        };

        let outcome = if config.run_once {
            run_once(&config, &engine).await
        } else {
            run_daemon(&config, &engine).await
        };

        match outcome {
            Ok(code) => code,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DdnsExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Create every component from configuration
async fn build_engine(config: &Config) -> Result<DdnsEngine> {
    let ddns = &config.ddns;

    let ip_source = fallback_from_config(ddns)?;
    let provider = DynDnsProvider::new(ddns.endpoint.clone(), ddns.engine.request_timeout())?;
    let state_store = ddns_core::state::from_config(&ddns.state_store).await?;

    let notifier: Box<dyn Notifier> = match &config.smtp {
        Some(smtp) => {
            info!(
                "Email summaries via {}:{} ({:?})",
                smtp.server,
                smtp.port,
                smtp.security()
            );
            Box::new(SmtpNotifier::new(smtp)?)
        }
        None => {
            info!("No SMTP configured, cycle summaries are logged only");
            Box::new(LogNotifier::new())
        }
    };

    let (engine, event_rx) = DdnsEngine::new(
        Box::new(ip_source),
        Box::new(provider),
        state_store,
        notifier,
        ddns.clone(),
    )?;

    tokio::spawn(log_events(event_rx));

    Ok(engine)
}

/// Forward engine events to the debug log
async fn log_events(event_rx: mpsc::Receiver<EngineEvent>) {
    let mut events = ReceiverStream::new(event_rx);
    while let Some(event) = events.next().await {
        debug!("Engine event: {:?}", event);
    }
}

/// Run a single cycle; the caller holds the run lock
async fn run_once(config: &Config, engine: &DdnsEngine) -> Result<DdnsExitCode> {
    let outcome = engine.run_cycle().await;
    write_health_marker(config.health_file.as_deref()).await;

    Ok(DdnsExitCode::for_cycle(outcome.status))
}

/// Run a cycle now and then once per scheduled tick until a shutdown signal
async fn run_daemon(config: &Config, engine: &DdnsEngine) -> Result<DdnsExitCode> {
    if config.schedule_is_aggressive() {
        warn!(
            "Schedule {} is very frequent; providers may flag the account for abuse",
            config.schedule
        );
    }

    write_health_marker(config.health_file.as_deref()).await;

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut ticker = config.schedule.ticker();

    info!("Scheduling cycles {}", config.schedule);

    loop {
        tokio::select! {
            received = &mut shutdown => {
                let name = received?;
                info!("Received shutdown signal: {}", name);
                info!("Shutting down daemon");
                return Ok(DdnsExitCode::CleanShutdown);
            }
            due = ticker.tick() => {
                if !due {
                    warn!("Schedule {} has no further occurrences", config.schedule);
                    return Ok(DdnsExitCode::CleanShutdown);
                }
                let outcome = engine.run_cycle().await;
                debug!(
                    "Cycle {} ({} account result(s))",
                    outcome.status,
                    outcome.results.len()
                );
                write_health_marker(config.health_file.as_deref()).await;
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    Ok(name)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
