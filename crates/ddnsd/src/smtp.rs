// Email notifications
//
// Cycle summaries are always logged; when SMTP is configured they are also
// mailed to the operator. Port 465 uses implicit TLS, any other port uses
// STARTTLS unless it is switched off. "No change" cycles are logged only, so
// a five-minute schedule does not flood the inbox.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ddns_core::{CycleStatus, Error, LogNotifier, Notification, Notifier};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use std::time::Duration;

/// SMTP submission port with TLS from the first byte
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    ImplicitTls,
    StartTls,
    Plain,
}

/// SMTP delivery settings
#[derive(Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    /// ⚠️ NEVER log this value
    pub password: String,
    pub sender: String,
    pub receivers: Vec<String>,
    /// Upgrade with STARTTLS on ports other than 465
    pub starttls: bool,
    pub timeout: Duration,
}

// Custom Debug implementation that hides the password
impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("sender", &self.sender)
            .field("receivers", &self.receivers)
            .field("security", &self.security())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SmtpConfig {
    pub fn security(&self) -> SmtpSecurity {
        if self.port == IMPLICIT_TLS_PORT {
            SmtpSecurity::ImplicitTls
        } else if self.starttls {
            SmtpSecurity::StartTls
        } else {
            SmtpSecurity::Plain
        }
    }
}

/// Notifier that logs every summary and mails the interesting ones
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    timeout: Duration,
    log: LogNotifier,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config
            .sender
            .parse()
            .with_context(|| format!("DDNS_SMTP_SENDER '{}' is not a valid address", config.sender))?;

        let to = config
            .receivers
            .iter()
            .map(|receiver| {
                receiver
                    .parse::<Mailbox>()
                    .with_context(|| format!("DDNS_SMTP_RECEIVER '{}' is not a valid address", receiver))
            })
            .collect::<Result<Vec<_>>>()?;

        if to.is_empty() {
            anyhow::bail!("DDNS_SMTP_RECEIVER must name at least one address");
        }

        let builder = match config.security() {
            SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)
                .with_context(|| format!("Failed to set up TLS for {}", config.server))?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
                    .with_context(|| format!("Failed to set up STARTTLS for {}", config.server))?
            }
            SmtpSecurity::Plain => {
                tracing::warn!("SMTP to {} is unencrypted", config.server);
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
            }
        };

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout))
            .build();

        Ok(Self {
            transport,
            from,
            to,
            timeout: config.timeout,
            log: LogNotifier::new(),
        })
    }

    fn message(&self, notification: &Notification) -> Result<Message, Error> {
        let builder = self
            .to
            .iter()
            .cloned()
            .fold(Message::builder().from(self.from.clone()), |builder, to| builder.to(to));

        builder
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| Error::notify(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), Error> {
        self.log.notify(notification).await?;

        if notification.status == CycleStatus::NoChange {
            return Ok(());
        }

        let message = self.message(notification)?;

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(Ok(_)) => {
                tracing::info!("Notification email sent to {} recipient(s)", self.to.len());
                Ok(())
            }
            Ok(Err(e)) => Err(Error::notify(format!("SMTP delivery failed: {}", e))),
            Err(_) => Err(Error::notify(format!(
                "SMTP delivery timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
