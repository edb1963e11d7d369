//! SMTP submission via lettre over implicit TLS.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::MailTransport;
use crate::error::SendError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// `MailTransport` backed by an authenticated SMTP relay.
pub struct SmtpMailTransport {
    transport: SmtpTransport,
    host: String,
}

impl SmtpMailTransport {
    /// Build the relay once. `relay()` means TLS from the first byte, which
    /// is what port 465 expects.
    pub fn new(config: &SmtpConfig) -> Result<Self, SendError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| SendError::Smtp(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self {
            transport,
            host: config.host.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: Message) -> Result<(), SendError> {
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| SendError::Task(e.to_string()))?
            .map_err(|e| SendError::Smtp(format!("SMTP send via {} failed: {e}", self.host)))?;
        Ok(())
    }
}
