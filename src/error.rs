//! Error types for mail-triage.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Geocode error: {0}")]
    Geocode(#[from] GeocodeError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// IMAP mailbox errors. These are loop-level: the poller logs them and
/// retries after a backoff.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("IMAP login failed for {username}")]
    AuthFailed { username: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IMAP connection closed by server")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mailbox task failed: {0}")]
    Task(String),
}

/// Failure to turn one MIME part into text. Never fatal for a message.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("PDF parse failed: {0}")]
    Pdf(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("OCR timed out after {0:?}")]
    OcrTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifier endpoint errors. Both variants route the message to the
/// review mailbox.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ClassifierError {
    /// Marker written into the forwarded body when classification fails.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "Classifier unavailable",
            Self::InvalidResponse { .. } => "Invalid JSON response",
        }
    }
}

/// Geocoder lookup errors. Converted into `GeocodeResult::Unresolved`
/// before leaving the geocoder.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Geocoder request failed: {0}")]
    RequestFailed(String),

    #[error("Geocoder returned status {0}")]
    Status(u16),

    #[error("Geocoder returned no match")]
    NoMatch,
}

/// SMTP delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Primary send failed; the error report reached the control mailbox.
    #[error("Delivery to {destination} failed (reported to control mailbox): {reason}")]
    Reported { destination: String, reason: String },

    /// Primary send and error report both failed.
    #[error("Delivery to {destination} failed ({primary}); error report also failed ({report})")]
    Critical {
        destination: String,
        primary: String,
        report: String,
    },
}

/// A single SMTP submission failure, before any fallback is attempted.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Send task failed: {0}")]
    Task(String),
}

/// Metrics snapshot persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
