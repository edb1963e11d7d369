//! Configuration, read from environment variables at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::{ImapConfig, SmtpConfig};
use crate::departments::{DEFAULT_DEPARTMENTS_FILE, load_departments};
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::classifier::DEFAULT_DEPARTMENT_MISMATCH_PENALTY;
use crate::pipeline::forwarder::parse_mailboxes;
use crate::pipeline::geocoder::DEFAULT_GEOCODER_API_BASE;
use crate::pipeline::metrics::DEFAULT_METRICS_FILE;
use crate::pipeline::poller::{DEFAULT_METRICS_FLUSH_EVERY, ERROR_BACKOFF, PollerConfig};
use crate::pipeline::resolver::{DEFAULT_CONFIDENCE_THRESHOLD, RoutingConfig};
use crate::pipeline::types::{Department, MacroArea};

/// Geocoder settings. Absent when no API key is configured.
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub api_key: SecretString,
    pub api_base: String,
    pub timeout: Duration,
}

/// Everything the binary needs to wire the pipeline.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Mailbox account; also the SMTP user and the `From` of forwards.
    pub email: String,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub routing: RoutingConfig,
    pub llm: LlmConfig,
    pub department_mismatch_penalty: u8,
    pub geocoder: Option<GeocoderConfig>,
    pub poller: PollerConfig,
    pub departments_file: PathBuf,
    pub metrics_file: PathBuf,
    pub ocr_enabled: bool,
    pub log_dir: PathBuf,
}

impl TriageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let email = require("EMAIL")?;
        let password = SecretString::from(require("EMAIL_PASSWORD")?);

        let imap = ImapConfig {
            host: get("IMAP").unwrap_or_else(|| "imap.gmail.com".into()),
            port: parse_or("IMAP_PORT", get("IMAP_PORT"), 993)?,
            username: email.clone(),
            password: password.clone(),
            folder: "INBOX".into(),
        };
        let smtp = SmtpConfig {
            host: get("SMTP").unwrap_or_else(|| "smtp.gmail.com".into()),
            port: parse_or("SMTP_PORT", get("SMTP_PORT"), 465)?,
            username: email.clone(),
            password,
        };

        let use_test = parse_bool("USE_TEST_RECIPIENTS", get("USE_TEST_RECIPIENTS"), false)?;
        let suffix = if use_test { "_TEST" } else { "_PROD" };
        let mut recipients = HashMap::new();
        for area in MacroArea::ROUTABLE {
            let key = format!("RECIPIENTS_{}{suffix}", area.key().to_ascii_uppercase());
            if let Some(addresses) = get(&key) {
                recipients.insert(area, check_addresses(&key, addresses)?);
            }
        }

        let threshold = parse_percent("CONFIDENCE_THRESHOLD", get("CONFIDENCE_THRESHOLD"), DEFAULT_CONFIDENCE_THRESHOLD)?;
        let control_mailbox = match get("CONTROL_EMAIL") {
            Some(addresses) => check_addresses("CONTROL_EMAIL", addresses)?,
            None => check_addresses("EMAIL", email.clone())?,
        };
        let routing = RoutingConfig {
            threshold,
            control_mailbox,
            recipients,
        };

        let backend = match get("LLM_PROVIDER") {
            Some(name) => LlmBackend::from_str(&name)?,
            None => LlmBackend::Groq,
        };
        let api_key = get("LLM_API_KEY")
            .or_else(|| get("GROQ_API_KEY"))
            .or_else(|| (backend == LlmBackend::Ollama).then(|| "ollama".to_string()))
            .ok_or_else(|| ConfigError::MissingEnvVar("LLM_API_KEY".into()))?;
        let mut llm = LlmConfig::for_backend(backend, SecretString::from(api_key));
        if let Some(model) = get("LLM_MODEL") {
            llm.model = model;
        }
        if let Some(base) = get("LLM_API_BASE") {
            llm.api_base = base;
        }
        llm.timeout = Duration::from_secs(parse_or("LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"), 30)?);

        let department_mismatch_penalty = parse_percent(
            "DEPARTMENT_MISMATCH_PENALTY",
            get("DEPARTMENT_MISMATCH_PENALTY"),
            DEFAULT_DEPARTMENT_MISMATCH_PENALTY,
        )?;

        let geocoder = match get("AZURE_API_KEY") {
            Some(key) => Some(GeocoderConfig {
                api_key: SecretString::from(key),
                api_base: get("GEOCODER_API_BASE").unwrap_or_else(|| DEFAULT_GEOCODER_API_BASE.into()),
                timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT", get("REQUEST_TIMEOUT"), 10)?),
            }),
            None => None,
        };

        let poll_secs: u64 = parse_or("POLL_INTERVAL", get("POLL_INTERVAL"), 60)?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL".into(),
                message: "must be at least 1 second".into(),
            });
        }
        let poller = PollerConfig {
            interval: Duration::from_secs(poll_secs),
            error_backoff: ERROR_BACKOFF,
            flush_every: parse_or("METRICS_FLUSH_EVERY", get("METRICS_FLUSH_EVERY"), DEFAULT_METRICS_FLUSH_EVERY)?,
        };

        Ok(Self {
            email,
            imap,
            smtp,
            routing,
            llm,
            department_mismatch_penalty,
            geocoder,
            poller,
            departments_file: get("DEPARTMENTS_FILE")
                .unwrap_or_else(|| DEFAULT_DEPARTMENTS_FILE.into())
                .into(),
            metrics_file: get("METRICS_FILE")
                .unwrap_or_else(|| DEFAULT_METRICS_FILE.into())
                .into(),
            ocr_enabled: parse_bool("OCR_ENABLED", get("OCR_ENABLED"), true)?,
            log_dir: get("LOG_DIR").unwrap_or_else(|| "logs".into()).into(),
        })
    }

    /// Read the department list named by `departments_file`.
    pub fn departments(&self) -> crate::error::Result<Vec<Department>> {
        Ok(load_departments(&self.departments_file)?)
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{v}': {e}"),
        }),
        None => Ok(default),
    }
}

/// A 0..=100 value.
fn parse_percent(key: &str, value: Option<String>, default: u8) -> Result<u8, ConfigError> {
    let n: u8 = parse_or(key, value, default)?;
    if n > 100 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{n} is outside 0..=100"),
        });
    }
    Ok(n)
}

/// A comma-separated list of addresses, rejected at startup rather than on
/// the first forward.
fn check_addresses(key: &str, value: String) -> Result<String, ConfigError> {
    match parse_mailboxes(&value) {
        Ok(_) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{other}' is not a boolean"),
        }),
    }
}
