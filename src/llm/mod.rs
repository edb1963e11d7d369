//! LLM integration for mail-triage.
//!
//! Every supported backend speaks the OpenAI chat-completions dialect, so a
//! single HTTP client is configured per provider profile:
//! - **Groq**: hosted, JSON mode supported (default)
//! - **Ollama**: local server, no JSON mode flag
//! - **OpenAI**: hosted, JSON mode supported

pub mod openai_compat;

pub use openai_compat::ChatCompletionsClient;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{ClassifierError, ConfigError};

/// Default request timeout for a classification call.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Groq,
    Ollama,
    OpenAi,
}

impl LlmBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.1-8b-instant",
            Self::Ollama => "llama3.1",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    /// Whether the endpoint accepts `response_format: {"type": "json_object"}`.
    pub fn supports_json_mode(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".into(),
                message: format!("unknown provider '{other}' (expected groq, ollama or openai)"),
            }),
        }
    }
}

/// Configuration for creating a chat-completions client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Provider defaults for everything but the key.
    pub fn for_backend(backend: LlmBackend, api_key: SecretString) -> Self {
        Self {
            backend,
            api_key,
            model: backend.default_model().to_string(),
            api_base: backend.default_api_base().to_string(),
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }
}

/// One system+user exchange with a chat model, returning the raw reply text.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    fn provider(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifierError>;
}

/// Create a chat-completions provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn ChatCompletion>, ClassifierError> {
    let client = ChatCompletionsClient::new(config)?;
    tracing::info!(
        "Using {} (model: {}, base: {})",
        config.backend.name(),
        config.model,
        config.api_base
    );
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_str_is_case_insensitive() {
        assert_eq!("Groq".parse::<LlmBackend>().unwrap(), LlmBackend::Groq);
        assert_eq!(" ollama ".parse::<LlmBackend>().unwrap(), LlmBackend::Ollama);
        assert_eq!("OPENAI".parse::<LlmBackend>().unwrap(), LlmBackend::OpenAi);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = "anthropic".parse::<LlmBackend>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "LLM_PROVIDER"));
    }

    #[test]
    fn ollama_has_no_json_mode() {
        assert!(LlmBackend::Groq.supports_json_mode());
        assert!(LlmBackend::OpenAi.supports_json_mode());
        assert!(!LlmBackend::Ollama.supports_json_mode());
    }

    #[test]
    fn create_provider_uses_backend_defaults() {
        let config = LlmConfig::for_backend(LlmBackend::Groq, SecretString::from("gsk-test"));
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.provider(), "groq");
        assert_eq!(provider.model_name(), "llama-3.1-8b-instant");
    }

    #[test]
    fn create_provider_honours_model_override() {
        let mut config = LlmConfig::for_backend(LlmBackend::Ollama, SecretString::from("ollama"));
        config.model = "mistral".into();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "mistral");
    }
}
