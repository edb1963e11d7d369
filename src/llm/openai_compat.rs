//! OpenAI-compatible chat-completions client over reqwest.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::ClassifierError;
use crate::llm::{ChatCompletion, LlmBackend, LlmConfig};

/// Classification must be reproducible.
const TEMPERATURE: f32 = 0.0;

pub struct ChatCompletionsClient {
    client: Client,
    backend: LlmBackend,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifierError::Unavailable {
                provider: config.backend.name().to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            backend: config.backend,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(&self, system: &str, user: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": TEMPERATURE,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        if self.backend.supports_json_mode() {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }

    fn unavailable(&self, reason: impl Into<String>) -> ClassifierError {
        ClassifierError::Unavailable {
            provider: self.backend.name().to_string(),
            reason: reason.into(),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> ClassifierError {
        ClassifierError::InvalidResponse {
            provider: self.backend.name().to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatCompletion for ChatCompletionsClient {
    fn provider(&self) -> &str {
        self.backend.name()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifierError> {
        let body = self.build_request(system, user);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.unavailable("request timed out")
                } else {
                    self.unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            // Auth failure bodies can echo key fragments.
            let message = if status.as_u16() == 401 || status.as_u16() == 403 {
                format!("authentication failed (HTTP {})", status.as_u16())
            } else {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("<body read error: {e}>"));
                format!("HTTP {}: {}", status.as_u16(), text.chars().take(200).collect::<String>())
            };
            return Err(self.unavailable(message));
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.unavailable(format!("failed to read body: {e}")))?;
        debug!(provider = self.provider(), bytes = text.len(), "Chat completion received");

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| self.invalid(format!("malformed completion envelope: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| self.invalid("missing choices[0].message.content"))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
