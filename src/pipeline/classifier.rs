//! Classifier — asks a chat model to read a support email and validates the
//! JSON it returns.
//!
//! Flow:
//! 1. Build a deterministic system/user prompt pair
//! 2. One chat-completions call
//! 3. Strict validation: all keys present, confidence a number in 0..=100
//! 4. Department post-check against the candidate list

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ClassifierError;
use crate::extract::ExtractedContent;
use crate::llm::{ChatCompletion, LlmConfig, create_provider};
use crate::pipeline::types::{ClassificationResult, Department};

/// Characters of email content shown to the model. The tail is dropped.
pub const MAX_CONTENT_CHARS: usize = 3000;

/// Confidence removed when the suggested department is not a candidate.
pub const DEFAULT_DEPARTMENT_MISMATCH_PENALTY: u8 = 30;

/// Turns extracted content into a validated classification.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        content: &ExtractedContent,
        departments: &[Department],
    ) -> Result<ClassificationResult, ClassifierError>;
}

/// `Classifier` backed by any chat-completions provider.
pub struct ChatCompletionsClassifier {
    chat: Arc<dyn ChatCompletion>,
    mismatch_penalty: u8,
}

impl ChatCompletionsClassifier {
    pub fn new(chat: Arc<dyn ChatCompletion>, mismatch_penalty: u8) -> Self {
        Self {
            chat,
            mismatch_penalty,
        }
    }
}

#[async_trait]
impl Classifier for ChatCompletionsClassifier {
    async fn classify(
        &self,
        content: &ExtractedContent,
        departments: &[Department],
    ) -> Result<ClassificationResult, ClassifierError> {
        let run_id = Uuid::new_v4();
        let system_prompt = build_system_prompt();
        let user_prompt = build_user_prompt(content, departments);

        let raw = self
            .chat
            .complete(&system_prompt, &user_prompt)
            .await
            .inspect_err(|e| warn!(%run_id, provider = self.chat.provider(), error = %e, "Classifier call failed"))?;

        let result = parse_classification(&raw, departments, self.mismatch_penalty).map_err(|reason| {
            warn!(%run_id, raw_response = %raw, error = %reason, "Rejected classifier response");
            ClassifierError::InvalidResponse {
                provider: self.chat.provider().to_string(),
                reason,
            }
        })?;

        info!(
            %run_id,
            model = self.chat.model_name(),
            confidence = result.confidence,
            department = result.department.as_deref().unwrap_or("-"),
            "Classified message"
        );
        Ok(result)
    }
}

/// Build the configured provider and wrap it in a classifier.
pub fn create_classifier(
    config: &LlmConfig,
    mismatch_penalty: u8,
) -> Result<Arc<dyn Classifier>, ClassifierError> {
    let chat = create_provider(config)?;
    Ok(Arc::new(ChatCompletionsClassifier::new(chat, mismatch_penalty)))
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the classifier system prompt.
pub fn build_system_prompt() -> String {
    "You analyze technical support emails for an Italian field-service company.\n\n\
     Tasks:\n\
     1. Find the address where the intervention is needed. Always end it with \", Italy\".\n\
     2. Summarize the problem in one sentence.\n\
     3. Identify the equipment involved.\n\
     4. Pick the department from the provided list that should handle the request.\n\
     5. Rate your confidence in the extracted data from 0 to 100.\n\n\
     Rules:\n\
     - Write \"not found\" for any value you cannot find. Never invent data.\n\
     - Requests from police or judicial authorities for video footage: set equipment to \"videosorveglianza\".\n\
     - The email body comes before the attachment text. When they disagree, trust the email body.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"summary\": \"...\", \"equipment\": \"...\", \"address\": \"...\", \"department\": \"...\", \"confidence\": 0}"
        .to_string()
}

/// Build the user prompt: candidate departments, then the content window.
pub fn build_user_prompt(content: &ExtractedContent, departments: &[Department]) -> String {
    let mut prompt = String::with_capacity(MAX_CONTENT_CHARS + 512);

    prompt.push_str("Departments:\n");
    if departments.is_empty() {
        prompt.push_str("(none configured)\n");
    }
    for dept in departments {
        let description = match dept.description.trim() {
            "" => "No description",
            d => d,
        };
        prompt.push_str(&format!("- {}: {description}\n", dept.name));
    }

    let window: String = content.combined().chars().take(MAX_CONTENT_CHARS).collect();
    prompt.push_str(&format!("\nEmail:\n{window}"));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Validate the raw model reply and apply the department check.
pub fn parse_classification(
    raw: &str,
    candidates: &[Department],
    mismatch_penalty: u8,
) -> Result<ClassificationResult, String> {
    let json_str = extract_json_object(raw);
    let value: serde_json::Value =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let text_field = |keys: &[&str]| -> Result<String, String> {
        let value = keys
            .iter()
            .find_map(|k| obj.get(*k))
            .ok_or_else(|| format!("missing required key '{}'", keys[0]))?;
        value
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| format!("key '{}' is not a string", keys[0]))
    };

    let summary = text_field(&["summary", "problem"])?;
    let equipment = text_field(&["equipment"])?;
    let address = text_field(&["address"])?;

    let confidence = obj
        .get("confidence")
        .ok_or_else(|| "missing required key 'confidence'".to_string())?
        .as_f64()
        .ok_or_else(|| "confidence is not a number".to_string())?;
    if !(0.0..=100.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside 0..=100"));
    }
    let mut confidence = confidence.round() as u8;

    let suggested = obj
        .get("department")
        .or_else(|| obj.get("reparto_suggerito"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    // Only a suggestion that names no candidate is penalized; no suggestion
    // leaves the department unset.
    let department = match (suggested, candidates.first()) {
        (None, _) => None,
        (Some(name), None) => Some(name.to_string()),
        (Some(name), Some(first)) => match candidates.iter().find(|d| d.name.eq_ignore_ascii_case(name)) {
            Some(dept) => Some(dept.name.clone()),
            None => {
                confidence = confidence.saturating_sub(mismatch_penalty);
                Some(first.name.clone())
            }
        },
    };

    Ok(ClassificationResult {
        summary,
        equipment,
        address,
        confidence,
        department,
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
