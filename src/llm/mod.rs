//! LLM services.
//!
//! [`LlmService`] sends a validated [`LlmRequest`] to a chat provider and
//! returns either plain text or a structured value that has already been
//! checked against the request's response schema. Malformed structured
//! output never reaches the caller as a value; it surfaces as
//! [`LlmError::SchemaValidation`] carrying the raw text and the violation
//! path.
//!
//! | Provider | Endpoint | Structured output |
//! |----------|----------|-------------------|
//! | `openai` | `POST {url}/chat/completions` | `response_format: json_schema` |
//! | `ollama` | `POST {url}/api/chat` | `format: <schema>` |
//!
//! HTTP failures are classified the same way for both providers:
//! 401/403/429/5xx and transport errors are [`LlmError::Provider`]
//! (retryable); any other 4xx is [`LlmError::Rejected`].

pub mod ollama;
pub mod openai;
pub mod request;
pub mod schema;

pub use ollama::OllamaService;
pub use openai::OpenAiService;
pub use request::{
    parse_envelope, parse_request, validate, LlmRequest, OutputType, Prompt, PromptRole,
    RawLlmRequest, RawPrompt, ResponseFormat,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{ConfigurationError, LlmError};
use crate::secrets::SecretStore;

#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutput {
    Text(String),
    /// Parsed and validated against the request's response schema.
    Structured(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub output: LlmOutput,
    /// Model that produced the answer.
    pub model: String,
    pub usage: TokenUsage,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmService: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Model catalog used by request validation.
    fn known_models(&self) -> &[String];

    /// Run one chat completion. `override_model`, when given, replaces the
    /// request's target model and must also be in the catalog.
    async fn complete_chat(
        &self,
        request: &LlmRequest,
        override_model: Option<&str>,
    ) -> Result<LlmResponse, LlmError>;
}

/// Build the configured [`LlmService`].
pub fn create_llm_service(
    config: &LlmConfig,
    secrets: Arc<dyn SecretStore>,
) -> Result<Arc<dyn LlmService>, ConfigurationError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiService::new(config, secrets)?)),
        "ollama" => Ok(Arc::new(OllamaService::new(config)?)),
        other => Err(ConfigurationError::Invalid(format!(
            "unknown llm.provider '{}' (expected openai or ollama)",
            other
        ))),
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ConfigurationError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConfigurationError::Invalid(format!("failed to build HTTP client: {}", e)))
}

/// The model to call: the override if given, else the request's target.
pub(crate) fn resolve_model<'a>(
    known: &[String],
    request: &'a LlmRequest,
    override_model: Option<&'a str>,
) -> Result<&'a str, LlmError> {
    let model = override_model.unwrap_or(request.model());
    if known.iter().any(|m| m == model) {
        Ok(model)
    } else {
        Err(LlmError::UnknownModel(model.to_string()))
    }
}

/// Chat messages in provider wire form: system role first, then prompts in order.
pub(crate) fn chat_messages(request: &LlmRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(request.prompts().len() + 1);
    if let Some(system) = request.system_role() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for prompt in request.prompts() {
        messages.push(json!({ "role": prompt.role.as_str(), "content": prompt.text }));
    }
    messages
}

/// Map a non-success HTTP status to an error.
pub(crate) fn classify_status(provider: &str, status: u16, body: &str) -> LlmError {
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, truncate(body, 500))
    };
    match status {
        401 | 403 | 429 | 500..=599 => LlmError::Provider {
            provider: provider.to_string(),
            message,
        },
        _ => LlmError::Rejected {
            provider: provider.to_string(),
            status,
            message: truncate(body, 500).to_string(),
        },
    }
}

pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> LlmError {
    LlmError::Provider {
        provider: provider.to_string(),
        message: e.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Strip a surrounding Markdown code fence, if the model added one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an info string such as `json` on the opening line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Turn the provider's raw text into a response, parsing and validating it
/// when structured output was requested.
pub(crate) fn finish(
    request: &LlmRequest,
    raw: String,
    model: &str,
    usage: TokenUsage,
) -> Result<LlmResponse, LlmError> {
    let output = match (request.output(), request.response_schema()) {
        (OutputType::Structured, Some(response_schema)) => {
            let value: Value = serde_json::from_str(strip_code_fence(&raw)).map_err(|e| {
                LlmError::SchemaValidation {
                    raw_output: raw.clone(),
                    path: "$".to_string(),
                    message: format!("output is not valid JSON: {}", e),
                }
            })?;
            if let Err(v) = schema::validate(&value, response_schema) {
                return Err(LlmError::SchemaValidation {
                    raw_output: raw,
                    path: v.path,
                    message: v.message,
                });
            }
            LlmOutput::Structured(value)
        }
        _ => LlmOutput::Text(raw),
    };

    Ok(LlmResponse {
        output,
        model: model.to_string(),
        usage,
    })
}
