//! OpenAI-compatible chat completions.
//!
//! Calls `POST {url}/chat/completions` with a bearer token read from the
//! [`SecretStore`] on every request, so rotated keys take effect without a
//! restart. Structured requests use `response_format: json_schema`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{
    chat_messages, classify_status, finish, http_client, resolve_model, transport_error,
    LlmRequest, LlmResponse, LlmService, ResponseFormat, TokenUsage,
};
use crate::config::LlmConfig;
use crate::error::{ConfigurationError, LlmError};
use crate::secrets::SecretStore;

const DEFAULT_URL: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "openai";

pub struct OpenAiService {
    client: reqwest::Client,
    url: String,
    api_key_secret: String,
    models: Vec<String>,
    secrets: Arc<dyn SecretStore>,
}

impl OpenAiService {
    pub fn new(config: &LlmConfig, secrets: Arc<dyn SecretStore>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key_secret: config.api_key_secret.clone(),
            models: config.models.clone(),
            secrets,
        })
    }
}

/// Request body for `/chat/completions`.
fn request_body(request: &LlmRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": chat_messages(request),
    });
    match (request.response_format(), request.response_schema()) {
        (ResponseFormat::JsonSchema, Some(schema)) => {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema },
            });
        }
        (ResponseFormat::JsonObject, _) => {
            body["response_format"] = json!({ "type": "json_object" });
        }
        _ => {}
    }
    body
}

/// Extract the first choice's content and the token usage.
fn parse_response(json: &Value) -> Result<(String, TokenUsage), LlmError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::Provider {
            provider: PROVIDER.to_string(),
            message: "response has no choices[0].message.content".to_string(),
        })?;

    let usage = json.get("usage");
    let count = |field: &str| {
        usage
            .and_then(|u| u.get(field))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    Ok((
        content.to_string(),
        TokenUsage {
            prompt_tokens: count("prompt_tokens"),
            completion_tokens: count("completion_tokens"),
        },
    ))
}

#[async_trait]
impl LlmService for OpenAiService {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn known_models(&self) -> &[String] {
        &self.models
    }

    async fn complete_chat(
        &self,
        request: &LlmRequest,
        override_model: Option<&str>,
    ) -> Result<LlmResponse, LlmError> {
        let model = resolve_model(&self.models, request, override_model)?;
        let api_key = self.secrets.fetch_secret(&self.api_key_secret).await?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .bearer_auth(api_key.expose())
            .json(&request_body(request, model))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER, status.as_u16(), &body));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;
        let (content, usage) = parse_response(&json)?;

        tracing::debug!(
            model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "OpenAI chat completion finished"
        );

        finish(request, content, model, usage)
    }
}
