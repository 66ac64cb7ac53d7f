//! Local Ollama chat.
//!
//! Calls `POST {url}/api/chat` (default `http://localhost:11434`) with
//! `stream: false`. No API key is involved. Structured requests pass the
//! response schema as `format`; `json_object` maps to `format: "json"`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    chat_messages, classify_status, finish, http_client, resolve_model, transport_error,
    LlmRequest, LlmResponse, LlmService, ResponseFormat, TokenUsage,
};
use crate::config::LlmConfig;
use crate::error::{ConfigurationError, LlmError};

const DEFAULT_URL: &str = "http://localhost:11434";
const PROVIDER: &str = "ollama";

pub struct OllamaService {
    client: reqwest::Client,
    url: String,
    models: Vec<String>,
}

impl OllamaService {
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            models: config.models.clone(),
        })
    }
}

fn request_body(request: &LlmRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": chat_messages(request),
        "stream": false,
    });
    match (request.response_format(), request.response_schema()) {
        (ResponseFormat::JsonSchema, Some(schema)) => body["format"] = schema.clone(),
        (ResponseFormat::JsonObject, _) => body["format"] = json!("json"),
        _ => {}
    }
    body
}

fn parse_response(json: &Value) -> Result<(String, TokenUsage), LlmError> {
    let content = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::Provider {
            provider: PROVIDER.to_string(),
            message: "response has no message.content".to_string(),
        })?;

    let count = |field: &str| json.get(field).and_then(Value::as_u64).unwrap_or(0);
    Ok((
        content.to_string(),
        TokenUsage {
            prompt_tokens: count("prompt_eval_count"),
            completion_tokens: count("eval_count"),
        },
    ))
}

#[async_trait]
impl LlmService for OllamaService {
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

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
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
        finish(request, content, model, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{validate, RawLlmRequest, RawPrompt};

    #[test]
    fn test_structured_body_passes_schema_as_format() {
        let raw = RawLlmRequest {
            prompts: vec![RawPrompt::user("Outline.")],
            target_ai_service_model: Some("llama3".into()),
            output_data_type: Some("structured".into()),
            response_schema: Some(json!({ "type": "object" })),
            ..Default::default()
        };
        let req = validate(&raw, &["llama3".to_string()]).unwrap();
        let body = request_body(&req, "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], json!({ "type": "object" }));
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_parse_response() {
        let json = json!({
            "model": "llama3",
            "message": { "role": "assistant", "content": "hello" },
            "done": true,
            "prompt_eval_count": 20,
            "eval_count": 3
        });
        let (content, usage) = parse_response(&json).unwrap();
        assert_eq!(content, "hello");
        assert_eq!(usage.prompt_tokens, 20);
        assert_eq!(usage.completion_tokens, 3);
    }

    #[test]
    fn test_default_url() {
        let svc = OllamaService::new(&LlmConfig::default()).unwrap();
        assert_eq!(svc.url, "http://localhost:11434");
    }
}
