//! Provider-neutral LLM request contract.
//!
//! Requests arrive in the wire shape below (camelCase JSON) and are turned
//! into a [`LlmRequest`] by [`validate`]. A [`LlmRequest`] can only be
//! obtained through validation, so every service receives a request that
//! already satisfies the rules.
//!
//! ```json
//! {
//!   "llmRequest": {
//!     "prompts": [{ "promptText": "…", "promptRole": "user" }],
//!     "targetAiServiceModel": "gpt-4o-mini",
//!     "outputDataType": "structured",
//!     "systemRole": "…",
//!     "responseSchema": { "type": "object", … },
//!     "responseFormat": "json_schema"
//!   }
//! }
//! ```
//!
//! Validation reports every violated rule at once rather than stopping at
//! the first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::schema;
use crate::error::ValidationError;

/// Stands in for a blank model reply in a corrective turn.
const EMPTY_REPLY: &str = "(empty reply)";

/// An unvalidated request exactly as received.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLlmRequest {
    #[serde(default)]
    pub prompts: Vec<RawPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ai_service_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrompt {
    #[serde(default)]
    pub prompt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_role: Option<String>,
}

impl RawPrompt {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            prompt_text: Some(text.into()),
            prompt_role: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(PromptRole::System),
            "user" => Some(PromptRole::User),
            "assistant" => Some(PromptRole::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub role: PromptRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Text,
    Structured,
}

/// How the provider is asked to shape its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema,
}

impl ResponseFormat {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ResponseFormat::Text),
            "json_object" => Some(ResponseFormat::JsonObject),
            "json_schema" => Some(ResponseFormat::JsonSchema),
            _ => None,
        }
    }
}

/// A request that has passed [`validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    prompts: Vec<Prompt>,
    model: String,
    output: OutputType,
    system_role: Option<String>,
    response_schema: Option<Value>,
    response_format: ResponseFormat,
}

impl LlmRequest {
    /// Prompts in the order they were supplied.
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn output(&self) -> OutputType {
        self.output
    }

    pub fn system_role(&self) -> Option<&str> {
        self.system_role.as_deref()
    }

    /// Present whenever `output()` is [`OutputType::Structured`].
    pub fn response_schema(&self) -> Option<&Value> {
        self.response_schema.as_ref()
    }

    pub fn response_format(&self) -> ResponseFormat {
        self.response_format
    }

    /// Follow-up request that shows the model its previous answer and the
    /// schema violation, asking for a conforming reply.
    pub fn with_corrective_prompt(&self, raw_output: &str, path: &str, message: &str) -> Self {
        let mut next = self.clone();
        let reply = if raw_output.trim().is_empty() {
            EMPTY_REPLY
        } else {
            raw_output
        };
        next.prompts.push(Prompt {
            text: reply.to_string(),
            role: PromptRole::Assistant,
        });
        next.prompts.push(Prompt {
            text: format!(
                "Your previous reply did not match the required JSON schema at {}: {}. \
                 Reply again with only a JSON value that conforms to the schema.",
                path, message
            ),
            role: PromptRole::User,
        });
        next
    }
}

/// Parse a wire envelope (`{"llmRequest": {…}}`).
///
/// Every wrong-typed field is reported, not just the first.
pub fn parse_envelope(json: &str) -> Result<RawLlmRequest, ValidationError> {
    let (raw, shape) = read_envelope(json)?;
    if shape.is_empty() {
        Ok(raw)
    } else {
        Err(ValidationError::new(
            shape.into_iter().map(|v| v.message).collect(),
        ))
    }
}

/// Parse and validate a wire envelope in one pass.
///
/// Type violations and rule violations are reported together. A field
/// with the wrong type is reported once, as a type violation.
pub fn parse_request(json: &str, known_models: &[String]) -> Result<LlmRequest, ValidationError> {
    let (raw, shape) = read_envelope(json)?;
    let rules = match validate(&raw, known_models) {
        Ok(request) if shape.is_empty() => return Ok(request),
        Ok(_) => Vec::new(),
        Err(e) => e.violations,
    };

    let rules: Vec<String> = rules
        .into_iter()
        .filter(|v| !shape.iter().any(|s| refers_to(v, &s.field)))
        .collect();
    let mut violations: Vec<String> = shape.into_iter().map(|v| v.message).collect();
    violations.extend(rules);
    Err(ValidationError::new(violations))
}

/// A field whose JSON type is wrong.
struct ShapeViolation {
    field: String,
    message: String,
}

/// Read the envelope leniently: well-typed fields land in the returned
/// request, wrong-typed ones are left unset and reported.
fn read_envelope(json: &str) -> Result<(RawLlmRequest, Vec<ShapeViolation>), ValidationError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ValidationError::single(format!("malformed request: {}", e)))?;
    let request = match value.get("llmRequest") {
        Some(Value::Object(request)) => request,
        Some(other) => {
            return Err(ValidationError::single(format!(
                "malformed request: llmRequest must be an object, found {}",
                schema::type_name(other)
            )))
        }
        None => {
            return Err(ValidationError::single(
                "malformed request: missing llmRequest".to_string(),
            ))
        }
    };

    let mut shape = Vec::new();
    let mut prompts = Vec::new();
    match request.get("prompts") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let field = format!("prompts[{}]", i);
                match item {
                    Value::Object(prompt) => prompts.push(RawPrompt {
                        prompt_text: string_field(prompt, "promptText", &field, &mut shape),
                        prompt_role: string_field(prompt, "promptRole", &field, &mut shape),
                    }),
                    other => {
                        shape.push(wrong_type(field, "an object", other));
                        prompts.push(RawPrompt::default());
                    }
                }
            }
        }
        Some(other) => shape.push(wrong_type("prompts".to_string(), "an array", other)),
    }

    let raw = RawLlmRequest {
        prompts,
        target_ai_service_model: string_field(request, "targetAiServiceModel", "", &mut shape),
        output_data_type: string_field(request, "outputDataType", "", &mut shape),
        system_role: string_field(request, "systemRole", "", &mut shape),
        response_schema: request.get("responseSchema").filter(|v| !v.is_null()).cloned(),
        response_format: string_field(request, "responseFormat", "", &mut shape),
    };
    Ok((raw, shape))
}

fn string_field(
    object: &serde_json::Map<String, Value>,
    key: &str,
    parent: &str,
    shape: &mut Vec<ShapeViolation>,
) -> Option<String> {
    let field = if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    };
    match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            shape.push(wrong_type(field, "a string", other));
            None
        }
    }
}

fn wrong_type(field: String, expected: &str, found: &Value) -> ShapeViolation {
    let message = format!(
        "{} must be {}, found {}",
        field,
        expected,
        schema::type_name(found)
    );
    ShapeViolation { field, message }
}

/// Whether `violation` is about `field` or something nested in it.
fn refers_to(violation: &str, field: &str) -> bool {
    violation
        .strip_prefix(field)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| matches!(c, ' ' | '.' | '['))
}

/// Check `raw` against the contract and the model catalog.
pub fn validate(raw: &RawLlmRequest, known_models: &[String]) -> Result<LlmRequest, ValidationError> {
    let mut violations = Vec::new();

    if raw.prompts.is_empty() {
        violations.push("prompts must contain at least one prompt".to_string());
    }
    let mut prompts = Vec::with_capacity(raw.prompts.len());
    for (i, p) in raw.prompts.iter().enumerate() {
        let text = p.prompt_text.as_deref().unwrap_or("");
        if text.trim().is_empty() {
            violations.push(format!("prompts[{}].promptText must not be empty", i));
        }
        let role = match p.prompt_role.as_deref() {
            None => PromptRole::User,
            Some(r) => match PromptRole::parse(r) {
                Some(role) => role,
                None => {
                    violations.push(format!(
                        "prompts[{}].promptRole '{}' is not one of system, user, assistant",
                        i, r
                    ));
                    PromptRole::User
                }
            },
        };
        prompts.push(Prompt {
            text: text.to_string(),
            role,
        });
    }

    let model = match raw.target_ai_service_model.as_deref() {
        None | Some("") => {
            violations.push("targetAiServiceModel is required".to_string());
            String::new()
        }
        Some(m) => {
            if !known_models.iter().any(|k| k == m) {
                violations.push(format!("targetAiServiceModel '{}' is not a known model", m));
            }
            m.to_string()
        }
    };

    let output = match raw.output_data_type.as_deref() {
        Some("text") => Some(OutputType::Text),
        Some("structured") => Some(OutputType::Structured),
        Some(other) => {
            violations.push(format!(
                "outputDataType '{}' is not one of text, structured",
                other
            ));
            None
        }
        None => {
            violations.push("outputDataType is required".to_string());
            None
        }
    };

    if output == Some(OutputType::Structured) {
        match raw.response_schema {
            None => violations
                .push("responseSchema is required when outputDataType is structured".to_string()),
            Some(ref s) => {
                for problem in schema::check_schema(s) {
                    violations.push(format!("responseSchema {}", problem));
                }
            }
        }
    }

    let format = match raw.response_format.as_deref() {
        None => None,
        Some(f) => match ResponseFormat::parse(f) {
            Some(format) => Some(format),
            None => {
                violations.push(format!(
                    "responseFormat '{}' is not one of text, json_object, json_schema",
                    f
                ));
                None
            }
        },
    };
    if output == Some(OutputType::Structured) && format == Some(ResponseFormat::Text) {
        violations.push("responseFormat text cannot be used with structured output".to_string());
    }
    if format == Some(ResponseFormat::JsonSchema) && raw.response_schema.is_none() {
        violations.push("responseFormat json_schema requires responseSchema".to_string());
    }

    if !violations.is_empty() {
        return Err(ValidationError::new(violations));
    }

    // Both are Some once no violations were recorded.
    let output = output.unwrap_or(OutputType::Text);
    let response_format = format.unwrap_or(match output {
        OutputType::Text => ResponseFormat::Text,
        OutputType::Structured => ResponseFormat::JsonSchema,
    });

    Ok(LlmRequest {
        prompts,
        model,
        output,
        system_role: raw.system_role.clone().filter(|s| !s.trim().is_empty()),
        response_schema: raw.response_schema.clone(),
        response_format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Vec<String> {
        vec!["gpt-4o-mini".to_string(), "llama3".to_string()]
    }

    fn structured_raw() -> RawLlmRequest {
        RawLlmRequest {
            prompts: vec![
                RawPrompt::user("first"),
                RawPrompt {
                    prompt_text: Some("second".into()),
                    prompt_role: Some("assistant".into()),
                },
                RawPrompt::user("third"),
            ],
            target_ai_service_model: Some("gpt-4o-mini".into()),
            output_data_type: Some("structured".into()),
            system_role: Some("You outline documents.".into()),
            response_schema: Some(json!({
                "type": "object",
                "properties": { "summary": { "type": "string" } },
                "required": ["summary"]
            })),
            response_format: None,
        }
    }

    #[test]
    fn test_structured_request_preserves_prompt_order() {
        let req = validate(&structured_raw(), &catalog()).unwrap();
        let texts: Vec<&str> = req.prompts().iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(req.prompts()[0].role, PromptRole::User);
        assert_eq!(req.prompts()[1].role, PromptRole::Assistant);
        assert_eq!(req.output(), OutputType::Structured);
        assert_eq!(req.response_format(), ResponseFormat::JsonSchema);
        assert_eq!(req.system_role(), Some("You outline documents."));
    }

    #[test]
    fn test_structured_without_schema_is_rejected() {
        let mut raw = structured_raw();
        raw.response_schema = None;
        let err = validate(&raw, &catalog()).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(err.violations[0].contains("responseSchema is required"));
    }

    #[test]
    fn test_all_violations_are_reported() {
        let raw = RawLlmRequest {
            prompts: vec![
                RawPrompt::user(""),
                RawPrompt {
                    prompt_text: Some("hi".into()),
                    prompt_role: Some("narrator".into()),
                },
            ],
            target_ai_service_model: Some("gpt-9".into()),
            output_data_type: Some("xml".into()),
            system_role: None,
            response_schema: None,
            response_format: Some("yaml".into()),
        };
        let err = validate(&raw, &catalog()).unwrap_err();
        assert_eq!(err.violations.len(), 5, "{:?}", err.violations);
        assert!(err.violations.iter().any(|v| v.contains("prompts[0].promptText")));
        assert!(err.violations.iter().any(|v| v.contains("narrator")));
        assert!(err.violations.iter().any(|v| v.contains("gpt-9")));
        assert!(err.violations.iter().any(|v| v.contains("xml")));
        assert!(err.violations.iter().any(|v| v.contains("yaml")));
    }

    #[test]
    fn test_empty_prompts_and_missing_fields() {
        let err = validate(&RawLlmRequest::default(), &catalog()).unwrap_err();
        assert_eq!(err.violations.len(), 3, "{:?}", err.violations);
    }

    #[test]
    fn test_malformed_schema_is_a_violation() {
        let mut raw = structured_raw();
        raw.response_schema = Some(json!({ "type": "thing" }));
        let err = validate(&raw, &catalog()).unwrap_err();
        assert!(err.violations[0].starts_with("responseSchema $"));
    }

    #[test]
    fn test_text_request_defaults() {
        let raw = RawLlmRequest {
            prompts: vec![RawPrompt::user("Summarize this.")],
            target_ai_service_model: Some("llama3".into()),
            output_data_type: Some("text".into()),
            ..Default::default()
        };
        let req = validate(&raw, &catalog()).unwrap();
        assert_eq!(req.output(), OutputType::Text);
        assert_eq!(req.response_format(), ResponseFormat::Text);
        assert!(req.response_schema().is_none());
    }

    #[test]
    fn test_structured_with_text_format_conflicts() {
        let mut raw = structured_raw();
        raw.response_format = Some("text".into());
        let err = validate(&raw, &catalog()).unwrap_err();
        assert_eq!(err.violations.len(), 1);
    }

    #[test]
    fn test_parse_envelope() {
        let json = r#"{
            "llmRequest": {
                "prompts": [{ "promptText": "Hello", "promptRole": "user" }],
                "targetAiServiceModel": "gpt-4o-mini",
                "outputDataType": "text"
            }
        }"#;
        let raw = parse_envelope(json).unwrap();
        assert_eq!(raw.prompts.len(), 1);
        validate(&raw, &catalog()).unwrap();

        let err = parse_envelope("{\"prompts\": []}").unwrap_err();
        assert!(err.violations[0].starts_with("malformed request"));
        let err = parse_envelope("not json").unwrap_err();
        assert!(err.violations[0].starts_with("malformed request"));
    }

    #[test]
    fn test_parse_envelope_reports_every_wrong_type() {
        let json = r#"{"llmRequest":{"prompts":"oops","targetAiServiceModel":5,"outputDataType":7}}"#;
        let err = parse_envelope(json).unwrap_err();
        assert_eq!(
            err.violations,
            vec![
                "prompts must be an array, found string",
                "targetAiServiceModel must be a string, found number",
                "outputDataType must be a string, found number",
            ]
        );

        let json = r#"{"llmRequest":{"prompts":[{"promptText":1},"x"],"responseFormat":true}}"#;
        let err = parse_envelope(json).unwrap_err();
        assert_eq!(err.violations.len(), 3, "{:?}", err.violations);
        assert!(err.violations[0].starts_with("prompts[0].promptText must be a string"));
        assert!(err.violations[1].starts_with("prompts[1] must be an object"));
        assert!(err.violations[2].starts_with("responseFormat must be a string"));
    }

    #[test]
    fn test_parse_request_merges_type_and_rule_violations() {
        let json = r#"{"llmRequest":{
            "prompts": [{"promptText": 42}, {"promptText": "Hi", "promptRole": "bot"}],
            "targetAiServiceModel": "gpt-5-ultra",
            "outputDataType": ["text"]
        }}"#;
        let err = parse_request(json, &catalog()).unwrap_err();
        assert_eq!(
            err.violations,
            vec![
                "prompts[0].promptText must be a string, found number",
                "outputDataType must be a string, found array",
                "prompts[1].promptRole 'bot' is not one of system, user, assistant",
                "targetAiServiceModel 'gpt-5-ultra' is not a known model",
            ]
        );

        let json = r#"{"llmRequest":{
            "prompts": [{"promptText": "Hi"}],
            "targetAiServiceModel": "gpt-4o-mini",
            "outputDataType": "text"
        }}"#;
        let req = parse_request(json, &catalog()).unwrap();
        assert_eq!(req.output(), OutputType::Text);
    }

    #[test]
    fn test_corrective_prompt_appends_turns() {
        let req = validate(&structured_raw(), &catalog()).unwrap();
        let next = req.with_corrective_prompt("{\"summary\": 3}", "$.summary", "expected string");
        assert_eq!(next.prompts().len(), req.prompts().len() + 2);
        let n = next.prompts().len();
        assert_eq!(next.prompts()[n - 2].role, PromptRole::Assistant);
        assert_eq!(next.prompts()[n - 2].text, "{\"summary\": 3}");
        assert!(next.prompts()[n - 1].text.contains("$.summary"));
        assert_eq!(next.model(), req.model());
    }

    #[test]
    fn test_corrective_prompt_for_empty_reply() {
        let req = validate(&structured_raw(), &catalog()).unwrap();
        let next = req.with_corrective_prompt("  ", "$", "expected object, found null");
        let n = next.prompts().len();
        assert_eq!(next.prompts()[n - 2].role, PromptRole::Assistant);
        assert_eq!(next.prompts()[n - 2].text, "(empty reply)");
    }
}
