//! JSON Schema subset used for structured LLM output.
//!
//! Supported keywords: `type` (string or array of strings), `properties`,
//! `required`, `additionalProperties` (boolean or schema), `items`, `enum`,
//! and `description` (ignored). That covers what chat providers accept in
//! their structured-output modes.
//!
//! Paths use a JSONPath-like notation rooted at `$`, e.g.
//! `$.sections[2].heading`.

use serde_json::Value;

const TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

/// The first place a value departs from its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Check that `schema` is itself well formed.
///
/// Returns every problem found, each prefixed with its schema path.
pub fn check_schema(schema: &Value) -> Vec<String> {
    let mut problems = Vec::new();
    if let Some(obj) = schema.as_object() {
        if !obj.contains_key("type") {
            problems.push("$: root schema must declare a type".to_string());
        }
    }
    check_node(schema, "$", &mut problems);
    problems
}

fn check_node(schema: &Value, path: &str, problems: &mut Vec<String>) {
    let obj = match schema.as_object() {
        Some(o) => o,
        None => {
            problems.push(format!("{}: schema must be an object", path));
            return;
        }
    };

    if let Some(ty) = obj.get("type") {
        let names: Vec<&Value> = match ty {
            Value::Array(items) if !items.is_empty() => items.iter().collect(),
            Value::String(_) => vec![ty],
            _ => {
                problems.push(format!(
                    "{}: type must be a string or non-empty array of strings",
                    path
                ));
                Vec::new()
            }
        };
        for name in names {
            match name.as_str() {
                Some(n) if TYPES.contains(&n) => {}
                _ => problems.push(format!("{}: unknown type {}", path, name)),
            }
        }
    }

    if let Some(props) = obj.get("properties") {
        match props.as_object() {
            Some(props) => {
                for (name, sub) in props {
                    check_node(sub, &format!("{}.properties.{}", path, name), problems);
                }
            }
            None => problems.push(format!("{}: properties must be an object", path)),
        }
    }

    if let Some(required) = obj.get("required") {
        let ok = required
            .as_array()
            .map(|r| r.iter().all(Value::is_string))
            .unwrap_or(false);
        if !ok {
            problems.push(format!("{}: required must be an array of strings", path));
        }
    }

    if let Some(items) = obj.get("items") {
        check_node(items, &format!("{}.items", path), problems);
    }

    if let Some(additional) = obj.get("additionalProperties") {
        if !additional.is_boolean() {
            check_node(additional, &format!("{}.additionalProperties", path), problems);
        }
    }

    if let Some(values) = obj.get("enum") {
        if !values.as_array().map(|v| !v.is_empty()).unwrap_or(false) {
            problems.push(format!("{}: enum must be a non-empty array", path));
        }
    }
}

/// Validate `value` against a well-formed `schema`.
pub fn validate(value: &Value, schema: &Value) -> Result<(), SchemaViolation> {
    validate_node(value, schema, "$")
}

fn type_matches(value: &Value, ty: &str) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn validate_node(value: &Value, schema: &Value, path: &str) -> Result<(), SchemaViolation> {
    let obj = match schema.as_object() {
        Some(o) => o,
        None => return Ok(()),
    };

    if let Some(ty) = obj.get("type") {
        let allowed: Vec<&str> = match ty {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(value, t)) {
            return Err(SchemaViolation::new(
                path,
                format!("expected {}, found {}", allowed.join(" or "), type_name(value)),
            ));
        }
    }

    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        if !values.contains(value) {
            return Err(SchemaViolation::new(
                path,
                format!("value {} is not one of the allowed values", value),
            ));
        }
    }

    if let Some(map) = value.as_object() {
        if let Some(required) = obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) {
                    return Err(SchemaViolation::new(
                        path,
                        format!("missing required property '{}'", name),
                    ));
                }
            }
        }

        let props = obj.get("properties").and_then(Value::as_object);
        for (name, child) in map {
            let child_path = format!("{}.{}", path, name);
            match props.and_then(|p| p.get(name)) {
                Some(sub) => validate_node(child, sub, &child_path)?,
                None => match obj.get("additionalProperties") {
                    Some(Value::Bool(false)) => {
                        return Err(SchemaViolation::new(
                            &child_path,
                            "additional property not allowed",
                        ))
                    }
                    Some(sub @ Value::Object(_)) => validate_node(child, sub, &child_path)?,
                    _ => {}
                },
            }
        }
    }

    if let (Some(items), Some(schema_items)) = (value.as_array(), obj.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_node(item, schema_items, &format!("{}[{}]", path, i))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outline_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "sections": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "heading": { "type": "string" },
                            "level": { "type": "integer" }
                        },
                        "required": ["heading"],
                        "additionalProperties": false
                    }
                },
                "tone": { "enum": ["formal", "casual"] }
            },
            "required": ["summary", "sections"]
        })
    }

    #[test]
    fn test_well_formed_schema_has_no_problems() {
        assert!(check_schema(&outline_schema()).is_empty());
    }

    #[test]
    fn test_malformed_schema_reports_every_problem() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": "strnig" },
                "b": 5
            },
            "required": "a"
        });
        let problems = check_schema(&schema);
        assert_eq!(problems.len(), 3, "{:?}", problems);
        assert!(problems.iter().any(|p| p.starts_with("$.properties.a")));
        assert!(problems.iter().any(|p| p.starts_with("$.properties.b")));
        assert!(problems.iter().any(|p| p.contains("required")));
    }

    #[test]
    fn test_root_must_declare_type() {
        assert!(!check_schema(&json!({ "properties": {} })).is_empty());
        assert!(!check_schema(&json!("object")).is_empty());
    }

    #[test]
    fn test_valid_value_passes() {
        let value = json!({
            "summary": "Adds a conclusion",
            "sections": [{ "heading": "Intro", "level": 1 }, { "heading": "End" }],
            "tone": "formal"
        });
        validate(&value, &outline_schema()).unwrap();
    }

    #[test]
    fn test_missing_required_property() {
        let err = validate(&json!({ "summary": "x" }), &outline_schema()).unwrap_err();
        assert_eq!(err.path, "$");
        assert!(err.message.contains("sections"));
    }

    #[test]
    fn test_nested_violation_path() {
        let value = json!({
            "summary": "x",
            "sections": [{ "heading": "ok" }, { "heading": 7 }]
        });
        let err = validate(&value, &outline_schema()).unwrap_err();
        assert_eq!(err.path, "$.sections[1].heading");
        assert_eq!(err.message, "expected string, found number");
    }

    #[test]
    fn test_additional_properties_rejected() {
        let value = json!({
            "summary": "x",
            "sections": [{ "heading": "h", "extra": true }]
        });
        let err = validate(&value, &outline_schema()).unwrap_err();
        assert_eq!(err.path, "$.sections[0].extra");
    }

    #[test]
    fn test_enum_and_integer() {
        let err = validate(
            &json!({ "summary": "x", "sections": [], "tone": "angry" }),
            &outline_schema(),
        )
        .unwrap_err();
        assert_eq!(err.path, "$.tone");

        let err = validate(
            &json!({ "summary": "x", "sections": [{ "heading": "h", "level": 1.5 }] }),
            &outline_schema(),
        )
        .unwrap_err();
        assert_eq!(err.path, "$.sections[0].level");
    }
}
