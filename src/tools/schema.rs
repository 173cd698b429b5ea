//! Tool configuration document validation.
//!
//! Two passes over the raw JSON: a structural pass against an embedded JSON
//! Schema (required fields, types, enums), then semantic checks the schema
//! cannot express (supported version, transport/URL pairing, capability
//! pattern shape, duration parsing). Pure: no I/O, no environment access,
//! and nothing is defaulted when a check fails.

use crate::tools::capability::CapabilityPattern;
use crate::tools::config::ToolConfig;
use crate::types::SchemaError;
use jsonschema::error::ValidationErrorKind;
use jsonschema::Validator;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

/// Schema versions this crate understands.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1", "1.0"];

fn document_schema() -> Value {
    json!({
        "type": "object",
        "required": ["schemaVersion", "name", "transport", "capabilities", "timeout"],
        "properties": {
            "schemaVersion": { "type": "string" },
            "name": { "type": "string", "minLength": 1 },
            "description": { "type": "string" },
            "command": { "type": "string" },
            "args": { "type": "array", "items": { "type": "string" } },
            "transport": { "type": "string", "enum": ["stdio", "http"] },
            "url": { "type": "string" },
            "env": { "type": "object", "additionalProperties": { "type": "string" } },
            "capabilities": { "type": "array", "items": { "type": "string" } },
            "timeout": { "type": "string" },
            "retryPolicy": {
                "type": "object",
                "required": ["maxAttempts"],
                "properties": {
                    "maxAttempts": { "type": "integer", "minimum": 1, "maximum": 10 },
                    "backoff": { "type": "string", "enum": ["none", "fixed", "exponential"] },
                    "baseDelay": { "type": "string" }
                }
            },
            "enabled": { "type": "boolean" },
            "rbac": {
                "type": "object",
                "properties": {
                    "allowedCapabilities": {
                        "type": "object",
                        "additionalProperties": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    },
                    "maxCallsPerMinute": { "type": "integer", "minimum": 1 },
                    "maxConcurrentCalls": { "type": "integer", "minimum": 1 },
                    "maxTokensPerCall": { "type": "integer", "minimum": 1 }
                }
            }
        }
    })
}

fn structural_validator() -> Result<&'static Validator, SchemaError> {
    static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();
    VALIDATOR
        .get_or_init(|| jsonschema::validator_for(&document_schema()).map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| SchemaError::new("$schema", format!("embedded schema invalid: {}", e)))
}

/// Validate a document, returning the first problem found.
pub fn validate(doc: &Value) -> Result<(), SchemaError> {
    match validate_all(doc).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate a document, returning every problem found (empty = valid).
///
/// Semantic checks only run once the structure is sound, so each reported
/// field is the root cause rather than a downstream symptom.
pub fn validate_all(doc: &Value) -> Vec<SchemaError> {
    if !doc.is_object() {
        return vec![SchemaError::new("document", "must be a JSON object")];
    }

    let validator = match structural_validator() {
        Ok(v) => v,
        Err(e) => return vec![e],
    };
    let structural: Vec<SchemaError> = validator.iter_errors(doc).map(|e| to_schema_error(&e)).collect();
    if !structural.is_empty() {
        return structural;
    }

    semantic_errors(doc)
}

/// Validate and convert into a typed [`ToolConfig`].
pub fn parse_document(doc: &Value) -> Result<ToolConfig, SchemaError> {
    validate(doc)?;
    serde_json::from_value(doc.clone()).map_err(|e| SchemaError::new("document", e.to_string()))
}

fn to_schema_error(err: &jsonschema::ValidationError<'_>) -> SchemaError {
    let mut field = pointer_to_field(&err.instance_path.to_string());
    let reason = match &err.kind {
        ValidationErrorKind::Required { property } => {
            let property = property.as_str().unwrap_or_default();
            field = if field.is_empty() {
                property.to_string()
            } else {
                format!("{}.{}", field, property)
            };
            "required field is missing".to_string()
        }
        _ => err.to_string(),
    };
    if field.is_empty() {
        field = "document".to_string();
    }
    SchemaError::new(field, reason)
}

/// `/rbac/maxCallsPerMinute` → `rbac.maxCallsPerMinute`, `/capabilities/2` → `capabilities[2]`.
fn pointer_to_field(pointer: &str) -> String {
    let mut field = String::new();
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        if segment.chars().all(|c| c.is_ascii_digit()) {
            field.push('[');
            field.push_str(segment);
            field.push(']');
        } else {
            if !field.is_empty() {
                field.push('.');
            }
            field.push_str(segment);
        }
    }
    field
}

fn semantic_errors(doc: &Value) -> Vec<SchemaError> {
    let mut errors = Vec::new();
    let str_field = |key: &str| doc.get(key).and_then(Value::as_str);

    if let Some(version) = str_field("schemaVersion") {
        if !SUPPORTED_SCHEMA_VERSIONS.contains(&version) {
            errors.push(SchemaError::new(
                "schemaVersion",
                format!(
                    "unsupported version '{}', expected one of: {}",
                    version,
                    SUPPORTED_SCHEMA_VERSIONS.join(", ")
                ),
            ));
        }
    }

    if let Some(name) = str_field("name") {
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            errors.push(SchemaError::new(
                "name",
                format!("invalid character '{}' in tool name", bad),
            ));
        }
    }

    match str_field("transport") {
        Some("http") => match str_field("url") {
            None => errors.push(SchemaError::new("url", "required when transport is http")),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                errors.push(SchemaError::new("url", "must be an http:// or https:// URL"))
            }
            Some(_) => {}
        },
        Some("stdio") => match str_field("command") {
            Some(cmd) if !cmd.trim().is_empty() => {}
            Some(_) => errors.push(SchemaError::new("command", "cannot be empty")),
            None => errors.push(SchemaError::new(
                "command",
                "required when transport is stdio",
            )),
        },
        _ => {}
    }

    if let Some(caps) = doc.get("capabilities").and_then(Value::as_array) {
        check_patterns(caps, "capabilities", &mut errors);
    }

    if let Some(timeout) = str_field("timeout") {
        if let Err(reason) = positive_duration(timeout) {
            errors.push(SchemaError::new("timeout", reason));
        }
    }

    if let Some(delay) = doc.pointer("/retryPolicy/baseDelay").and_then(Value::as_str) {
        if let Err(reason) = positive_duration(delay) {
            errors.push(SchemaError::new("retryPolicy.baseDelay", reason));
        }
    }

    if let Some(roles) = doc
        .pointer("/rbac/allowedCapabilities")
        .and_then(Value::as_object)
    {
        for (role, patterns) in roles {
            if role.trim().is_empty() {
                errors.push(SchemaError::new(
                    "rbac.allowedCapabilities",
                    "role name cannot be empty",
                ));
            }
            if let Some(patterns) = patterns.as_array() {
                check_patterns(
                    patterns,
                    &format!("rbac.allowedCapabilities.{}", role),
                    &mut errors,
                );
            }
        }
    }

    errors
}

fn check_patterns(values: &[Value], field: &str, errors: &mut Vec<SchemaError>) {
    for (i, value) in values.iter().enumerate() {
        if let Some(raw) = value.as_str() {
            if let Err(reason) = CapabilityPattern::parse(raw) {
                errors.push(SchemaError::new(format!("{}[{}]", field, i), reason));
            }
        }
    }
}

fn positive_duration(raw: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(raw)
        .map_err(|e| format!("invalid duration '{}': {}", raw, e))?;
    if duration.is_zero() {
        return Err("must be a positive duration".to_string());
    }
    Ok(duration)
}
