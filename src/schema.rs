//! Minimal JSON-schema validation.
//!
//! Only two rules are enforced: every field listed in `required` must be
//! present, and every present property whose schema names a known `type` must
//! have a value of that type. Everything else in the schema (formats, enums,
//! nested schemas) is ignored. An absent or empty schema accepts anything.

use serde_json::{Map, Value};
use thiserror::Error;

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("failed to parse JSON: {0}")]
    Parse(String),

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid type for field {field}: expected {expected}")]
    InvalidType { field: String, expected: String },
}

/// Returns true when the schema constrains nothing.
pub fn is_empty_schema(schema: Option<&Value>) -> bool {
    match schema {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Parses `raw` and validates it against `schema`.
///
/// On success the parsed object is returned, or `None` when the schema was
/// empty and the payload was not inspected at all.
pub fn validate_json(
    raw: &str,
    schema: Option<&Value>,
) -> Result<Option<Map<String, Value>>, SchemaError> {
    if is_empty_schema(schema) {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(raw).map_err(|e| SchemaError::Parse(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(SchemaError::NotAnObject);
    };
    if let Some(schema) = schema {
        check_object(&map, schema)?;
    }
    Ok(Some(map))
}

/// Validates an already-parsed value against `schema`.
pub fn validate_value(value: &Value, schema: &Value) -> Result<(), SchemaError> {
    if is_empty_schema(Some(schema)) {
        return Ok(());
    }
    match value {
        Value::Object(map) => check_object(map, schema),
        _ => Err(SchemaError::NotAnObject),
    }
}

fn check_object(map: &Map<String, Value>, schema: &Value) -> Result<(), SchemaError> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(name) {
                return Err(SchemaError::MissingField(name.to_string()));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (field, property) in properties {
        let (Some(value), Some(expected)) = (
            map.get(field),
            property.get("type").and_then(Value::as_str),
        ) else {
            continue;
        };
        if !matches_type(value, expected) {
            return Err(SchemaError::InvalidType {
                field: field.clone(),
                expected: expected.to_string(),
            });
        }
    }
    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // unknown tags are not enforced
        _ => true,
    }
}
