//! Lightweight argument validation against a tool's parameter shape.
//!
//! Covers the subset of JSON Schema that tool definitions use in practice:
//! `type`, `required`, `properties`, `items` and `enum`. Unknown keywords are
//! ignored rather than rejected.

use std::fmt;

use serde_json::Value;

/// A single place where arguments disagree with the parameter shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dotted path to the offending value (`$` is the root).
    pub path: String,
    /// What was wrong.
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `input` against `schema`, returning the first violation found.
///
/// A schema that is not an object accepts everything.
pub fn validate_arguments(input: &Value, schema: &Value) -> Result<(), SchemaViolation> {
    validate_at("$", input, schema)
}

fn validate_at(path: &str, input: &Value, schema: &Value) -> Result<(), SchemaViolation> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(Value::String(expected)) = schema_obj.get("type")
        && !json_type_matches(input, expected)
    {
        return Err(SchemaViolation {
            path: path.to_string(),
            message: format!("expected type '{expected}', got {}", json_type_name(input)),
        });
    }

    if let Some(Value::Array(allowed)) = schema_obj.get("enum")
        && !allowed.contains(input)
    {
        return Err(SchemaViolation {
            path: path.to_string(),
            message: format!("value {input} is not one of the allowed values"),
        });
    }

    if let Some(input_obj) = input.as_object() {
        if let Some(Value::Array(required)) = schema_obj.get("required") {
            for field in required.iter().filter_map(Value::as_str) {
                if !input_obj.contains_key(field) {
                    return Err(SchemaViolation {
                        path: path.to_string(),
                        message: format!("missing required field: {field}"),
                    });
                }
            }
        }

        if let Some(Value::Object(properties)) = schema_obj.get("properties") {
            for (field, prop_schema) in properties {
                if let Some(value) = input_obj.get(field) {
                    validate_at(&format!("{path}.{field}"), value, prop_schema)?;
                }
            }
        }
    }

    if let (Some(items), Some(Value::Object(_))) = (input.as_array(), schema_obj.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(&format!("{path}[{i}]"), item, &schema_obj["items"])?;
        }
    }

    Ok(())
}

fn json_type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
