//! Input validation against JSON schemas

use crate::error::{ManualError, Result};
use serde_json::Value;

/// Validate input against a JSON schema
pub fn validate_input(input: &Value, schema: &Value) -> Result<()> {
    if !input.is_object() {
        return Err(ManualError::InvalidInput(format!(
            "Expected an object, got {}",
            type_name(input)
        )));
    }

    // Get required fields from schema
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required {
            let field_str = field_name
                .as_str()
                .ok_or_else(|| ManualError::InvalidInput("Invalid schema: required field not a string".to_string()))?;

            if input.get(field_str).map_or(true, Value::is_null) {
                return Err(ManualError::InvalidInput(format!("Missing required field: {}", field_str)));
            }
        }
    }

    // Validate property types
    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        if let Some(input_obj) = input.as_object() {
            for (key, value) in input_obj {
                if let Some(prop_schema) = properties.get(key) {
                    validate_type(key, value, prop_schema)?;
                }
            }
        }
    }

    Ok(())
}

/// Validate that a value matches the expected type
fn validate_type(key: &str, value: &Value, schema: &Value) -> Result<()> {
    // Optional fields may be sent as null.
    if value.is_null() {
        return Ok(());
    }

    if let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) {
        let valid = match expected_type {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true, // Unknown types pass validation
        };

        if !valid {
            return Err(ManualError::InvalidInput(format!(
                "Type mismatch for {}: expected {}, got {}",
                key,
                expected_type,
                type_name(value)
            )));
        }
    }

    if let Some(minimum) = schema.get("minimum").and_then(Value::as_i64) {
        if value.as_i64().is_some_and(|v| v < minimum) {
            return Err(ManualError::InvalidInput(format!("{} must be at least {}", key, minimum)));
        }
    }

    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
