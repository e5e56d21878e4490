//! Validation of tool arguments against the JSON schema subset used in tool declarations:
//! `type`, `properties`, `required`, `enum`, `items`, `minimum`, `maximum` and
//! `additionalProperties: false`.
use serde_json::{Map, Value};

use crate::errors::{AgentError, AgentResult};

/// Check `arguments` against `schema`, returning the first violation found
pub fn validate(schema: &Value, arguments: &Value) -> AgentResult<()> {
    validate_at("arguments", schema, arguments).map_err(AgentError::InvalidParameters)
}

fn validate_at(location: &str, schema: &Value, value: &Value) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(expected, value) {
            return Err(format!(
                "{} must be of type {}, got {}",
                location,
                expected,
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!(
                "{} must be one of {}, got {}",
                location,
                Value::Array(allowed.clone()),
                value
            ));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if number < min {
                return Err(format!("{} must be at least {}", location, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if number > max {
                return Err(format!("{} must be at most {}", location, max));
            }
        }
    }

    match value {
        Value::Object(object) => validate_object(location, schema, object),
        Value::Array(items) => match schema.get("items") {
            Some(item_schema) => items.iter().enumerate().try_for_each(|(i, item)| {
                validate_at(&format!("{}[{}]", location, i), item_schema, item)
            }),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

fn validate_object(location: &str, schema: &Value, object: &Map<String, Value>) -> Result<(), String> {
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if object.get(key).map_or(true, Value::is_null) {
                return Err(format!("{} is missing required field '{}'", location, key));
            }
        }
    }

    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (key, value) in object {
        let property = properties.and_then(|p| p.get(key));
        match property {
            // Optional fields sent as null are treated as absent
            Some(_) if value.is_null() => {}
            Some(property_schema) => {
                validate_at(&format!("{}.{}", location, key), property_schema, value)?
            }
            None if closed => {
                return Err(format!("{} has unexpected field '{}'", location, key));
            }
            None => {}
        }
    }
    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|n| n.fract() == 0.0),
        "null" => value.is_null(),
        _ => true,
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn products_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "filters": {
                    "type": "object",
                    "properties": {
                        "category": {"type": "string"},
                        "name": {"type": "string"}
                    },
                    "additionalProperties": false
                },
                "limit": {"type": "integer", "minimum": 1, "maximum": 25}
            }
        })
    }

    fn count_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {"type": "string", "enum": ["products", "orders", "users", "profiles"]}
            },
            "required": ["table"]
        })
    }

    #[test]
    fn test_accepts_valid_arguments() {
        assert!(validate(&products_schema(), &json!({})).is_ok());
        assert!(validate(&products_schema(), &json!({"filters": {"category": "fruits"}, "limit": 5})).is_ok());
        // Models frequently send whole numbers as floats
        assert!(validate(&products_schema(), &json!({"limit": 5.0})).is_ok());
        assert!(validate(&products_schema(), &json!({"limit": null})).is_ok());
        assert!(validate(&count_schema(), &json!({"table": "orders"})).is_ok());
    }

    #[test]
    fn test_rejects_wrong_types() {
        let err = validate(&products_schema(), &json!({"limit": "ten"})).unwrap_err();
        assert_eq!(
            err,
            AgentError::InvalidParameters("arguments.limit must be of type integer, got string".into())
        );
        assert!(validate(&products_schema(), &json!({"limit": 2.5})).is_err());
        assert!(validate(&products_schema(), &json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_rejects_missing_required() {
        let err = validate(&count_schema(), &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required field 'table'"));
        assert!(validate(&count_schema(), &json!({"table": null})).is_err());
    }

    #[test]
    fn test_rejects_enum_and_bounds() {
        let err = validate(&count_schema(), &json!({"table": "secrets"})).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
        assert!(validate(&products_schema(), &json!({"limit": 0})).is_err());
        assert!(validate(&products_schema(), &json!({"limit": 500})).is_err());
    }

    #[test]
    fn test_closed_objects() {
        let err = validate(&products_schema(), &json!({"filters": {"price": 10}})).unwrap_err();
        assert!(err.to_string().contains("unexpected field 'price'"));
        // Top level schema is open
        assert!(validate(&products_schema(), &json!({"verbose": true})).is_ok());
    }

    #[test]
    fn test_array_items() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        assert!(validate(&schema, &json!(["a", "b"])).is_ok());
        let err = validate(&schema, &json!(["a", 1])).unwrap_err();
        assert!(err.to_string().contains("arguments[1]"));
    }
}
