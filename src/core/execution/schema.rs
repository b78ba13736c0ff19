//! Input forms attached to agent listings.
//!
//! An agent's `input_schema` is a list of fields. Users submit a flat JSON
//! object; it is checked here before anything is decrypted or sent upstream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Select,
    Url,
    Email,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::Url => "url",
            FieldType::Email => "email",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Check a schema definition itself (admin side).
pub fn validate_schema(fields: &[InputField]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for field in fields {
        let name = field.name.trim();
        if name.is_empty() {
            errors.push("field name must not be empty".to_string());
            continue;
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            errors.push(format!(
                "field '{}' may only contain letters, digits, '_' and '-'",
                name
            ));
        }
        if !seen.insert(name.to_string()) {
            errors.push(format!("field '{}' is defined more than once", name));
        }
        if field.field_type == FieldType::Select && field.options.is_empty() {
            errors.push(format!("select field '{}' needs at least one option", name));
        }
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_type(field: &InputField, value: &Value) -> Option<String> {
    let ok = match field.field_type {
        FieldType::Text | FieldType::Textarea => value.is_string(),
        FieldType::Number => {
            value.is_number()
                || value
                    .as_str()
                    .is_some_and(|s| s.trim().parse::<f64>().is_ok())
        }
        FieldType::Boolean => value.is_boolean(),
        FieldType::Select => value
            .as_str()
            .is_some_and(|s| field.options.iter().any(|o| o == s)),
        FieldType::Url => value
            .as_str()
            .is_some_and(|s| crate::core::config::validate_http_url(s).is_ok()),
        FieldType::Email => value.as_str().is_some_and(|s| {
            let mut parts = s.split('@');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(local), Some(domain), None)
                    if !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            )
        }),
    };
    if ok {
        return None;
    }
    Some(match field.field_type {
        FieldType::Select => format!(
            "'{}' must be one of: {}",
            field.name,
            field.options.join(", ")
        ),
        other => format!("'{}' must be a valid {}", field.name, other.as_str()),
    })
}

/// Validate submitted inputs against `schema`. Returns the inputs unchanged
/// when they pass, otherwise every problem found.
pub fn validate_inputs(schema: &[InputField], inputs: &Value) -> Result<Map<String, Value>, Vec<String>> {
    let empty = Map::new();
    let object = match inputs {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err(vec!["inputs must be a JSON object".to_string()]),
    };

    let mut errors = Vec::new();
    for key in object.keys() {
        if !schema.iter().any(|f| &f.name == key) {
            errors.push(format!("unknown input '{}'", key));
        }
    }
    for field in schema {
        match object.get(&field.name) {
            Some(value) if !is_blank(value) => {
                if let Some(err) = check_type(field, value) {
                    errors.push(err);
                }
            }
            _ if field.required => errors.push(format!("'{}' is required", field.name)),
            _ => {}
        }
    }

    if errors.is_empty() {
        Ok(object.clone())
    } else {
        Err(errors)
    }
}
