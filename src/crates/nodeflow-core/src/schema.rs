//! Plain-field schemas and backend output validation.
//!
//! Backends only ever see the reduced schema of a target's plain fields:
//! dep, recall, and gate fields are resolved by the engine and excluded.
//! [`validate_filled`] checks a backend's raw JSON against that schema and
//! extracts the values attribute by attribute, so nested structured fields
//! stay typed objects instead of being flattened through a serialize and
//! reconstruct round trip.

use serde_json::{json, Map, Value};

use crate::field::FieldType;
use crate::node::NodeDescriptor;

/// JSON schema covering exactly the plain fields of `descriptor`.
///
/// # Examples
///
/// ```rust
/// use nodeflow_core::{plain_schema, FieldSpec, FieldType, NodeDescriptor};
/// use serde_json::json;
///
/// let descriptor = NodeDescriptor::new("Answer")
///     .with_field(FieldSpec::plain("text", FieldType::Str))
///     .with_field(FieldSpec::recall("q", FieldType::Node("Question".into())));
///
/// let schema = plain_schema(&descriptor);
/// assert_eq!(schema["required"], json!(["text"]));
/// // Marked fields are excluded from the schema entirely.
/// assert!(schema["properties"].get("q").is_none());
/// ```
pub fn plain_schema(descriptor: &NodeDescriptor) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in descriptor.plain_fields() {
        let mut schema = field.ty.json_schema();
        if let (Some(doc), Value::Object(map)) = (&field.doc, &mut schema) {
            map.insert("description".to_string(), Value::String(doc.clone()));
        }
        properties.insert(field.name.clone(), schema);
        if !matches!(field.ty, FieldType::Optional(_)) {
            required.push(Value::String(field.name.clone()));
        }
    }
    json!({
        "type": "object",
        "title": descriptor.name,
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Validate a backend's raw fill output against `descriptor`'s plain fields.
///
/// Returns the extracted values in declaration order, or a human-readable
/// description of the first mismatch (fed back to the backend as the
/// correction hint). Extra keys in the raw output are ignored; a missing
/// non-optional field is a failure; missing optional fields become null.
///
/// # Examples
///
/// ```rust
/// use nodeflow_core::{validate_filled, FieldSpec, FieldType, NodeDescriptor};
/// use serde_json::json;
///
/// let descriptor = NodeDescriptor::new("Answer")
///     .with_field(FieldSpec::plain("text", FieldType::Str));
///
/// let fields = validate_filled(&descriptor, &json!({"text": "hi", "extra": 1})).unwrap();
/// assert_eq!(fields["text"], json!("hi"));
/// assert!(!fields.contains_key("extra"));
///
/// let err = validate_filled(&descriptor, &json!({})).unwrap_err();
/// assert!(err.contains("missing required field 'text'"));
/// ```
pub fn validate_filled(
    descriptor: &NodeDescriptor,
    raw: &Value,
) -> std::result::Result<Map<String, Value>, String> {
    let object = match raw {
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "expected a JSON object for '{}', got {}",
                descriptor.name,
                match other {
                    Value::Null => "null",
                    Value::Bool(_) => "a boolean",
                    Value::Number(_) => "a number",
                    Value::String(_) => "a string",
                    Value::Array(_) => "an array",
                    Value::Object(_) => unreachable!(),
                }
            ))
        }
    };

    let mut out = Map::new();
    for field in descriptor.plain_fields() {
        match object.get(&field.name) {
            Some(value) => {
                field
                    .ty
                    .validate(value)
                    .map_err(|e| format!("field '{}': {}", field.name, e))?;
                out.insert(field.name.clone(), value.clone());
            }
            None if matches!(field.ty, FieldType::Optional(_)) => {
                out.insert(field.name.clone(), Value::Null);
            }
            None => {
                return Err(format!(
                    "missing required field '{}' ({})",
                    field.name, field.ty
                ))
            }
        }
    }
    Ok(out)
}
