//! Field types, resolution markers, and the field classifier.
//!
//! A node type declares its fields as [`FieldSpec`]s: a name, a [`FieldType`],
//! and a [`Binding`] that selects the resolution strategy. Fields with no
//! marker are plain (filled by the backend on non-start nodes, caller-supplied
//! on the start node). The classifier maps each declared field to a
//! [`FieldKind`] in declaration order; fields whose name starts with `_` are
//! internal and skipped entirely.
//!
//! [`FieldType`] doubles as the validation vocabulary: it generates JSON
//! schema fragments for backend prompts, validates backend output, and
//! coerces raw shell strings handed to input gates.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::dep::Dep;
use crate::node::NodeDescriptor;

/// Resolution strategy categories produced by [`classify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Plain,
    Dep,
    Recall,
    Gate,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::Plain => "plain",
            FieldKind::Dep => "dep",
            FieldKind::Recall => "recall",
            FieldKind::Gate => "gate",
        };
        f.write_str(s)
    }
}

/// Field resolution marker.
///
/// `Effect` marks a side-effecting action field; the engine currently treats
/// it as plain.
#[derive(Clone)]
pub enum Binding {
    Plain,
    Dep(Arc<Dep>),
    Recall,
    Gate { description: Option<String> },
    Effect,
}

impl Binding {
    pub fn kind(&self) -> FieldKind {
        match self {
            Binding::Plain | Binding::Effect => FieldKind::Plain,
            Binding::Dep(_) => FieldKind::Dep,
            Binding::Recall => FieldKind::Recall,
            Binding::Gate { .. } => FieldKind::Gate,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Plain => f.write_str("Plain"),
            Binding::Dep(dep) => write!(f, "Dep({})", dep.name()),
            Binding::Recall => f.write_str("Recall"),
            Binding::Gate { description } => write!(f, "Gate({:?})", description),
            Binding::Effect => f.write_str("Effect"),
        }
    }
}

/// Declared type of a node field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Str,
    Int,
    Float,
    Bool,
    List(Box<FieldType>),
    Optional(Box<FieldType>),
    /// A nested structured value with its own named fields.
    Struct(Arc<StructSchema>),
    /// A reference to a node type, used by recall fields.
    Node(String),
}

/// Schema of a nested structured field.
#[derive(Debug, PartialEq)]
pub struct StructSchema {
    pub name: String,
    pub doc: Option<String>,
    pub fields: Vec<(String, FieldType)>,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Str => f.write_str("str"),
            FieldType::Int => f.write_str("int"),
            FieldType::Float => f.write_str("float"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::List(inner) => write!(f, "list[{}]", inner),
            FieldType::Optional(inner) => write!(f, "optional[{}]", inner),
            FieldType::Struct(schema) => f.write_str(&schema.name),
            FieldType::Node(name) => f.write_str(name),
        }
    }
}

impl FieldType {
    /// Peel `Optional` wrappers down to the base type.
    pub fn base(&self) -> &FieldType {
        match self {
            FieldType::Optional(inner) => inner.base(),
            other => other,
        }
    }

    /// Check a value against this type. Returns a human-readable description
    /// of the first mismatch.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            FieldType::Str => match value {
                Value::String(_) => Ok(()),
                other => Err(format!("expected str, got {}", json_kind(other))),
            },
            FieldType::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                other => Err(format!("expected int, got {}", json_kind(other))),
            },
            FieldType::Float => match value {
                Value::Number(_) => Ok(()),
                other => Err(format!("expected float, got {}", json_kind(other))),
            },
            FieldType::Bool => match value {
                Value::Bool(_) => Ok(()),
                other => Err(format!("expected bool, got {}", json_kind(other))),
            },
            FieldType::List(inner) => match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        inner
                            .validate(item)
                            .map_err(|e| format!("list item {}: {}", i, e))?;
                    }
                    Ok(())
                }
                other => Err(format!("expected list, got {}", json_kind(other))),
            },
            FieldType::Optional(inner) => match value {
                Value::Null => Ok(()),
                other => inner.validate(other),
            },
            FieldType::Struct(schema) => match value {
                Value::Object(map) => {
                    for (name, ty) in &schema.fields {
                        match map.get(name) {
                            Some(v) => ty
                                .validate(v)
                                .map_err(|e| format!("{}.{}: {}", schema.name, name, e))?,
                            None if matches!(ty, FieldType::Optional(_)) => {}
                            None => {
                                return Err(format!(
                                    "{} is missing field '{}'",
                                    schema.name, name
                                ))
                            }
                        }
                    }
                    Ok(())
                }
                other => Err(format!(
                    "expected {} object, got {}",
                    schema.name,
                    json_kind(other)
                )),
            },
            FieldType::Node(name) => match value {
                Value::Object(_) => Ok(()),
                other => Err(format!(
                    "expected {} instance, got {}",
                    name,
                    json_kind(other)
                )),
            },
        }
    }

    /// Coerce a raw string (as typed into the interactive shell) into a value
    /// of this type. Returns `None` when the string cannot be coerced.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::FieldType;
    /// use serde_json::json;
    ///
    /// assert_eq!(FieldType::Bool.coerce_str("yes"), Some(json!(true)));
    /// assert_eq!(FieldType::Int.coerce_str("42"), Some(json!(42)));
    /// assert_eq!(FieldType::Int.coerce_str("forty-two"), None);
    /// ```
    pub fn coerce_str(&self, raw: &str) -> Option<Value> {
        match self.base() {
            FieldType::Str => Some(Value::String(raw.to_string())),
            FieldType::Int => raw.trim().parse::<i64>().ok().map(Value::from),
            FieldType::Float => raw.trim().parse::<f64>().ok().map(Value::from),
            FieldType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "n" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            FieldType::List(_) | FieldType::Struct(_) | FieldType::Node(_) => {
                let parsed: Value = serde_json::from_str(raw).ok()?;
                self.base().validate(&parsed).ok()?;
                Some(parsed)
            }
            FieldType::Optional(_) => unreachable!("base() peels Optional"),
        }
    }

    /// JSON schema fragment for backend prompts.
    pub fn json_schema(&self) -> Value {
        match self {
            FieldType::Str => json!({"type": "string"}),
            FieldType::Int => json!({"type": "integer"}),
            FieldType::Float => json!({"type": "number"}),
            FieldType::Bool => json!({"type": "boolean"}),
            FieldType::List(inner) => json!({"type": "array", "items": inner.json_schema()}),
            FieldType::Optional(inner) => {
                let mut schema = inner.json_schema();
                if let Value::Object(map) = &mut schema {
                    map.insert("nullable".to_string(), Value::Bool(true));
                }
                schema
            }
            FieldType::Struct(schema) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for (name, ty) in &schema.fields {
                    properties.insert(name.clone(), ty.json_schema());
                    if !matches!(ty, FieldType::Optional(_)) {
                        required.push(Value::String(name.clone()));
                    }
                }
                let mut out = json!({
                    "type": "object",
                    "title": schema.name,
                    "properties": properties,
                    "required": required,
                });
                if let Some(doc) = &schema.doc {
                    out["description"] = Value::String(doc.clone());
                }
                out
            }
            FieldType::Node(name) => json!({"type": "object", "title": name}),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared field of a node type.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub binding: Binding,
    pub doc: Option<String>,
}

impl FieldSpec {
    pub fn plain(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            binding: Binding::Plain,
            doc: None,
        }
    }

    pub fn dep(name: impl Into<String>, ty: FieldType, dep: Arc<Dep>) -> Self {
        Self {
            name: name.into(),
            ty,
            binding: Binding::Dep(dep),
            doc: None,
        }
    }

    pub fn recall(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            binding: Binding::Recall,
            doc: None,
        }
    }

    pub fn gate(name: impl Into<String>, ty: FieldType, description: Option<&str>) -> Self {
        Self {
            name: name.into(),
            ty,
            binding: Binding::Gate {
                description: description.map(str::to_string),
            },
            doc: None,
        }
    }

    pub fn effect(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            binding: Binding::Effect,
            doc: None,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn kind(&self) -> FieldKind {
        self.binding.kind()
    }

    /// Internal fields are skipped by the classifier, the resolver, and the
    /// schema builder.
    pub fn is_internal(&self) -> bool {
        self.name.starts_with('_')
    }
}

/// Categorize every declared (non-internal) field of a node type.
///
/// Order matches field declaration order, which is observable downstream in
/// resolver output and schema property order. The decision is marker-driven:
/// an `Optional` field with a `Gate` marker is a gate, not a plain field.
///
/// # Examples
///
/// ```rust
/// use nodeflow_core::{classify, FieldKind, FieldSpec, FieldType, NodeDescriptor};
///
/// let descriptor = NodeDescriptor::new("Review")
///     .with_field(FieldSpec::plain("title", FieldType::Str))
///     .with_field(FieldSpec::recall("draft", FieldType::Node("Draft".into())))
///     .with_field(FieldSpec::gate("approved", FieldType::Bool, Some("OK?")));
///
/// let kinds = classify(&descriptor);
/// assert_eq!(kinds[0], ("title".to_string(), FieldKind::Plain));
/// assert_eq!(kinds[1].1, FieldKind::Recall);
/// assert_eq!(kinds[2].1, FieldKind::Gate);
/// ```
pub fn classify(descriptor: &NodeDescriptor) -> Vec<(String, FieldKind)> {
    descriptor
        .fields
        .iter()
        .filter(|f| !f.is_internal())
        .map(|f| (f.name.clone(), f.kind()))
        .collect()
}
