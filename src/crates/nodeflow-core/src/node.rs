//! Node descriptors and node instances.
//!
//! The engine never reflects over live types: every node type is described
//! once by a [`NodeDescriptor`] (fields, successor route, call kind) and
//! registered in a [`NodeTable`]. Successor edges are recorded by type name
//! so graphs may contain loops. A [`NodeInstance`] is one populated record in
//! a trace.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::field::{FieldKind, FieldSpec};
use crate::lm::LmBackend;

/// Successor shape of a node type's `call` return type.
#[derive(Clone, Debug)]
pub enum RouteSpec {
    /// Unit return type: the node ends the run.
    Terminal,
    /// Exactly one successor type.
    Single(String),
    /// A union of successor types; `allows_end` marks a union that includes
    /// the unit type, letting the backend finish the run.
    Union {
        candidates: Vec<String>,
        allows_end: bool,
    },
}

impl RouteSpec {
    /// Direct successor type names, in declaration order.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            RouteSpec::Terminal => Vec::new(),
            RouteSpec::Single(name) => vec![name.as_str()],
            RouteSpec::Union { candidates, .. } => {
                candidates.iter().map(String::as_str).collect()
            }
        }
    }
}

/// User logic for an escape-hatch node.
///
/// The handler receives the current instance and its resolved dep/recall/gate
/// values, plus the run's backend when the descriptor declared `wants_lm`.
/// Returning `None` ends the run. Errors are passed through to the caller
/// unchanged, with the partial trace attached by the executor.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn call(
        &self,
        node: &NodeInstance,
        resolved: &Map<String, Value>,
        lm: Option<Arc<dyn LmBackend>>,
    ) -> std::result::Result<Option<NodeInstance>, anyhow::Error>;
}

/// Whether a node type's `call` is an auto-routed placeholder or user logic.
#[derive(Clone)]
pub enum CallKind {
    /// Placeholder body: the executor routes by [`RouteSpec`] and the backend
    /// chooses/fills successors.
    Auto,
    /// User logic. `wants_lm` mirrors whether the `call` signature declares a
    /// backend parameter.
    Handler {
        wants_lm: bool,
        handler: Arc<dyn NodeHandler>,
    },
}

impl fmt::Debug for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Auto => f.write_str("Auto"),
            CallKind::Handler { wants_lm, .. } => {
                write!(f, "Handler {{ wants_lm: {} }}", wants_lm)
            }
        }
    }
}

/// The immutable description of one node type.
#[derive(Clone, Debug)]
pub struct NodeDescriptor {
    pub name: String,
    pub doc: Option<String>,
    pub fields: Vec<FieldSpec>,
    pub route: RouteSpec,
    pub call: CallKind,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: None,
            fields: Vec::new(),
            route: RouteSpec::Terminal,
            call: CallKind::Auto,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_route(mut self, route: RouteSpec) -> Self {
        self.route = route;
        self
    }

    /// Mark this node as an escape hatch executing `handler`.
    pub fn with_handler(mut self, wants_lm: bool, handler: Arc<dyn NodeHandler>) -> Self {
        self.call = CallKind::Handler { wants_lm, handler };
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared (non-internal) plain fields, the ones a backend fills.
    pub fn plain_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| !f.is_internal() && f.kind() == FieldKind::Plain)
    }

    /// Does any non-internal field carry the given kind?
    pub fn has_kind(&self, kind: FieldKind) -> bool {
        self.fields
            .iter()
            .any(|f| !f.is_internal() && f.kind() == kind)
    }

    /// The instruction handed to `fill`: type name plus docstring.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::NodeDescriptor;
    ///
    /// let descriptor = NodeDescriptor::new("Summary").with_doc("Condense the findings.");
    /// assert_eq!(descriptor.instruction(), "Summary: Condense the findings.");
    /// assert_eq!(NodeDescriptor::new("Bare").instruction(), "Bare");
    /// ```
    pub fn instruction(&self) -> String {
        match &self.doc {
            Some(doc) => format!("{}: {}", self.name, doc),
            None => self.name.clone(),
        }
    }
}

/// The process-wide table of node descriptors, indexed by type name.
#[derive(Clone, Default)]
pub struct NodeTable {
    map: HashMap<String, Arc<NodeDescriptor>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: NodeDescriptor) -> Arc<NodeDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.map
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        descriptor
    }

    pub fn get(&self, name: &str) -> Option<&Arc<NodeDescriptor>> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One populated node record in a trace.
///
/// Field values are kept in declaration order. Instances are constructed at
/// most once per trace position and only appended once every field has been
/// populated.
#[derive(Clone, Debug, Serialize)]
pub struct NodeInstance {
    pub id: Uuid,
    pub type_name: String,
    pub fields: Map<String, Value>,
}

impl NodeInstance {
    pub fn new(type_name: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The instance's field values as one JSON object.
    pub fn as_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Insert resolved dep/recall/gate values that are not yet present.
    pub(crate) fn merge_resolved(&mut self, resolved: &Map<String, Value>) {
        for (name, value) in resolved {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Build a full instance from backend-filled plain values plus resolved
    /// values, attribute by attribute in declaration order. Nested structured
    /// values pass through as-is; nothing is re-serialized.
    pub(crate) fn compose(
        descriptor: &NodeDescriptor,
        plain: &Map<String, Value>,
        resolved: &Map<String, Value>,
    ) -> Self {
        let mut fields = Map::new();
        for spec in descriptor.fields.iter().filter(|f| !f.is_internal()) {
            let value = match spec.kind() {
                FieldKind::Plain => plain.get(&spec.name),
                _ => resolved.get(&spec.name),
            };
            if let Some(value) = value {
                fields.insert(spec.name.clone(), value.clone());
            }
        }
        Self::new(descriptor.name.clone(), fields)
    }
}

impl PartialEq for NodeInstance {
    /// Instances compare by type and field values; the id is unique per
    /// construction and excluded.
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.fields == other.fields
    }
}

/// The ordered sequence of node instances produced during a run.
pub type Trace = Vec<NodeInstance>;

/// Walk the trace backward for the most recent instance of `type_name`.
///
/// # Examples
///
/// ```rust
/// use nodeflow_core::{recall_from_trace, NodeInstance};
/// use serde_json::Map;
///
/// let trace = vec![
///     NodeInstance::new("Draft", Map::new()),
///     NodeInstance::new("Review", Map::new()),
///     NodeInstance::new("Draft", Map::new()),
/// ];
///
/// let found = recall_from_trace(&trace, "Draft").unwrap();
/// assert_eq!(found.id, trace[2].id);
/// assert!(recall_from_trace(&trace, "Ghost").is_none());
/// ```
pub fn recall_from_trace<'a>(trace: &'a [NodeInstance], type_name: &str) -> Option<&'a NodeInstance> {
    trace.iter().rev().find(|inst| inst.type_name == type_name)
}
