//! Input gates: fields resolved by suspending the run on a single-value
//! future.
//!
//! When the resolver meets a `gate` field it hands the node's gate field
//! specs to the [`GateHook`] installed in the run's dep cache. The registry's
//! hook creates one pending [`InputGate`] per field, parks the run in the
//! WAITING state, and completes when a concurrent actor (typically the
//! interactive shell) resolves every gate via
//! [`crate::registry::Registry::resolve_gate`].
//!
//! Gate identifiers are stable and hierarchical: `"<run_id>.<idx>"` with a
//! process-wide monotonic index, so `g3.7` names the same gate for the whole
//! life of the process.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::field::FieldType;
use crate::node::NodeDescriptor;

/// One gate field of a node, as handed to the hook.
#[derive(Clone, Debug)]
pub struct GateFieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub description: Option<String>,
}

/// Metadata of a pending input gate.
///
/// The resolving future itself is owned by the registry's pending table; this
/// struct is the shareable snapshot used for display and lookup.
#[derive(Clone, Debug)]
pub struct InputGate {
    pub gate_id: String,
    pub run_id: String,
    pub field_name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub node_type_name: String,
}

impl InputGate {
    /// Render the gate for the interactive shell's pending list:
    /// `"<field>: <type>"`, with the description appended when present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{FieldType, InputGate};
    ///
    /// let gate = InputGate {
    ///     gate_id: "g1.0".into(),
    ///     run_id: "g1".into(),
    ///     field_name: "approved".into(),
    ///     field_type: FieldType::Bool,
    ///     description: Some("Ship it?".into()),
    ///     node_type_name: "Review".into(),
    /// };
    /// assert_eq!(gate.schema_display(), "approved: bool (Ship it?)");
    /// ```
    pub fn schema_display(&self) -> String {
        match &self.description {
            Some(desc) => format!("{}: {} ({})", self.field_name, self.field_type, desc),
            None => format!("{}: {}", self.field_name, self.field_type),
        }
    }
}

/// A pending gate: metadata plus the sender half of its future.
pub(crate) struct PendingGate {
    pub meta: InputGate,
    pub sender: oneshot::Sender<Value>,
}

/// The callable the executor installs in the dep cache for gate fields.
///
/// Called once per node type per run (the resolver memoizes the result under
/// the `(node_type, gate)` composite key); returns the resolved value map
/// keyed by field name.
#[async_trait]
pub trait GateHook: Send + Sync {
    async fn open(
        &self,
        node: Arc<NodeDescriptor>,
        fields: Vec<GateFieldSpec>,
    ) -> Result<Map<String, Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(description: Option<&str>) -> InputGate {
        InputGate {
            gate_id: "g1.0".into(),
            run_id: "g1".into(),
            field_name: "approved".into(),
            field_type: FieldType::Bool,
            description: description.map(str::to_string),
            node_type_name: "Review".into(),
        }
    }

    #[test]
    fn schema_display_includes_description() {
        assert_eq!(gate(Some("OK?")).schema_display(), "approved: bool (OK?)");
    }

    #[test]
    fn schema_display_falls_back_to_field_and_type() {
        assert_eq!(gate(None).schema_display(), "approved: bool");
    }
}
