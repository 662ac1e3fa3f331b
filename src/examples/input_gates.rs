//! Input gates: a run parks on a human-approval field, a concurrent actor
//! resolves it, and the run finishes.
//!
//! Run with: cargo run --example input_gates

use std::sync::Arc;
use std::time::Duration;

use nodeflow_core::{
    FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, Notify, OutputPolicy, Registry,
    RouteSpec, RunState, SubmitOptions,
};
use nodeflow_lm::ScriptedLm;
use serde_json::{json, Map};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Draft")
            .with_doc("A drafted announcement.")
            .with_field(FieldSpec::plain("body", FieldType::Str))
            .with_route(RouteSpec::Single("Publish".into())),
    );
    table.insert(
        NodeDescriptor::new("Publish")
            .with_doc("Publish the announcement once approved.")
            .with_field(FieldSpec::gate(
                "approved",
                FieldType::Bool,
                Some("Ship this announcement?"),
            ))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Arc::new(Graph::new("Draft", &table)?);

    let registry = Registry::new();
    let notify: Notify = Arc::new(|content, _meta| println!("[event] {}", content));

    let mut fields = Map::new();
    fields.insert("body".into(), json!("nodeflow 0.1 is out"));
    let record = registry.submit(
        graph,
        fields,
        SubmitOptions::new()
            .with_lm(Arc::new(ScriptedLm::new().with_fill("Publish", json!({}))))
            .with_notify(notify)
            .with_policy(OutputPolicy::Verbose),
    )?;
    let run_id = record.run_id;

    // Wait for the run to park on its gate.
    loop {
        let gates = registry.pending_gates_for_run(&run_id);
        if let Some(gate) = gates.first() {
            println!("pending gate {}: {}", gate.gate_id, gate.schema_display());
            assert!(registry.resolve_gate(&gate.gate_id, "yes"));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Wait for the terminal transition.
    loop {
        let run = registry.get(&run_id).expect("run is tracked");
        if run.state == RunState::Done {
            println!("approved: {}", run.trace.last().unwrap().get("approved").unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
