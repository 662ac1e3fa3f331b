//! Union routing: the backend picks the successor type, then fills it.
//!
//! Run with: cargo run --example union_routing

use std::sync::Arc;

use nodeflow_core::{
    Dep, FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec, RunOptions,
};
use nodeflow_lm::ScriptedLm;
use serde_json::{json, Map};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A dep computed once per run and shared by both branches.
    let severity = Dep::new("ticket_severity", Vec::new(), |_| Ok(json!("high")));

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Triage")
            .with_doc("Decide how to handle an incoming ticket.")
            .with_field(FieldSpec::plain("ticket", FieldType::Str))
            .with_field(FieldSpec::dep(
                "severity",
                FieldType::Str,
                Arc::clone(&severity),
            ))
            .with_route(RouteSpec::Union {
                candidates: vec!["Escalate".into(), "AutoReply".into()],
                allows_end: true,
            }),
    );
    table.insert(
        NodeDescriptor::new("Escalate")
            .with_doc("Hand the ticket to an on-call human.")
            .with_field(FieldSpec::plain("assignee", FieldType::Str))
            .with_field(FieldSpec::dep("severity", FieldType::Str, severity))
            .with_route(RouteSpec::Terminal),
    );
    table.insert(
        NodeDescriptor::new("AutoReply")
            .with_doc("Send a canned response.")
            .with_field(FieldSpec::plain("reply", FieldType::Str))
            .with_route(RouteSpec::Terminal),
    );

    let graph = Graph::new("Triage", &table)?;

    let lm = Arc::new(
        ScriptedLm::new()
            .with_choice("Escalate")
            .with_fill("Escalate", json!({"assignee": "oncall@example.com"})),
    );

    let mut fields = Map::new();
    fields.insert("ticket".into(), json!("checkout is down"));

    let result = graph.arun(fields, RunOptions::new().with_lm(lm)).await?;
    let escalation = result.result().expect("run produced a terminal node");
    println!(
        "routed to {} (severity {}, assignee {})",
        escalation.type_name,
        escalation.get("severity").unwrap(),
        escalation.get("assignee").unwrap(),
    );
    Ok(())
}
