//! A two-node linear graph driven by the scripted backend.
//!
//! Run with: cargo run --example simple_graph

use std::sync::Arc;

use nodeflow_core::{
    FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec, RunOptions,
};
use nodeflow_lm::ScriptedLm;
use serde_json::{json, Map};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Question")
            .with_doc("The user's question.")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Single("Answer".into())),
    );
    table.insert(
        NodeDescriptor::new("Answer")
            .with_doc("Answer the question concisely.")
            .with_field(FieldSpec::plain("text", FieldType::Str))
            .with_route(RouteSpec::Terminal),
    );

    let graph = Graph::new("Question", &table)?;
    println!("{}", graph.render_call_graph());

    let lm = Arc::new(ScriptedLm::new().with_fill(
        "Answer",
        json!({"text": "A graph execution engine for agent workflows."}),
    ));

    let mut fields = Map::new();
    fields.insert("q".into(), json!("What is nodeflow?"));

    // Blocking entry point: drives a fresh runtime to completion.
    let result = graph.run(fields, RunOptions::new().with_lm(lm))?;

    for instance in &result.trace {
        println!("{}: {}", instance.type_name, instance.as_value());
    }
    Ok(())
}
