//! Prompt construction shared by the concrete backends.
//!
//! Both operations render the same ingredients: the resolved context values,
//! and either the target's plain-fields JSON schema (`fill`) or the candidate
//! listing (`choose_type`). The correction hint from a failed first attempt
//! is appended as one extra section.

use std::sync::Arc;

use nodeflow_core::{plain_schema, NodeDescriptor};
use serde_json::{Map, Value};

/// Build the prompt for a `fill` call.
pub fn fill_prompt(
    target: &Arc<NodeDescriptor>,
    context: &Map<String, Value>,
    instruction: &str,
    correction_hint: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Produce the next node of an executing graph.\n\n");
    prompt.push_str(&format!("Node to produce: {}\n\n", instruction));
    if !context.is_empty() {
        prompt.push_str("Context (already resolved, do not repeat):\n");
        prompt.push_str(&pretty(&Value::Object(context.clone())));
        prompt.push_str("\n\n");
    }
    prompt.push_str("Respond with a single JSON object matching this schema exactly:\n");
    prompt.push_str(&pretty(&plain_schema(target)));
    prompt.push('\n');
    if let Some(hint) = correction_hint {
        prompt.push_str(&format!(
            "\nYour previous answer failed validation: {}\nCorrect the mistake and answer again.\n",
            hint
        ));
    }
    prompt
}

/// Build the prompt for a `choose_type` call.
pub fn choose_prompt(
    candidates: &[Arc<NodeDescriptor>],
    allows_end: bool,
    context: &Map<String, Value>,
    correction_hint: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Choose the next node type for an executing graph.\n\nCandidates:\n");
    for candidate in candidates {
        match &candidate.doc {
            Some(doc) => prompt.push_str(&format!("- {}: {}\n", candidate.name, doc)),
            None => prompt.push_str(&format!("- {}\n", candidate.name)),
        }
    }
    if allows_end {
        prompt.push_str("- __end__: finish the run\n");
    }
    if !context.is_empty() {
        prompt.push_str("\nContext:\n");
        prompt.push_str(&pretty(&Value::Object(context.clone())));
        prompt.push('\n');
    }
    prompt.push_str("\nRespond with a single JSON object: {\"type\": \"<candidate name>\"}\n");
    if let Some(hint) = correction_hint {
        prompt.push_str(&format!(
            "\nYour previous answer was invalid: {}\nAnswer again.\n",
            hint
        ));
    }
    prompt
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
