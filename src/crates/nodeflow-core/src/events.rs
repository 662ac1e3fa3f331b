//! Typed event metadata for the registry's notify channel.
//!
//! Every emitted event is a content line plus a metadata object whose `type`
//! discriminates the schema: `lifecycle`, `transition`, `timing`, `memory`,
//! `debug`, or `error`. Consumers (the interactive shell) route on the
//! metadata and print the content.

use serde_json::{json, Value};

pub(crate) fn lifecycle(event: &str, run_id: &str, elapsed_ms: Option<u64>) -> Value {
    let mut meta = json!({
        "type": "lifecycle",
        "event": event,
        "run_id": run_id,
    });
    if let Some(ms) = elapsed_ms {
        meta["elapsed_ms"] = json!(ms);
    }
    meta
}

pub(crate) fn transition(run_id: &str, from: &str, to: Option<&str>, fill_ms: Option<u64>) -> Value {
    let mut meta = json!({
        "type": "transition",
        "run_id": run_id,
        "from_node": from,
        "to_node": to,
    });
    if let Some(ms) = fill_ms {
        meta["fill_ms"] = json!(ms);
    }
    meta
}

pub(crate) fn timing(run_id: &str, node_type: &str, fill_ms: u64, dep_ms: u64) -> Value {
    json!({
        "type": "timing",
        "run_id": run_id,
        "node_type": node_type,
        "fill_ms": fill_ms,
        "dep_ms": dep_ms,
    })
}

pub(crate) fn memory(run_id: &str, rss_delta_bytes: i64) -> Value {
    json!({
        "type": "memory",
        "run_id": run_id,
        "rss_delta_bytes": rss_delta_bytes,
    })
}

pub(crate) fn debug(run_id: &str, formatted_call_graph: &str) -> Value {
    json!({
        "type": "debug",
        "run_id": run_id,
        "formatted_call_graph": formatted_call_graph,
    })
}

pub(crate) fn error(run_id: &str, error_kind: &str, message: &str) -> Value {
    json!({
        "type": "error",
        "run_id": run_id,
        "error_kind": error_kind,
        "message": message,
    })
}
