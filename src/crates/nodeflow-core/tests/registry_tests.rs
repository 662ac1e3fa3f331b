//! Registry lifecycle scenarios: gates, cancellation, archival, events.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use nodeflow_core::{
    validate_filled, Chosen, Dep, EngineError, FieldSpec, FieldType, Graph, LmBackend,
    NodeDescriptor, NodeTable, Notify, OutputPolicy, Registry, Result, RouteSpec, RunState,
    SubmitOptions,
};

struct MockLm {
    choices: Mutex<VecDeque<String>>,
    fills: Mutex<HashMap<String, Value>>,
}

impl MockLm {
    fn new() -> Self {
        Self {
            choices: Mutex::new(VecDeque::new()),
            fills: Mutex::new(HashMap::new()),
        }
    }

    fn fill_with(self, target: &str, raw: Value) -> Self {
        self.fills.lock().unwrap().insert(target.to_string(), raw);
        self
    }
}

#[async_trait]
impl LmBackend for MockLm {
    async fn choose_type(
        &self,
        candidates: &[Arc<NodeDescriptor>],
        _allows_end: bool,
        _context: &Map<String, Value>,
    ) -> Result<Chosen> {
        let name = self
            .choices
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted choice left");
        let candidate = candidates.iter().find(|c| c.name == name).unwrap();
        Ok(Chosen::Node(Arc::clone(candidate)))
    }

    async fn fill(
        &self,
        target: &Arc<NodeDescriptor>,
        _context: &Map<String, Value>,
        _instruction: &str,
    ) -> Result<Map<String, Value>> {
        let raw = self
            .fills
            .lock()
            .unwrap()
            .get(&target.name)
            .cloned()
            .unwrap_or_else(|| json!({}));
        validate_filled(target, &raw).map_err(|e| EngineError::fill(&target.name, vec![e], 1))
    }
}

fn start_fields(q: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("q".into(), json!(q));
    fields
}

fn linear_graph() -> Arc<Graph> {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Start")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Single("Middle".into())),
    );
    table.insert(
        NodeDescriptor::new("Middle")
            .with_field(FieldSpec::plain("result", FieldType::Str))
            .with_route(RouteSpec::Terminal),
    );
    Arc::new(Graph::new("Start", &table).unwrap())
}

fn gated_graph() -> Arc<Graph> {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Start")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Single("Review".into())),
    );
    table.insert(
        NodeDescriptor::new("Review")
            .with_field(FieldSpec::gate("approved", FieldType::Bool, Some("OK?")))
            .with_route(RouteSpec::Terminal),
    );
    Arc::new(Graph::new("Start", &table).unwrap())
}

/// Poll until `probe` returns true or the deadline passes.
async fn wait_for<F: Fn() -> bool>(probe: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !probe() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn capture() -> (Notify, Arc<Mutex<Vec<Value>>>) {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let notify: Notify = Arc::new(move |_content, meta| {
        sink.lock().unwrap().push(meta.clone());
    });
    (notify, seen)
}

fn lifecycle_events(seen: &Arc<Mutex<Vec<Value>>>) -> Vec<String> {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|m| m["type"] == "lifecycle")
        .map(|m| m["event"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn submitted_run_completes_with_timings() {
    let registry = Registry::new();
    let lm = Arc::new(MockLm::new().fill_with("Middle", json!({"result": "done"})));

    let record = registry
        .submit(
            linear_graph(),
            start_fields("hi"),
            SubmitOptions::new().with_lm(lm),
        )
        .unwrap();
    assert_eq!(record.run_id, "g1");
    assert_eq!(record.state, RunState::Running);
    assert!(record.end_ns.is_none());

    wait_for(
        || {
            registry
                .get("g1")
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "run g1 to finish",
    )
    .await;

    let done = registry.get("g1").unwrap();
    assert!(done.end_ns.unwrap() >= done.start_ns);
    assert_eq!(done.trace.len(), 2);
    assert_eq!(done.trace[1].get("result"), Some(&json!("done")));
    assert_eq!(done.node_timings.len(), 1, "one fill call");
    assert!(done.error.is_none());
    assert!(registry.active().is_empty());
}

#[tokio::test]
async fn gate_suspends_then_resumes_the_run() {
    let registry = Registry::new();
    let lm = Arc::new(MockLm::new());

    let record = registry
        .submit(
            gated_graph(),
            start_fields("publish?"),
            SubmitOptions::new().with_lm(lm),
        )
        .unwrap();
    let run_id = record.run_id.clone();

    wait_for(
        || {
            registry
                .get(&run_id)
                .map(|r| r.state == RunState::Waiting)
                .unwrap_or(false)
        },
        "run to park on its gate",
    )
    .await;

    let gates = registry.pending_gates_for_run(&run_id);
    assert_eq!(gates.len(), 1);
    let gate = &gates[0];
    assert_eq!(gate.gate_id, format!("{}.0", run_id));
    assert_eq!(gate.field_name, "approved");
    assert_eq!(gate.node_type_name, "Review");
    assert_eq!(gate.schema_display(), "approved: bool (OK?)");

    // Uncoercible value: gate stays pending.
    assert!(!registry.resolve_gate(&gate.gate_id, "maybe"));
    assert_eq!(registry.pending_gate_count(), 1);

    assert!(registry.resolve_gate(&gate.gate_id, "true"));
    assert_eq!(registry.pending_gate_count(), 0);

    wait_for(
        || {
            registry
                .get(&run_id)
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "run to finish after gate resolution",
    )
    .await;

    let done = registry.get(&run_id).unwrap();
    let review = done.trace.last().unwrap();
    assert_eq!(review.type_name, "Review");
    assert_eq!(review.get("approved"), Some(&json!(true)));
}

#[tokio::test]
async fn cancel_during_wait_clears_gates_and_archives() {
    let registry = Registry::new();
    let lm = Arc::new(MockLm::new());

    let record = registry
        .submit(
            gated_graph(),
            start_fields("never mind"),
            SubmitOptions::new().with_lm(lm),
        )
        .unwrap();
    let run_id = record.run_id.clone();

    wait_for(
        || {
            registry
                .get(&run_id)
                .map(|r| r.state == RunState::Waiting)
                .unwrap_or(false)
        },
        "run to park on its gate",
    )
    .await;
    assert_eq!(registry.pending_gate_count(), 1);

    assert!(registry.cancel(&run_id));
    assert_eq!(registry.pending_gate_count(), 0);

    let cancelled = registry.get(&run_id).unwrap();
    assert_eq!(cancelled.state, RunState::Cancelled);
    assert!(cancelled.end_ns.unwrap() >= cancelled.start_ns);
    // Partial trace is preserved on the record (empty here: the run was
    // still resolving its first successor).
    assert!(cancelled.trace.is_empty());
    assert!(registry.active().is_empty());

    // Cancelling again is a no-op.
    assert!(!registry.cancel(&run_id));
}

#[tokio::test]
async fn failed_run_records_error_and_partial_trace() {
    let boom = Dep::new("exploding", Vec::new(), |_| {
        Err(anyhow::anyhow!("no database today"))
    });
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Start")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Single("Fetch".into())),
    );
    table.insert(
        NodeDescriptor::new("Fetch")
            .with_field(FieldSpec::dep("rows", FieldType::Str, boom))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Arc::new(Graph::new("Start", &table).unwrap());

    let registry = Registry::new();
    let (notify, seen) = capture();
    let record = registry
        .submit(
            graph,
            start_fields("q"),
            SubmitOptions::new()
                .with_lm(Arc::new(MockLm::new()))
                .with_notify(notify)
                .with_policy(OutputPolicy::Quiet),
        )
        .unwrap();
    let run_id = record.run_id.clone();

    wait_for(
        || {
            registry
                .get(&run_id)
                .map(|r| r.state == RunState::Failed)
                .unwrap_or(false)
        },
        "run to fail",
    )
    .await;

    let failed = registry.get(&run_id).unwrap();
    let error = failed.error.unwrap();
    assert!(error.starts_with("dep:"), "{}", error);
    assert!(error.contains("no database today"));
    assert!(failed.end_ns.is_some());

    // QUIET still emits fail, and the typed error event alongside it.
    let events = lifecycle_events(&seen);
    assert_eq!(events, vec!["fail"]);
    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|m| m["type"] == "error"
        && m["error_kind"] == "dep"
        && m["run_id"] == run_id.as_str()));
}

#[tokio::test]
async fn verbose_policy_emits_transitions_and_detail() {
    let registry = Registry::new();
    let (notify, seen) = capture();
    let lm = Arc::new(MockLm::new().fill_with("Middle", json!({"result": "done"})));

    let record = registry
        .submit(
            linear_graph(),
            start_fields("hi"),
            SubmitOptions::new()
                .with_lm(lm)
                .with_notify(notify)
                .with_policy(OutputPolicy::Verbose),
        )
        .unwrap();

    wait_for(
        || {
            registry
                .get(&record.run_id)
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "run to finish",
    )
    .await;

    let events = lifecycle_events(&seen);
    assert_eq!(events.first().map(String::as_str), Some("start"));
    assert_eq!(events.last().map(String::as_str), Some("complete"));

    let seen = seen.lock().unwrap();
    let transitions: Vec<_> = seen.iter().filter(|m| m["type"] == "transition").collect();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0]["from_node"], json!("Start"));
    assert_eq!(transitions[0]["to_node"], json!("Middle"));
    assert_eq!(transitions[1]["to_node"], Value::Null);
    assert!(seen.iter().any(|m| m["type"] == "debug"
        && m["formatted_call_graph"]
            .as_str()
            .unwrap()
            .contains("Start -> Middle")));
    assert!(seen.iter().any(|m| m["type"] == "timing"));
    assert!(seen.iter().any(|m| m["type"] == "memory"));
}

#[tokio::test]
async fn silent_policy_emits_nothing() {
    let registry = Registry::new();
    let (notify, seen) = capture();
    let lm = Arc::new(MockLm::new().fill_with("Middle", json!({"result": "done"})));

    let record = registry
        .submit(
            linear_graph(),
            start_fields("hi"),
            SubmitOptions::new()
                .with_lm(lm)
                .with_notify(notify)
                .with_policy(OutputPolicy::Silent),
        )
        .unwrap();

    wait_for(
        || {
            registry
                .get(&record.run_id)
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "run to finish",
    )
    .await;

    assert!(seen.lock().unwrap().is_empty());
    // Collection is unaffected by the policy.
    let done = registry.get(&record.run_id).unwrap();
    assert_eq!(done.node_timings.len(), 1);
}

#[tokio::test]
async fn archive_evicts_beyond_capacity() {
    let registry = Registry::with_archive_capacity(2);
    let graph = {
        let mut table = NodeTable::new();
        table.insert(
            NodeDescriptor::new("Solo")
                .with_field(FieldSpec::plain("v", FieldType::Int))
                .with_route(RouteSpec::Terminal),
        );
        Arc::new(Graph::new("Solo", &table).unwrap())
    };

    // Runs are driven to completion one at a time so eviction order is
    // deterministic.
    let mut ids = Vec::new();
    for i in 0..3 {
        let mut fields = Map::new();
        fields.insert("v".into(), json!(i));
        let record = registry
            .submit(Arc::clone(&graph), fields, SubmitOptions::new())
            .unwrap();
        wait_for(|| registry.active().is_empty(), "run to finish").await;
        ids.push(record.run_id);
    }

    assert!(registry.get(&ids[0]).is_none(), "oldest record evicted");
    assert!(registry.get(&ids[1]).is_some());
    assert!(registry.get(&ids[2]).is_some());
}

#[tokio::test]
async fn submit_coro_tracks_lifecycle_only() {
    let registry = Registry::new();
    let graph = linear_graph();
    let lm: Arc<dyn LmBackend> =
        Arc::new(MockLm::new().fill_with("Middle", json!({"result": "done"})));

    let fut = {
        let graph = Arc::clone(&graph);
        async move {
            graph
                .arun(
                    start_fields("adopted"),
                    nodeflow_core::RunOptions::new().with_lm(lm),
                )
                .await
        }
    };
    let record = registry.submit_coro(fut, SubmitOptions::new());

    wait_for(
        || {
            registry
                .get(&record.run_id)
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "adopted coroutine to finish",
    )
    .await;

    let done = registry.get(&record.run_id).unwrap();
    assert_eq!(done.trace.len(), 2);
    // No timing injection on adopted coroutines.
    assert!(done.node_timings.is_empty());
}

#[tokio::test]
async fn multiple_gates_on_one_node_gather_together() {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Start")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Single("Form".into())),
    );
    table.insert(
        NodeDescriptor::new("Form")
            .with_field(FieldSpec::gate("name", FieldType::Str, Some("Your name")))
            .with_field(FieldSpec::gate("age", FieldType::Int, None))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Arc::new(Graph::new("Start", &table).unwrap());

    let registry = Registry::new();
    let record = registry
        .submit(
            graph,
            start_fields("fill the form"),
            SubmitOptions::new().with_lm(Arc::new(MockLm::new())),
        )
        .unwrap();
    let run_id = record.run_id.clone();

    wait_for(|| registry.pending_gate_count() == 2, "both gates to open").await;
    let gates = registry.pending_gates_for_run(&run_id);
    assert_eq!(gates[0].gate_id, format!("{}.0", run_id));
    assert_eq!(gates[1].gate_id, format!("{}.1", run_id));

    // Resolving one gate is not enough; the run stays parked.
    assert!(registry.resolve_gate(&gates[0].gate_id, "Ada"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.get(&run_id).unwrap().state, RunState::Waiting);

    assert!(registry.resolve_gate(&gates[1].gate_id, "36"));
    wait_for(
        || {
            registry
                .get(&run_id)
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "run to finish",
    )
    .await;

    let form = registry.get(&run_id).unwrap().trace.last().unwrap().clone();
    assert_eq!(form.get("name"), Some(&json!("Ada")));
    assert_eq!(form.get("age"), Some(&json!(36)));
}

#[tokio::test]
async fn union_runs_record_choose_and_fill_timings() {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Router")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Union {
                candidates: vec!["Left".into(), "Right".into()],
                allows_end: false,
            }),
    );
    table.insert(
        NodeDescriptor::new("Left")
            .with_field(FieldSpec::plain("out", FieldType::Str))
            .with_route(RouteSpec::Terminal),
    );
    table.insert(
        NodeDescriptor::new("Right")
            .with_field(FieldSpec::plain("out", FieldType::Str))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Arc::new(Graph::new("Router", &table).unwrap());

    let lm = MockLm::new().fill_with("Left", json!({"out": "went left"}));
    lm.choices.lock().unwrap().push_back("Left".to_string());

    let registry = Registry::new();
    let record = registry
        .submit(
            graph,
            start_fields("which way?"),
            SubmitOptions::new().with_lm(Arc::new(lm)),
        )
        .unwrap();

    wait_for(
        || {
            registry
                .get(&record.run_id)
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "run to finish",
    )
    .await;

    let done = registry.get(&record.run_id).unwrap();
    let kinds: Vec<String> = done
        .node_timings
        .iter()
        .map(|t| format!("{}:{}", t.kind, t.node_type))
        .collect();
    assert_eq!(kinds, vec!["choose:Left", "fill:Left"]);
}

#[tokio::test]
async fn dep_timings_are_collected() {
    let tick = Dep::new("tick", Vec::new(), |_| Ok(json!(1)));
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Timed")
            .with_field(FieldSpec::dep("t", FieldType::Int, tick))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Arc::new(Graph::new("Timed", &table).unwrap());

    let registry = Registry::new();
    let record = registry
        .submit(graph, Map::new(), SubmitOptions::new())
        .unwrap();

    wait_for(
        || {
            registry
                .get(&record.run_id)
                .map(|r| r.state == RunState::Done)
                .unwrap_or(false)
        },
        "run to finish",
    )
    .await;

    let done = registry.get(&record.run_id).unwrap();
    assert_eq!(done.dep_timings.len(), 1);
    assert_eq!(done.dep_timings[0].name, "tick");
}
