//! End-to-end executor scenarios with a scripted backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use nodeflow_core::{
    validate_filled, Chosen, Dep, EngineError, FieldSpec, FieldType, Graph, LmBackend,
    NodeDescriptor, NodeHandler, NodeInstance, NodeTable, Result, RouteSpec, RunOptions,
    StructSchema,
};

/// Scripted backend: canned successor choices and raw fill outputs per
/// target type. Fill outputs go through the real validation path.
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

    fn choose(self, name: &str) -> Self {
        self.choices.lock().unwrap().push_back(name.to_string());
        self
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
        allows_end: bool,
        _context: &Map<String, Value>,
    ) -> Result<Chosen> {
        let name = self
            .choices
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted choice left");
        if name == "__end__" {
            assert!(allows_end, "scripted end on a union without unit");
            return Ok(Chosen::End);
        }
        let candidate = candidates
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("scripted choice '{}' not a candidate", name));
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
            .unwrap_or_else(|| panic!("no scripted fill for '{}'", target.name));
        validate_filled(target, &raw)
            .map_err(|e| EngineError::fill(&target.name, vec![e], 1))
    }
}

fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn instance(type_name: &str, pairs: &[(&str, Value)]) -> NodeInstance {
    NodeInstance::new(type_name, fields(pairs))
}

#[tokio::test]
async fn two_node_linear_run() {
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
    let graph = Graph::new("Start", &table).unwrap();

    let lm = Arc::new(MockLm::new().fill_with("Middle", json!({"result": "done"})));
    let result = graph
        .arun(fields(&[("q", json!("hi"))]), RunOptions::new().with_lm(lm))
        .await
        .unwrap();

    assert_eq!(
        result.trace,
        vec![
            instance("Start", &[("q", json!("hi"))]),
            instance("Middle", &[("result", json!("done"))]),
        ]
    );
    assert_eq!(result.result().unwrap().type_name, "Middle");
}

#[tokio::test]
async fn union_choice_takes_the_scripted_branch() {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("A")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Union {
                candidates: vec!["B".into(), "C".into()],
                allows_end: false,
            }),
    );
    table.insert(
        NodeDescriptor::new("B")
            .with_field(FieldSpec::plain("x", FieldType::Int))
            .with_route(RouteSpec::Terminal),
    );
    table.insert(
        NodeDescriptor::new("C")
            .with_field(FieldSpec::plain("y", FieldType::Str))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("A", &table).unwrap();

    let lm = Arc::new(
        MockLm::new()
            .choose("C")
            .fill_with("C", json!({"y": "z"})),
    );
    let result = graph
        .arun(fields(&[("q", json!("route me"))]), RunOptions::new().with_lm(lm))
        .await
        .unwrap();

    assert_eq!(result.trace.len(), 2);
    assert_eq!(result.trace[1], instance("C", &[("y", json!("z"))]));
}

#[tokio::test]
async fn union_may_choose_to_end() {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("A")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Union {
                candidates: vec!["B".into()],
                allows_end: true,
            }),
    );
    table.insert(
        NodeDescriptor::new("B")
            .with_field(FieldSpec::plain("x", FieldType::Int))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("A", &table).unwrap();

    let lm = Arc::new(MockLm::new().choose("__end__"));
    let result = graph
        .arun(fields(&[("q", json!("stop"))]), RunOptions::new().with_lm(lm))
        .await
        .unwrap();

    assert_eq!(result.trace.len(), 1);
    assert_eq!(result.trace[0].type_name, "A");
}

#[tokio::test]
async fn parallel_deps_resolve_concurrently() {
    fn sleepy(name: &str) -> Arc<Dep> {
        Dep::new_async(name, Vec::new(), |_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!(1))
            })
        })
    }
    let a = sleepy("dep_a");
    let b = sleepy("dep_b");
    let c = Dep::new_async(
        "dep_c",
        vec![("a", Arc::clone(&a)), ("b", Arc::clone(&b))],
        |args| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!(
                    args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)
                ))
            })
        },
    );

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("N")
            .with_field(FieldSpec::dep("a", FieldType::Int, a))
            .with_field(FieldSpec::dep("b", FieldType::Int, b))
            .with_field(FieldSpec::dep("c", FieldType::Int, c))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("N", &table).unwrap();

    let started = Instant::now();
    let result = graph.arun(Map::new(), RunOptions::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed <= Duration::from_millis(120),
        "dep levels did not overlap: {:?}",
        elapsed
    );
    assert_eq!(result.trace[0].get("c"), Some(&json!(2)));
}

#[tokio::test]
async fn dep_failure_is_fail_fast_with_empty_trace() {
    let ok = Dep::new("fine", Vec::new(), |_| Ok(json!(1)));
    let boom = Dep::new("kaboom", Vec::new(), |_| {
        Err(anyhow::anyhow!("middle dep raised"))
    });
    let slow = Dep::new_async("sluggish", Vec::new(), |_| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!(3))
        })
    });

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("N")
            .with_field(FieldSpec::dep("a", FieldType::Int, ok))
            .with_field(FieldSpec::dep("b", FieldType::Int, boom))
            .with_field(FieldSpec::dep("c", FieldType::Int, slow))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("N", &table).unwrap();

    let started = Instant::now();
    let err = graph.arun(Map::new(), RunOptions::new()).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2), "fail-fast");
    assert_eq!(err.kind_name(), "dep");
    assert!(err.trace.is_empty(), "failure on the first node");
    assert!(err.to_string().contains("middle dep raised"));
}

#[tokio::test]
async fn recall_field_pulls_most_recent_instance_and_is_hidden_from_fill() {
    struct ContextSpy {
        inner: MockLm,
        seen: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl LmBackend for ContextSpy {
        async fn choose_type(
            &self,
            candidates: &[Arc<NodeDescriptor>],
            allows_end: bool,
            context: &Map<String, Value>,
        ) -> Result<Chosen> {
            self.inner.choose_type(candidates, allows_end, context).await
        }

        async fn fill(
            &self,
            target: &Arc<NodeDescriptor>,
            context: &Map<String, Value>,
            instruction: &str,
        ) -> Result<Map<String, Value>> {
            self.seen
                .lock()
                .unwrap()
                .push(context.keys().cloned().collect());
            self.inner.fill(target, context, instruction).await
        }
    }

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Question")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Single("Answer".into())),
    );
    table.insert(
        NodeDescriptor::new("Answer")
            .with_field(FieldSpec::recall("question", FieldType::Node("Question".into())))
            .with_field(FieldSpec::plain("text", FieldType::Str))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("Question", &table).unwrap();

    let lm = Arc::new(ContextSpy {
        inner: MockLm::new().fill_with("Answer", json!({"text": "42"})),
        seen: Mutex::new(Vec::new()),
    });
    let result = graph
        .arun(
            fields(&[("q", json!("meaning of life?"))]),
            RunOptions::new().with_lm(Arc::clone(&lm) as Arc<dyn LmBackend>),
        )
        .await
        .unwrap();

    let answer = &result.trace[1];
    assert_eq!(answer.get("question").unwrap()["q"], json!("meaning of life?"));

    let seen = lm.seen.lock().unwrap();
    assert!(
        seen.iter().all(|keys| !keys.contains(&"question".to_string())),
        "recall values must not reach fill: {:?}",
        seen
    );
}

#[tokio::test]
async fn recall_miss_fails_with_partial_trace() {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Start")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_route(RouteSpec::Single("Needy".into())),
    );
    table.insert(
        NodeDescriptor::new("Needy")
            .with_field(FieldSpec::recall("ghost", FieldType::Node("Ghost".into())))
            .with_route(RouteSpec::Terminal),
    );
    // Ghost is never produced; register it so construction succeeds.
    table.insert(NodeDescriptor::new("Ghost").with_route(RouteSpec::Terminal));
    let graph = Graph::new("Start", &table).unwrap();

    let lm = Arc::new(MockLm::new().fill_with("Needy", json!({})));
    let err = graph
        .arun(fields(&[("q", json!("x"))]), RunOptions::new().with_lm(lm))
        .await
        .unwrap_err();

    assert_eq!(err.kind_name(), "recall");
    assert!(err.trace.is_empty(), "target-side resolve precedes append");
}

#[tokio::test]
async fn nested_struct_fields_stay_structured() {
    let citation = Arc::new(StructSchema {
        name: "Citation".into(),
        doc: Some("Where the claim came from.".into()),
        fields: vec![
            ("url".into(), FieldType::Str),
            ("page".into(), FieldType::Int),
        ],
    });

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Start")
            .with_field(FieldSpec::plain("topic", FieldType::Str))
            .with_route(RouteSpec::Single("Cited".into())),
    );
    table.insert(
        NodeDescriptor::new("Cited")
            .with_field(FieldSpec::plain("claim", FieldType::Str))
            .with_field(FieldSpec::plain("source", FieldType::Struct(citation)))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("Start", &table).unwrap();

    let lm = Arc::new(MockLm::new().fill_with(
        "Cited",
        json!({
            "claim": "rust is fast",
            "source": {"url": "https://example.com/bench", "page": 12},
        }),
    ));
    let result = graph
        .arun(fields(&[("topic", json!("perf"))]), RunOptions::new().with_lm(lm))
        .await
        .unwrap();

    let cited = &result.trace[1];
    let source = cited.get("source").unwrap();
    assert!(source.is_object(), "nested value flattened: {:?}", source);
    assert_eq!(source["url"], json!("https://example.com/bench"));
    assert_eq!(source["page"], json!(12));
}

#[tokio::test]
async fn escape_hatch_runs_user_logic() {
    struct DoubleDown;

    #[async_trait]
    impl NodeHandler for DoubleDown {
        async fn call(
            &self,
            node: &NodeInstance,
            _resolved: &Map<String, Value>,
            lm: Option<Arc<dyn LmBackend>>,
        ) -> std::result::Result<Option<NodeInstance>, anyhow::Error> {
            assert!(lm.is_none(), "handler did not ask for a backend");
            let n = node.get("n").and_then(Value::as_i64).unwrap_or(0);
            if n >= 8 {
                return Ok(None);
            }
            let mut fields = Map::new();
            fields.insert("n".into(), json!(n * 2));
            Ok(Some(NodeInstance::new("Doubler", fields)))
        }
    }

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Doubler")
            .with_field(FieldSpec::plain("n", FieldType::Int))
            .with_route(RouteSpec::Single("Doubler".into()))
            .with_handler(false, Arc::new(DoubleDown)),
    );
    let graph = Graph::new("Doubler", &table).unwrap();

    let result = graph
        .arun(fields(&[("n", json!(1))]), RunOptions::new())
        .await
        .unwrap();

    let ns: Vec<i64> = result
        .trace
        .iter()
        .map(|i| i.get("n").and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(ns, vec![1, 2, 4, 8]);
}

#[tokio::test]
async fn escape_hatch_errors_pass_through_with_trace() {
    struct Grenade;

    #[async_trait]
    impl NodeHandler for Grenade {
        async fn call(
            &self,
            _node: &NodeInstance,
            _resolved: &Map<String, Value>,
            _lm: Option<Arc<dyn LmBackend>>,
        ) -> std::result::Result<Option<NodeInstance>, anyhow::Error> {
            Err(anyhow::anyhow!("user code exploded"))
        }
    }

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Booby")
            .with_route(RouteSpec::Terminal)
            .with_handler(false, Arc::new(Grenade)),
    );
    let graph = Graph::new("Booby", &table).unwrap();

    let err = graph.arun(Map::new(), RunOptions::new()).await.unwrap_err();
    assert_eq!(err.kind_name(), "handler");
    assert!(err.to_string().contains("user code exploded"));
    assert!(err.trace.is_empty());
}

#[tokio::test]
async fn max_iters_stops_runaway_loops() {
    struct Forever;

    #[async_trait]
    impl NodeHandler for Forever {
        async fn call(
            &self,
            _node: &NodeInstance,
            _resolved: &Map<String, Value>,
            _lm: Option<Arc<dyn LmBackend>>,
        ) -> std::result::Result<Option<NodeInstance>, anyhow::Error> {
            Ok(Some(NodeInstance::new("Loop", Map::new())))
        }
    }

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Loop")
            .with_route(RouteSpec::Single("Loop".into()))
            .with_handler(false, Arc::new(Forever)),
    );
    let graph = Graph::new("Loop", &table).unwrap();

    let err = graph
        .arun(Map::new(), RunOptions::new().with_max_iters(3))
        .await
        .unwrap_err();
    assert_eq!(err.kind_name(), "max-iters");
    assert_eq!(err.trace.len(), 3);
}

#[tokio::test]
async fn max_iters_one_allows_a_terminal_step() {
    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Solo")
            .with_field(FieldSpec::plain("v", FieldType::Int))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("Solo", &table).unwrap();

    let result = graph
        .arun(fields(&[("v", json!(1))]), RunOptions::new().with_max_iters(1))
        .await
        .unwrap();
    assert_eq!(result.trace.len(), 1);
}

#[tokio::test]
async fn dep_callables_run_once_across_both_resolve_sides() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let shared = Dep::new("shared_ctx", Vec::new(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!("ctx"))
    });

    let mut table = NodeTable::new();
    table.insert(
        NodeDescriptor::new("Start")
            .with_field(FieldSpec::plain("q", FieldType::Str))
            .with_field(FieldSpec::dep("ctx", FieldType::Str, Arc::clone(&shared)))
            .with_route(RouteSpec::Single("End".into())),
    );
    table.insert(
        NodeDescriptor::new("End")
            .with_field(FieldSpec::plain("out", FieldType::Str))
            .with_field(FieldSpec::dep("ctx", FieldType::Str, shared))
            .with_route(RouteSpec::Terminal),
    );
    let graph = Graph::new("Start", &table).unwrap();

    let lm = Arc::new(MockLm::new().fill_with("End", json!({"out": "done"})));
    graph
        .arun(fields(&[("q", json!("hi"))]), RunOptions::new().with_lm(lm))
        .await
        .unwrap();

    assert_eq!(
        calls.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "shared dep memoized across current-side and target-side resolution"
    );
}
