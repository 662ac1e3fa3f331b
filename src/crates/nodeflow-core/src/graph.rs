//! Graph construction and the run entry points.
//!
//! A [`Graph`] is derived from a start node type by transitive-closure
//! discovery over declared successor routes. Construction validates the
//! whole reachable set up front: every successor must be registered, every
//! dep DAG must be acyclic, every recall field must name a node type. Runs
//! only ever see a validated graph.
//!
//! The graph is the factory surface of the engine: it introspects the start
//! type's plain-field schema, constructs the start instance from
//! caller-supplied field values, and exposes blocking ([`Graph::run`]) and
//! awaitable ([`Graph::arun`]) execution.
//!
//! # Quick Start
//!
//! A single-node graph needs no backend and runs to completion directly:
//!
//! ```rust
//! use nodeflow_core::{
//!     FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec, RunOptions,
//! };
//! use serde_json::{json, Map};
//!
//! let mut table = NodeTable::new();
//! table.insert(
//!     NodeDescriptor::new("Echo")
//!         .with_field(FieldSpec::plain("text", FieldType::Str))
//!         .with_route(RouteSpec::Terminal),
//! );
//!
//! let graph = Graph::new("Echo", &table).unwrap();
//!
//! let mut fields = Map::new();
//! fields.insert("text".into(), json!("hello"));
//! let result = graph.run(fields, RunOptions::new()).unwrap();
//!
//! assert_eq!(result.trace.len(), 1);
//! assert_eq!(result.result().unwrap().get("text"), Some(&json!("hello")));
//! ```
//!
//! Multi-node graphs advance by backend calls; wire one in through
//! [`RunOptions::with_lm`]:
//!
//! ```rust,ignore
//! let result = graph
//!     .run(fields, RunOptions::new().with_lm(backend).with_max_iters(25))?;
//! ```
//!
//! # Construction Guarantees
//!
//! [`Graph::new`] rejects, before any run starts:
//!
//! - a start type missing from the [`NodeTable`]
//! - a route naming an unregistered successor type
//! - an empty union route
//! - a dep cycle, or two distinct dep callables sharing a name
//! - a recall field whose declared type is not a node type

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::DepCache;
use crate::dep::DepDag;
use crate::error::{EngineError, Result};
use crate::executor;
use crate::field::{FieldKind, FieldType};
use crate::lm::LmBackend;
use crate::node::{NodeDescriptor, NodeInstance, NodeTable, RouteSpec, Trace};
use crate::schema::plain_schema;

/// Default per-run step limit.
pub const DEFAULT_MAX_ITERS: usize = 10;

/// Per-run options for the direct entry points and for registry submission.
///
/// # Examples
///
/// ```rust
/// use nodeflow_core::{DepCache, RunOptions, DEFAULT_MAX_ITERS};
/// use serde_json::json;
///
/// let opts = RunOptions::new()
///     .with_max_iters(25)
///     .with_cache(DepCache::new().seed("db", json!({"dsn": "sqlite://"})));
///
/// assert_eq!(opts.max_iters, 25);
/// assert!(opts.cache.contains("db"));
/// assert_eq!(RunOptions::new().max_iters, DEFAULT_MAX_ITERS);
/// ```
pub struct RunOptions {
    pub lm: Option<Arc<dyn LmBackend>>,
    pub max_iters: usize,
    pub cache: DepCache,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            lm: None,
            max_iters: DEFAULT_MAX_ITERS,
            cache: DepCache::new(),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend used for `choose_type` and `fill` on auto-routed
    /// nodes. Runs over graphs with only terminal or escape-hatch nodes work
    /// without one.
    pub fn with_lm(mut self, lm: Arc<dyn LmBackend>) -> Self {
        self.lm = Some(lm);
        self
    }

    /// Set the step limit guarding against runaway routing loops.
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Pre-seed the run's dep cache, e.g. with an externally-owned handle.
    pub fn with_cache(mut self, cache: DepCache) -> Self {
        self.cache = cache;
        self
    }
}

/// The outcome of a completed run: the full trace, terminal instance last.
///
/// # Examples
///
/// ```rust
/// use nodeflow_core::{GraphResult, NodeInstance};
/// use serde_json::Map;
///
/// let result = GraphResult {
///     trace: vec![NodeInstance::new("Done", Map::new())],
/// };
/// assert_eq!(result.result().unwrap().type_name, "Done");
/// ```
#[derive(Debug)]
pub struct GraphResult {
    pub trace: Trace,
}

impl GraphResult {
    /// The terminal instance, i.e. the run result.
    pub fn result(&self) -> Option<&NodeInstance> {
        self.trace.last()
    }
}

/// A validated, executable node graph.
///
/// Built once via [`Graph::new`], then shared (it is cheap to clone) across
/// any number of runs. Each run gets its own dep cache and trace; the graph
/// itself is immutable.
#[derive(Clone, Debug)]
pub struct Graph {
    start: Arc<NodeDescriptor>,
    nodes: HashMap<String, Arc<NodeDescriptor>>,
    order: Vec<String>,
    edges: HashMap<String, Vec<String>>,
    terminals: Vec<String>,
}

impl Graph {
    /// Discover and validate the graph reachable from `start`.
    ///
    /// Walks the start type's route, then every successor's route, until the
    /// reachable set is closed. Each discovered node is validated on the
    /// way: routes must name registered types, unions must be non-empty,
    /// recall fields must declare node types, and the per-type dep DAG must
    /// be acyclic with unique callable names.
    ///
    /// # Arguments
    ///
    /// * `start` - name of the start node type
    /// * `table` - the descriptor table to discover against
    ///
    /// # Errors
    ///
    /// Every rejection is a `Construction` error naming the offending node
    /// type; nothing has executed when construction fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{Graph, NodeDescriptor, NodeTable, RouteSpec};
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(NodeDescriptor::new("Start").with_route(RouteSpec::Single("End".into())));
    /// table.insert(NodeDescriptor::new("End").with_route(RouteSpec::Terminal));
    ///
    /// let graph = Graph::new("Start", &table).unwrap();
    /// assert_eq!(graph.nodes(), &["Start", "End"]);
    /// assert_eq!(graph.terminals(), &["End"]);
    /// assert_eq!(graph.edges()["Start"], vec!["End"]);
    /// ```
    ///
    /// An unregistered successor is rejected with context:
    ///
    /// ```rust
    /// use nodeflow_core::{Graph, NodeDescriptor, NodeTable, RouteSpec};
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(NodeDescriptor::new("Start").with_route(RouteSpec::Single("Ghost".into())));
    ///
    /// let err = Graph::new("Start", &table).unwrap_err();
    /// assert_eq!(err.kind_name(), "construction");
    /// assert!(err.to_string().contains("unregistered type 'Ghost'"));
    /// ```
    pub fn new(start: &str, table: &NodeTable) -> Result<Self> {
        let start_descriptor = table
            .get(start)
            .ok_or_else(|| {
                EngineError::construction(format!(
                    "start type '{}' is not registered in the node table",
                    start
                ))
            })?
            .clone();

        let mut nodes: HashMap<String, Arc<NodeDescriptor>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut terminals: Vec<String> = Vec::new();
        let mut queue: VecDeque<Arc<NodeDescriptor>> = VecDeque::new();
        queue.push_back(Arc::clone(&start_descriptor));

        while let Some(descriptor) = queue.pop_front() {
            if nodes.contains_key(&descriptor.name) {
                continue;
            }
            validate_node(&descriptor)?;

            let successors: Vec<String> = descriptor
                .route
                .successors()
                .iter()
                .map(|s| s.to_string())
                .collect();
            for successor in &successors {
                let next = table.get(successor).ok_or_else(|| {
                    EngineError::construction(format!(
                        "node type '{}' routes to unregistered type '{}'",
                        descriptor.name, successor
                    ))
                })?;
                queue.push_back(Arc::clone(next));
            }

            if matches!(descriptor.route, RouteSpec::Terminal) {
                terminals.push(descriptor.name.clone());
            }
            edges.insert(descriptor.name.clone(), successors);
            order.push(descriptor.name.clone());
            nodes.insert(descriptor.name.clone(), descriptor);
        }

        debug!(
            start = %start_descriptor.name,
            nodes = nodes.len(),
            terminals = terminals.len(),
            "graph constructed"
        );
        Ok(Self {
            start: start_descriptor,
            nodes,
            order,
            edges,
            terminals,
        })
    }

    pub fn start(&self) -> &Arc<NodeDescriptor> {
        &self.start
    }

    pub fn node(&self, name: &str) -> Option<&Arc<NodeDescriptor>> {
        self.nodes.get(name)
    }

    /// Node type names in discovery order.
    pub fn nodes(&self) -> &[String] {
        &self.order
    }

    /// Successor edges per node type.
    pub fn edges(&self) -> &HashMap<String, Vec<String>> {
        &self.edges
    }

    /// Node types with a unit return type.
    pub fn terminals(&self) -> &[String] {
        &self.terminals
    }

    /// JSON schema of the start type's caller-supplied fields.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec};
    /// use serde_json::json;
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(
    ///     NodeDescriptor::new("Ask")
    ///         .with_field(FieldSpec::plain("q", FieldType::Str))
    ///         .with_route(RouteSpec::Terminal),
    /// );
    ///
    /// let graph = Graph::new("Ask", &table).unwrap();
    /// let schema = graph.start_schema();
    /// assert_eq!(schema["title"], json!("Ask"));
    /// assert_eq!(schema["required"], json!(["q"]));
    /// ```
    pub fn start_schema(&self) -> Value {
        plain_schema(&self.start)
    }

    /// Render the node set and edges as an indented adjacency listing, used
    /// by the registry's `debug` event.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{Graph, NodeDescriptor, NodeTable, RouteSpec};
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(NodeDescriptor::new("Start").with_route(RouteSpec::Single("End".into())));
    /// table.insert(NodeDescriptor::new("End").with_route(RouteSpec::Terminal));
    ///
    /// let rendered = Graph::new("Start", &table).unwrap().render_call_graph();
    /// assert!(rendered.contains("Start -> End"));
    /// assert!(rendered.contains("End -> __end__"));
    /// ```
    pub fn render_call_graph(&self) -> String {
        let mut out = String::new();
        for name in &self.order {
            let descriptor = &self.nodes[name];
            let successors = &self.edges[name];
            let arrow = match &descriptor.route {
                RouteSpec::Terminal => "__end__".to_string(),
                RouteSpec::Single(_) => successors.join(" | "),
                RouteSpec::Union { allows_end, .. } => {
                    let mut parts = successors.clone();
                    if *allows_end {
                        parts.push("__end__".to_string());
                    }
                    parts.join(" | ")
                }
            };
            let _ = writeln!(out, "{} -> {}", name, arrow);
        }
        out
    }

    /// Construct the start instance from caller-supplied plain-field values.
    ///
    /// Unknown keys and type mismatches are rejected; dep, recall, and gate
    /// fields of the start type are resolved by the run itself and must not
    /// be supplied here.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec};
    /// use serde_json::{json, Map};
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(
    ///     NodeDescriptor::new("Ask")
    ///         .with_field(FieldSpec::plain("q", FieldType::Str))
    ///         .with_route(RouteSpec::Terminal),
    /// );
    /// let graph = Graph::new("Ask", &table).unwrap();
    ///
    /// let mut fields = Map::new();
    /// fields.insert("q".into(), json!("why?"));
    /// let start = graph.start_instance(fields).unwrap();
    /// assert_eq!(start.get("q"), Some(&json!("why?")));
    ///
    /// // A type mismatch is a construction error.
    /// let mut wrong = Map::new();
    /// wrong.insert("q".into(), json!(42));
    /// assert_eq!(graph.start_instance(wrong).unwrap_err().kind_name(), "construction");
    /// ```
    pub fn start_instance(&self, fields: Map<String, Value>) -> Result<NodeInstance> {
        for key in fields.keys() {
            match self.start.field(key) {
                Some(spec) if spec.kind() == FieldKind::Plain => {}
                Some(spec) => {
                    return Err(EngineError::construction(format!(
                        "start field '{}' is a {} field and is resolved by the run, not supplied",
                        key,
                        spec.kind()
                    )))
                }
                None => {
                    return Err(EngineError::construction(format!(
                        "start type '{}' has no field '{}'",
                        self.start.name, key
                    )))
                }
            }
        }

        let mut values = Map::new();
        for spec in self.start.plain_fields() {
            match fields.get(&spec.name) {
                Some(value) => {
                    spec.ty.validate(value).map_err(|e| {
                        EngineError::construction(format!(
                            "start field '{}': {}",
                            spec.name, e
                        ))
                    })?;
                    values.insert(spec.name.clone(), value.clone());
                }
                None if matches!(spec.ty, FieldType::Optional(_)) => {
                    values.insert(spec.name.clone(), Value::Null);
                }
                None => {
                    return Err(EngineError::construction(format!(
                        "start type '{}' requires field '{}' ({})",
                        self.start.name, spec.name, spec.ty
                    )))
                }
            }
        }
        Ok(NodeInstance::new(self.start.name.clone(), values))
    }

    /// Execute the graph to completion from an already-running async context.
    ///
    /// The awaitable twin of [`Graph::run`]: use it from the shared event
    /// loop (the interactive shell, the registry, another coroutine). The
    /// returned future is also what [`crate::Registry::submit_coro`] adopts.
    ///
    /// # Errors
    ///
    /// Any engine error, with the partial trace attached; see
    /// [`crate::ErrorKind`] for the taxonomy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{
    ///     FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec, RunOptions,
    /// };
    /// use serde_json::{json, Map};
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(
    ///     NodeDescriptor::new("Echo")
    ///         .with_field(FieldSpec::plain("text", FieldType::Str))
    ///         .with_route(RouteSpec::Terminal),
    /// );
    /// let graph = Graph::new("Echo", &table).unwrap();
    ///
    /// let runtime = tokio::runtime::Runtime::new().unwrap();
    /// let result = runtime.block_on(async {
    ///     let mut fields = Map::new();
    ///     fields.insert("text".into(), json!("hi"));
    ///     graph.arun(fields, RunOptions::new()).await.unwrap()
    /// });
    /// assert_eq!(result.trace.len(), 1);
    /// ```
    pub async fn arun(&self, fields: Map<String, Value>, opts: RunOptions) -> Result<GraphResult> {
        let start = self.start_instance(fields)?;
        executor::run_graph(self, start, opts, None).await
    }

    /// Execute the graph on a fresh single-threaded runtime, blocking until
    /// completion.
    ///
    /// # Errors
    ///
    /// Fails with a `Construction` error when called from within an async
    /// runtime (use [`Graph::arun`] there), and otherwise propagates any
    /// engine error with the partial trace attached.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{
    ///     FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec, RunOptions,
    /// };
    /// use serde_json::{json, Map};
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(
    ///     NodeDescriptor::new("Echo")
    ///         .with_field(FieldSpec::plain("text", FieldType::Str))
    ///         .with_route(RouteSpec::Terminal),
    /// );
    /// let graph = Graph::new("Echo", &table).unwrap();
    ///
    /// let mut fields = Map::new();
    /// fields.insert("text".into(), json!("hello"));
    /// let result = graph.run(fields, RunOptions::new()).unwrap();
    ///
    /// assert_eq!(result.result().unwrap().get("text"), Some(&json!("hello")));
    /// ```
    pub fn run(&self, fields: Map<String, Value>, opts: RunOptions) -> Result<GraphResult> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(EngineError::construction(
                "Graph::run cannot be called from within an async runtime; use Graph::arun",
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::construction(format!("failed to build runtime: {}", e)))?;
        runtime.block_on(self.arun(fields, opts))
    }

    /// Registry entry point: run a pre-built start instance, mirroring trace
    /// appends into `shared` so partial traces survive failure and abort.
    pub(crate) async fn arun_shared(
        &self,
        start: NodeInstance,
        opts: RunOptions,
        shared: executor::SharedTrace,
    ) -> Result<GraphResult> {
        executor::run_graph(self, start, opts, Some(shared)).await
    }
}

fn validate_node(descriptor: &Arc<NodeDescriptor>) -> Result<()> {
    if let RouteSpec::Union { candidates, .. } = &descriptor.route {
        if candidates.is_empty() {
            return Err(EngineError::construction(format!(
                "node type '{}' declares an empty union route",
                descriptor.name
            )));
        }
    }
    for field in descriptor.fields.iter().filter(|f| !f.is_internal()) {
        if field.kind() == FieldKind::Recall && !matches!(field.ty.base(), FieldType::Node(_)) {
            return Err(EngineError::construction(format!(
                "recall field '{}.{}' must declare a node type, not {}",
                descriptor.name, field.name, field.ty
            )));
        }
    }
    DepDag::build(descriptor).map_err(EngineError::construction)?;
    Ok(())
}
