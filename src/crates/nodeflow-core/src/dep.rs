//! Dep callables and the per-node-type dependency DAG.
//!
//! A [`Dep`] is a named callable that produces one field value. Deps may
//! require other deps, forming a DAG per node type: vertices are deduplicated
//! by callable name, edges read "A is required by B". The DAG is computed
//! from a node descriptor, validated acyclic at graph construction, and
//! executed level by level with each level fanned out concurrently (see
//! [`crate::resolver`]).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::field::Binding;
use crate::node::NodeDescriptor;

/// Result of one dep invocation. User callables report failures as
/// `anyhow::Error`; the resolver wraps them into `DepError`.
pub type DepResult = std::result::Result<Value, anyhow::Error>;

type SyncDepFn = dyn Fn(&Map<String, Value>) -> DepResult + Send + Sync;
type AsyncDepFn = dyn Fn(Map<String, Value>) -> BoxFuture<'static, DepResult> + Send + Sync;

enum DepBody {
    Sync(Box<SyncDepFn>),
    Async(Box<AsyncDepFn>),
}

/// A named dependency callable.
///
/// `requires` lists the deps whose resolved values are passed as arguments,
/// keyed by parameter name. Identity is the name: two deps with the same name
/// must be the same callable, and a dep runs at most once per run.
pub struct Dep {
    name: String,
    requires: Vec<(String, Arc<Dep>)>,
    body: DepBody,
}

impl Dep {
    /// A synchronous dep. The callable receives the resolved values of its
    /// required deps keyed by parameter name.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use nodeflow_core::Dep;
    /// use serde_json::json;
    ///
    /// let base = Dep::new("base", Vec::new(), |_| Ok(json!(2)));
    /// let doubled = Dep::new("doubled", vec![("n", Arc::clone(&base))], |args| {
    ///     Ok(json!(args["n"].as_i64().unwrap_or(0) * 2))
    /// });
    /// assert_eq!(doubled.name(), "doubled");
    /// assert_eq!(doubled.requires().len(), 1);
    /// ```
    pub fn new(
        name: impl Into<String>,
        requires: Vec<(&str, Arc<Dep>)>,
        f: impl Fn(&Map<String, Value>) -> DepResult + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            requires: requires
                .into_iter()
                .map(|(param, dep)| (param.to_string(), dep))
                .collect(),
            body: DepBody::Sync(Box::new(f)),
        })
    }

    /// An asynchronous dep. Awaited by the resolver.
    pub fn new_async(
        name: impl Into<String>,
        requires: Vec<(&str, Arc<Dep>)>,
        f: impl Fn(Map<String, Value>) -> BoxFuture<'static, DepResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            requires: requires
                .into_iter()
                .map(|(param, dep)| (param.to_string(), dep))
                .collect(),
            body: DepBody::Async(Box::new(f)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires(&self) -> &[(String, Arc<Dep>)] {
        &self.requires
    }

    /// Invoke the callable with its arguments already satisfied.
    pub(crate) async fn invoke(&self, args: Map<String, Value>) -> DepResult {
        match &self.body {
            DepBody::Sync(f) => f(&args),
            DepBody::Async(f) => f(args).await,
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("name", &self.name)
            .field(
                "requires",
                &self
                    .requires
                    .iter()
                    .map(|(p, d)| format!("{}={}", p, d.name()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// One recorded dep execution, collected by the registry's timing hook.
#[derive(Clone, Debug, serde::Serialize)]
pub struct DepTiming {
    pub name: String,
    pub duration_ns: u64,
}

/// The dependency DAG of one node type, layered into topological levels.
///
/// Level `i + 1` callables only start after every level `i` callable has
/// completed. Within a level, execution order is undefined.
#[derive(Clone, Debug)]
pub struct DepDag {
    levels: Vec<Vec<Arc<Dep>>>,
}

impl DepDag {
    /// Build the DAG for a node type: collect every dep reachable from the
    /// type's dep-annotated fields, deduplicate by name, and layer
    /// topologically. Rejects cycles with the path of callables forming the
    /// cycle, and name collisions between distinct callables.
    pub fn build(descriptor: &NodeDescriptor) -> std::result::Result<Self, String> {
        let mut vertices: HashMap<String, Arc<Dep>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        fn collect(
            dep: &Arc<Dep>,
            vertices: &mut HashMap<String, Arc<Dep>>,
            order: &mut Vec<String>,
            path: &mut Vec<String>,
        ) -> std::result::Result<(), String> {
            if path.iter().any(|n| n == dep.name()) {
                let mut cycle = path.clone();
                cycle.push(dep.name().to_string());
                return Err(format!("dep cycle: {}", cycle.join(" -> ")));
            }
            if let Some(existing) = vertices.get(dep.name()) {
                if !Arc::ptr_eq(existing, dep) {
                    return Err(format!(
                        "two distinct dep callables share the name '{}'",
                        dep.name()
                    ));
                }
                return Ok(());
            }
            path.push(dep.name().to_string());
            for (_, required) in dep.requires() {
                collect(required, vertices, order, path)?;
            }
            path.pop();
            vertices.insert(dep.name().to_string(), Arc::clone(dep));
            order.push(dep.name().to_string());
            Ok(())
        }

        for field in &descriptor.fields {
            if let Binding::Dep(dep) = &field.binding {
                let mut path = Vec::new();
                collect(dep, &mut vertices, &mut order, &mut path)
                    .map_err(|e| format!("node type '{}': {}", descriptor.name, e))?;
            }
        }

        // Kahn layering over the deduplicated vertex set.
        let mut remaining: HashSet<String> = vertices.keys().cloned().collect();
        let mut placed: HashSet<String> = HashSet::new();
        let mut levels: Vec<Vec<Arc<Dep>>> = Vec::new();
        while !remaining.is_empty() {
            let mut level: Vec<Arc<Dep>> = Vec::new();
            for name in &order {
                if !remaining.contains(name) {
                    continue;
                }
                let dep = &vertices[name];
                if dep
                    .requires()
                    .iter()
                    .all(|(_, required)| placed.contains(required.name()))
                {
                    level.push(Arc::clone(dep));
                }
            }
            if level.is_empty() {
                return Err(format!(
                    "node type '{}': dep graph did not reduce to levels",
                    descriptor.name
                ));
            }
            for dep in &level {
                remaining.remove(dep.name());
                placed.insert(dep.name().to_string());
            }
            levels.push(level);
        }

        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Vec<Arc<Dep>>] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total number of distinct callables in the DAG.
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}
