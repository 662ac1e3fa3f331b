//! Per-run dep cache.
//!
//! One [`DepCache`] lives for exactly one run. It memoizes resolved dep
//! values by callable name, memoizes gate results per node type, and carries
//! the executor's cross-cutting injections in reserved slots: the backend,
//! the gate hook, the dep-timing hook, and the transition observer. Two runs
//! never share a cache; within one run each dep executes at most once.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::gate::GateHook;
use crate::lm::LmBackend;

/// Hook invoked after each dep resolves: `(callable_name, duration_ns)`.
pub type DepTimingHook = Arc<dyn Fn(&str, u64) + Send + Sync>;

/// Observer invoked on each executor step: `(from_node, to_node)`, where
/// `to_node` is `None` when the run terminates.
pub type TransitionHook = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

/// The per-run memoization and injection table.
#[derive(Default)]
pub struct DepCache {
    values: HashMap<String, Value>,
    gate_results: HashMap<String, Map<String, Value>>,
    lm: Option<Arc<dyn LmBackend>>,
    gate_hook: Option<Arc<dyn GateHook>>,
    dep_timing: Option<DepTimingHook>,
    transition: Option<TransitionHook>,
}

impl DepCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a dep value, e.g. an externally-owned handle the run's deps
    /// should see instead of computing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::DepCache;
    /// use serde_json::json;
    ///
    /// let cache = DepCache::new().seed("db", json!({"dsn": "sqlite://"}));
    /// assert!(cache.contains("db"));
    /// assert_eq!(cache.get("db").unwrap()["dsn"], json!("sqlite://"));
    /// ```
    pub fn seed(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub(crate) fn insert(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }

    /// Number of memoized dep values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    // Reserved slots.

    pub fn set_lm(&mut self, lm: Arc<dyn LmBackend>) {
        self.lm = Some(lm);
    }

    pub fn lm(&self) -> Option<Arc<dyn LmBackend>> {
        self.lm.clone()
    }

    pub fn set_gate_hook(&mut self, hook: Arc<dyn GateHook>) {
        self.gate_hook = Some(hook);
    }

    pub(crate) fn gate_hook(&self) -> Option<Arc<dyn GateHook>> {
        self.gate_hook.clone()
    }

    pub fn set_dep_timing_hook(&mut self, hook: DepTimingHook) {
        self.dep_timing = Some(hook);
    }

    pub(crate) fn dep_timing_hook(&self) -> Option<DepTimingHook> {
        self.dep_timing.clone()
    }

    pub fn set_transition_hook(&mut self, hook: TransitionHook) {
        self.transition = Some(hook);
    }

    pub(crate) fn transition_hook(&self) -> Option<TransitionHook> {
        self.transition.clone()
    }

    // Gate memoization, keyed by node type name. The resolver runs twice per
    // step (current side, then target side before fill); the memo keeps the
    // hook from firing twice for one node.

    pub(crate) fn gate_memo(&self, node_type: &str) -> Option<&Map<String, Value>> {
        self.gate_results.get(node_type)
    }

    pub(crate) fn memoize_gates(&mut self, node_type: String, values: Map<String, Value>) {
        self.gate_results.insert(node_type, values);
    }
}
