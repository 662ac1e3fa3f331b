//! The run registry: lifecycle tracking for concurrent graph runs.
//!
//! The registry owns every run record. A submitted run moves through
//!
//! ```text
//!             submit
//!                │
//!                ▼
//!            ┌─────────┐  gate pending   ┌─────────┐
//!            │ RUNNING │ ───────────────▶│ WAITING │
//!            │         │◀─── all resolved│         │
//!            └─┬───┬───┘                 └────┬────┘
//!    complete  │   │  fail/cancel             │ cancel
//!              ▼   ▼                          ▼
//!            DONE  FAILED/CANCELLED    CANCELLED
//! ```
//!
//! and is archived into a bounded ring on its terminal transition. The
//! registry also owns the pending-gate table, wraps every submitted backend
//! in a [`TimingLm`], samples the resident-set delta around the run, and
//! emits lifecycle events through the injectable `notify` callback, gated by
//! the per-run [`OutputPolicy`].
//!
//! All tables are event-loop-owned: locks are held only for plain mutation,
//! never across an await.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::DepCache;
use crate::dep::DepTiming;
use crate::error::{EngineError, Result};
use crate::events;
use crate::executor::SharedTrace;
use crate::gate::{GateFieldSpec, GateHook, InputGate, PendingGate};
use crate::graph::{Graph, GraphResult, RunOptions, DEFAULT_MAX_ITERS};
use crate::lm::{LmBackend, LmCallKind, LmTiming, TimingLm, TimingSink};
use crate::node::{NodeDescriptor, Trace};
use crate::rss::max_rss_bytes;

/// Default size of the archive ring.
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 20;

/// Lifecycle state of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Waiting,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Cancelled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunState::Running => "running",
            RunState::Waiting => "waiting",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        })
    }
}

/// Per-run verbosity gating which lifecycle events reach `notify`.
///
/// Gates emission only: timings and memory are always collected into the run
/// record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputPolicy {
    Verbose,
    #[default]
    Normal,
    Quiet,
    Silent,
}

impl OutputPolicy {
    fn allows_lifecycle(&self, event: &str) -> bool {
        match self {
            OutputPolicy::Silent => false,
            OutputPolicy::Quiet => matches!(
                event,
                "fail" | "cancel" | "gate-waiting" | "gate-resolved"
            ),
            OutputPolicy::Normal => matches!(
                event,
                "fail" | "cancel" | "gate-waiting" | "gate-resolved" | "start" | "complete"
            ),
            OutputPolicy::Verbose => true,
        }
    }

    fn allows_transitions(&self) -> bool {
        matches!(self, OutputPolicy::Verbose)
    }

    fn allows_detail(&self) -> bool {
        matches!(self, OutputPolicy::Verbose)
    }
}

/// Event callback: `(content, metadata)`.
pub type Notify = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Options for [`Registry::submit`].
pub struct SubmitOptions {
    pub lm: Option<Arc<dyn LmBackend>>,
    pub cache: DepCache,
    pub max_iters: usize,
    pub policy: OutputPolicy,
    pub notify: Option<Notify>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            lm: None,
            cache: DepCache::new(),
            max_iters: DEFAULT_MAX_ITERS,
            policy: OutputPolicy::default(),
            notify: None,
        }
    }
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lm(mut self, lm: Arc<dyn LmBackend>) -> Self {
        self.lm = Some(lm);
        self
    }

    pub fn with_cache(mut self, cache: DepCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_policy(mut self, policy: OutputPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notify(mut self, notify: Notify) -> Self {
        self.notify = Some(notify);
        self
    }
}

/// The metadata object describing one run's lifecycle, timings, and outcome.
///
/// `end_ns` is set exactly when the state is terminal. The trace is filled on
/// the terminal transition; live snapshots from [`Registry::get`] carry the
/// partial trace gathered so far. Serializable so an inspect surface can
/// render it directly.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub state: RunState,
    pub start_ns: u64,
    pub end_ns: Option<u64>,
    pub current_node: Option<String>,
    pub node_timings: Vec<LmTiming>,
    pub dep_timings: Vec<DepTiming>,
    pub rss_delta_bytes: i64,
    pub error: Option<String>,
    pub trace: Trace,
}

impl RunRecord {
    fn new(run_id: String, current_node: Option<String>) -> Self {
        Self {
            run_id,
            state: RunState::Running,
            start_ns: now_ns(),
            end_ns: None,
            current_node,
            node_timings: Vec::new(),
            dep_timings: Vec::new(),
            rss_delta_bytes: 0,
            error: None,
            trace: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> Option<u64> {
        self.end_ns
            .map(|end| end.saturating_sub(self.start_ns) / 1_000_000)
    }
}

struct RunEntry {
    record: RunRecord,
    shared_trace: SharedTrace,
    timing_sink: TimingSink,
    dep_timings: Arc<Mutex<Vec<DepTiming>>>,
    notify: Option<Notify>,
    policy: OutputPolicy,
    rss_before: i64,
    handle: Option<JoinHandle<()>>,
}

impl RunEntry {
    fn snapshot(&self) -> RunRecord {
        let mut record = self.record.clone();
        record.trace = lock_clone(&self.shared_trace);
        record.node_timings = lock_clone(&self.timing_sink);
        record.dep_timings = lock_clone(&self.dep_timings);
        record
    }
}

struct RegistryInner {
    active: Mutex<HashMap<String, RunEntry>>,
    archive: Mutex<VecDeque<RunRecord>>,
    pending_gates: Mutex<HashMap<String, PendingGate>>,
    run_seq: AtomicU64,
    gate_seq: AtomicU64,
    archive_capacity: usize,
}

/// The owned registry object, cheap to clone and share.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_archive_capacity(DEFAULT_ARCHIVE_CAPACITY)
    }

    pub fn with_archive_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                active: Mutex::new(HashMap::new()),
                archive: Mutex::new(VecDeque::new()),
                pending_gates: Mutex::new(HashMap::new()),
                run_seq: AtomicU64::new(0),
                gate_seq: AtomicU64::new(0),
                archive_capacity: capacity,
            }),
        }
    }

    /// Submit a graph run. Wraps the backend in a fresh [`TimingLm`],
    /// installs the gate and timing hooks, spawns the driving task, and
    /// returns the initial run record.
    ///
    /// Must be called from within the shared async runtime.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// use nodeflow_core::{
    ///     Graph, NodeDescriptor, NodeTable, Registry, RouteSpec, RunState, SubmitOptions,
    /// };
    /// use serde_json::Map;
    ///
    /// let mut table = NodeTable::new();
    /// table.insert(NodeDescriptor::new("Solo").with_route(RouteSpec::Terminal));
    /// let graph = Arc::new(Graph::new("Solo", &table).unwrap());
    ///
    /// let runtime = tokio::runtime::Runtime::new().unwrap();
    /// runtime.block_on(async {
    ///     let registry = Registry::new();
    ///     let record = registry
    ///         .submit(graph, Map::new(), SubmitOptions::new())
    ///         .unwrap();
    ///     assert_eq!(record.run_id, "g1");
    ///     assert_eq!(record.state, RunState::Running);
    ///
    ///     // The driving task completes on its own; poll until archived.
    ///     while registry.get(&record.run_id).unwrap().state != RunState::Done {
    ///         tokio::time::sleep(Duration::from_millis(5)).await;
    ///     }
    ///     assert_eq!(registry.get(&record.run_id).unwrap().trace.len(), 1);
    /// });
    /// ```
    pub fn submit(
        &self,
        graph: Arc<Graph>,
        start_fields: Map<String, Value>,
        opts: SubmitOptions,
    ) -> Result<RunRecord> {
        let start = graph.start_instance(start_fields)?;
        let run_id = self.next_run_id();

        let timing_sink: TimingSink = Arc::new(Mutex::new(Vec::new()));
        let dep_timings: Arc<Mutex<Vec<DepTiming>>> = Arc::new(Mutex::new(Vec::new()));
        let shared_trace: SharedTrace = Arc::new(Mutex::new(Vec::new()));

        let mut cache = opts.cache;
        let lm: Option<Arc<dyn LmBackend>> = opts.lm.map(|backend| {
            Arc::new(TimingLm::new(backend, Arc::clone(&timing_sink))) as Arc<dyn LmBackend>
        });
        cache.set_gate_hook(Arc::new(RegistryGateHook {
            inner: Arc::clone(&self.inner),
            run_id: run_id.clone(),
        }));
        {
            let sink = Arc::clone(&dep_timings);
            cache.set_dep_timing_hook(Arc::new(move |name, duration_ns| {
                if let Ok(mut entries) = sink.lock() {
                    entries.push(DepTiming {
                        name: name.to_string(),
                        duration_ns,
                    });
                }
            }));
        }
        {
            let inner = Arc::clone(&self.inner);
            let run_id = run_id.clone();
            cache.set_transition_hook(Arc::new(move |from, to| {
                inner.on_transition(&run_id, from, to);
            }));
        }

        let record = RunRecord::new(run_id.clone(), Some(graph.start().name.clone()));
        let snapshot = record.clone();
        let entry = RunEntry {
            record,
            shared_trace: Arc::clone(&shared_trace),
            timing_sink,
            dep_timings,
            notify: opts.notify,
            policy: opts.policy,
            rss_before: max_rss_bytes(),
            handle: None,
        };
        if let Ok(mut active) = self.inner.active.lock() {
            active.insert(run_id.clone(), entry);
        }

        self.inner
            .emit_lifecycle(&run_id, "start", None, &format!("run {} started", run_id));
        self.inner.emit_debug(&run_id, &graph.render_call_graph());

        let inner = Arc::clone(&self.inner);
        let driver_run_id = run_id.clone();
        let run_opts = RunOptions {
            lm,
            max_iters: opts.max_iters,
            cache,
        };
        let handle = tokio::spawn(async move {
            let outcome = graph.arun_shared(start, run_opts, shared_trace).await;
            inner.finish(&driver_run_id, outcome);
        });
        self.inner.attach_handle(&run_id, handle);

        debug!(run_id = %run_id, "run submitted");
        Ok(snapshot)
    }

    /// Adopt a user-built run coroutine, tracking lifecycle only. The backend
    /// is already bound inside the future, so no timing wrapper or hooks are
    /// injected.
    pub fn submit_coro<F>(&self, fut: F, opts: SubmitOptions) -> RunRecord
    where
        F: Future<Output = Result<GraphResult>> + Send + 'static,
    {
        let run_id = self.next_run_id();
        let record = RunRecord::new(run_id.clone(), None);
        let snapshot = record.clone();
        let entry = RunEntry {
            record,
            shared_trace: Arc::new(Mutex::new(Vec::new())),
            timing_sink: Arc::new(Mutex::new(Vec::new())),
            dep_timings: Arc::new(Mutex::new(Vec::new())),
            notify: opts.notify,
            policy: opts.policy,
            rss_before: max_rss_bytes(),
            handle: None,
        };
        if let Ok(mut active) = self.inner.active.lock() {
            active.insert(run_id.clone(), entry);
        }
        self.inner
            .emit_lifecycle(&run_id, "start", None, &format!("run {} started", run_id));

        let inner = Arc::clone(&self.inner);
        let driver_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = fut.await;
            inner.finish(&driver_run_id, outcome);
        });
        self.inner.attach_handle(&run_id, handle);
        snapshot
    }

    /// Look up a run by id, searching the active table first, then the
    /// archive. Active runs return a live snapshot with the partial trace.
    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        if let Ok(active) = self.inner.active.lock() {
            if let Some(entry) = active.get(run_id) {
                return Some(entry.snapshot());
            }
        }
        self.inner
            .archive
            .lock()
            .ok()
            .and_then(|archive| archive.iter().find(|r| r.run_id == run_id).cloned())
    }

    /// Snapshots of every in-flight run.
    pub fn active(&self) -> Vec<RunRecord> {
        self.inner
            .active
            .lock()
            .map(|active| active.values().map(RunEntry::snapshot).collect())
            .unwrap_or_default()
    }

    /// Cancel a run: abort its task, cancel its pending gates, and archive
    /// the record as CANCELLED with the partial trace. Returns false when the
    /// run is not active.
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(mut entry) = self.inner.remove_active(run_id) else {
            return false;
        };
        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        self.inner.cancel_gates_inner(run_id);

        entry.record.state = RunState::Cancelled;
        entry.record.end_ns = Some(now_ns());
        entry.record.rss_delta_bytes = max_rss_bytes() - entry.rss_before;
        entry.record.trace = lock_clone(&entry.shared_trace);
        entry.record.node_timings = lock_clone(&entry.timing_sink);
        entry.record.dep_timings = lock_clone(&entry.dep_timings);
        entry.record.current_node = None;

        emit(
            &entry.notify,
            entry.policy.allows_lifecycle("cancel"),
            &format!("run {} cancelled", run_id),
            &events::lifecycle("cancel", run_id, entry.record.elapsed_ms()),
        );
        self.inner.archive(entry.record);
        debug!(run_id = %run_id, "run cancelled");
        true
    }

    /// Resolve a pending gate with a raw string value. The value is coerced
    /// against the gate's field type; coercion failure leaves the gate
    /// pending and returns false.
    pub fn resolve_gate(&self, gate_id: &str, raw: &str) -> bool {
        let gate = {
            let Ok(mut pending) = self.inner.pending_gates.lock() else {
                return false;
            };
            let Some(entry) = pending.get(gate_id) else {
                return false;
            };
            let Some(value) = entry.meta.field_type.coerce_str(raw) else {
                warn!(gate_id = %gate_id, raw = %raw, "gate value failed coercion");
                return false;
            };
            pending.remove(gate_id).map(|gate| (gate, value))
        };
        if let Some((gate, value)) = gate {
            let _ = gate.sender.send(value);
            true
        } else {
            false
        }
    }

    /// Cancel every pending gate of a run. Called from the cancel path and as
    /// the last step of any failed run.
    pub fn cancel_gates(&self, run_id: &str) {
        self.inner.cancel_gates_inner(run_id);
    }

    /// Pending gate metadata for one run, in creation order.
    pub fn pending_gates_for_run(&self, run_id: &str) -> Vec<InputGate> {
        let mut gates: Vec<InputGate> = self
            .inner
            .pending_gates
            .lock()
            .map(|pending| {
                pending
                    .values()
                    .filter(|g| g.meta.run_id == run_id)
                    .map(|g| g.meta.clone())
                    .collect()
            })
            .unwrap_or_default();
        gates.sort_by_key(|g| gate_index(&g.gate_id));
        gates
    }

    pub fn pending_gate_count(&self) -> usize {
        self.inner
            .pending_gates
            .lock()
            .map(|pending| pending.len())
            .unwrap_or(0)
    }

    fn next_run_id(&self) -> String {
        format!("g{}", self.inner.run_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl RegistryInner {
    fn attach_handle(&self, run_id: &str, handle: JoinHandle<()>) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(entry) = active.get_mut(run_id) {
                entry.handle = Some(handle);
            }
        }
    }

    fn remove_active(&self, run_id: &str) -> Option<RunEntry> {
        self.active.lock().ok().and_then(|mut a| a.remove(run_id))
    }

    /// Terminal transition for a completed or failed driver.
    fn finish(&self, run_id: &str, outcome: Result<GraphResult>) {
        let Some(mut entry) = self.remove_active(run_id) else {
            // Lost the race against cancel(); nothing left to record.
            return;
        };

        let (state, error_info, trace) = match outcome {
            Ok(result) => (RunState::Done, None, result.trace),
            Err(err) => {
                self.cancel_gates_inner(run_id);
                let info = (err.kind_name().to_string(), err.to_string());
                (RunState::Failed, Some(info), err.trace)
            }
        };

        entry.record.state = state;
        entry.record.end_ns = Some(now_ns());
        entry.record.rss_delta_bytes = max_rss_bytes() - entry.rss_before;
        entry.record.node_timings = lock_clone(&entry.timing_sink);
        entry.record.dep_timings = lock_clone(&entry.dep_timings);
        entry.record.trace = trace;
        entry.record.current_node = None;
        entry.record.error = error_info
            .as_ref()
            .map(|(kind, message)| format!("{}: {}", kind, message));

        let elapsed = entry.record.elapsed_ms();
        match &error_info {
            None => {
                emit(
                    &entry.notify,
                    entry.policy.allows_lifecycle("complete"),
                    &format!(
                        "run {} completed in {} ms",
                        run_id,
                        elapsed.unwrap_or(0)
                    ),
                    &events::lifecycle("complete", run_id, elapsed),
                );
            }
            Some((kind, message)) => {
                emit(
                    &entry.notify,
                    entry.policy.allows_lifecycle("fail"),
                    &format!("run {} failed: {}", run_id, message),
                    &events::lifecycle("fail", run_id, elapsed),
                );
                emit(
                    &entry.notify,
                    entry.policy.allows_lifecycle("fail"),
                    &format!("run {} error: {}", run_id, message),
                    &events::error(run_id, kind, message),
                );
            }
        }
        self.emit_run_detail(&entry);
        self.archive(entry.record);
    }

    /// Per-node timing events plus the memory event, at VERBOSE.
    fn emit_run_detail(&self, entry: &RunEntry) {
        if !entry.policy.allows_detail() {
            return;
        }
        let total_dep_ms: u64 = entry
            .record
            .dep_timings
            .iter()
            .map(|t| t.duration_ns / 1_000_000)
            .sum();
        for timing in &entry.record.node_timings {
            if timing.kind != LmCallKind::Fill {
                continue;
            }
            let fill_ms = timing.duration_ns / 1_000_000;
            emit(
                &entry.notify,
                true,
                &format!(
                    "run {} timing: {} fill {} ms",
                    entry.record.run_id, timing.node_type, fill_ms
                ),
                &events::timing(&entry.record.run_id, &timing.node_type, fill_ms, total_dep_ms),
            );
        }
        emit(
            &entry.notify,
            true,
            &format!(
                "run {} rss delta {} bytes",
                entry.record.run_id, entry.record.rss_delta_bytes
            ),
            &events::memory(&entry.record.run_id, entry.record.rss_delta_bytes),
        );
    }

    fn archive(&self, record: RunRecord) {
        if let Ok(mut archive) = self.archive.lock() {
            archive.push_back(record);
            while archive.len() > self.archive_capacity {
                archive.pop_front();
            }
        }
    }

    fn set_state(&self, run_id: &str, state: RunState) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(entry) = active.get_mut(run_id) {
                entry.record.state = state;
            }
        }
    }

    fn on_transition(&self, run_id: &str, from: &str, to: Option<&str>) {
        let emission = {
            let Ok(mut active) = self.active.lock() else {
                return;
            };
            let Some(entry) = active.get_mut(run_id) else {
                return;
            };
            entry.record.current_node = to.map(str::to_string);
            if !entry.policy.allows_transitions() {
                None
            } else {
                let fill_ms = entry
                    .timing_sink
                    .lock()
                    .ok()
                    .and_then(|sink| {
                        sink.iter()
                            .rev()
                            .find(|t| t.kind == LmCallKind::Fill)
                            .map(|t| t.duration_ns / 1_000_000)
                    });
                entry.notify.clone().map(|n| (n, fill_ms))
            }
        };
        if let Some((notify, fill_ms)) = emission {
            let content = match to {
                Some(to) => format!("{}: {} -> {}", run_id, from, to),
                None => format!("{}: {} -> (end)", run_id, from),
            };
            let meta = events::transition(run_id, from, to, fill_ms);
            notify(&content, &meta);
        }
    }

    fn emit_lifecycle(&self, run_id: &str, event: &str, elapsed_ms: Option<u64>, content: &str) {
        let target = {
            let Ok(active) = self.active.lock() else {
                return;
            };
            active.get(run_id).and_then(|entry| {
                if entry.policy.allows_lifecycle(event) {
                    entry.notify.clone()
                } else {
                    None
                }
            })
        };
        if let Some(notify) = target {
            notify(content, &events::lifecycle(event, run_id, elapsed_ms));
        }
    }

    fn emit_debug(&self, run_id: &str, call_graph: &str) {
        let target = {
            let Ok(active) = self.active.lock() else {
                return;
            };
            active.get(run_id).and_then(|entry| {
                if entry.policy.allows_detail() {
                    entry.notify.clone()
                } else {
                    None
                }
            })
        };
        if let Some(notify) = target {
            notify(
                &format!("run {} call graph", run_id),
                &events::debug(run_id, call_graph),
            );
        }
    }

    fn cancel_gates_inner(&self, run_id: &str) {
        let removed: Vec<PendingGate> = self
            .pending_gates
            .lock()
            .map(|mut pending| {
                let ids: Vec<String> = pending
                    .iter()
                    .filter(|(_, g)| g.meta.run_id == run_id)
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
            })
            .unwrap_or_default();
        // Dropping the senders cancels the awaiting futures.
        if !removed.is_empty() {
            debug!(run_id = %run_id, count = removed.len(), "cancelled pending gates");
        }
    }
}

/// The hook installed into each submitted run's dep cache.
struct RegistryGateHook {
    inner: Arc<RegistryInner>,
    run_id: String,
}

#[async_trait]
impl GateHook for RegistryGateHook {
    async fn open(
        &self,
        node: Arc<NodeDescriptor>,
        fields: Vec<GateFieldSpec>,
    ) -> Result<Map<String, Value>> {
        let mut receivers: Vec<(String, String, oneshot::Receiver<Value>)> = Vec::new();
        {
            let Ok(mut pending) = self.inner.pending_gates.lock() else {
                return Err(EngineError::gate("<poisoned>", "pending gate table unavailable"));
            };
            for spec in &fields {
                let idx = self.inner.gate_seq.fetch_add(1, Ordering::SeqCst);
                let gate_id = format!("{}.{}", self.run_id, idx);
                let (sender, receiver) = oneshot::channel();
                pending.insert(
                    gate_id.clone(),
                    PendingGate {
                        meta: InputGate {
                            gate_id: gate_id.clone(),
                            run_id: self.run_id.clone(),
                            field_name: spec.name.clone(),
                            field_type: spec.ty.clone(),
                            description: spec.description.clone(),
                            node_type_name: node.name.clone(),
                        },
                        sender,
                    },
                );
                receivers.push((spec.name.clone(), gate_id, receiver));
            }
        }

        self.inner.set_state(&self.run_id, RunState::Waiting);
        self.inner.emit_lifecycle(
            &self.run_id,
            "gate-waiting",
            None,
            &format!(
                "run {} waiting on {} input gate(s) for {}",
                self.run_id,
                fields.len(),
                node.name
            ),
        );

        let pairs = future::try_join_all(receivers.into_iter().map(
            |(name, gate_id, receiver)| async move {
                match receiver.await {
                    Ok(value) => Ok((name, value)),
                    Err(_) => Err(EngineError::gate(gate_id, "cancelled while pending")),
                }
            },
        ))
        .await?;

        self.inner.set_state(&self.run_id, RunState::Running);
        self.inner.emit_lifecycle(
            &self.run_id,
            "gate-resolved",
            None,
            &format!("run {} gates resolved", self.run_id),
        );

        let mut out = Map::new();
        for (name, value) in pairs {
            out.insert(name, value);
        }
        Ok(out)
    }
}

fn emit(notify: &Option<Notify>, allowed: bool, content: &str, meta: &Value) {
    if allowed {
        if let Some(notify) = notify {
            notify(content, meta);
        }
    }
}

fn lock_clone<T: Clone>(shared: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    shared.lock().map(|v| v.clone()).unwrap_or_default()
}

/// The monotonic index component of a gate id (`"<run_id>.<idx>"`).
fn gate_index(gate_id: &str) -> u64 {
    gate_id
        .rsplit('.')
        .next()
        .and_then(|idx| idx.parse().ok())
        .unwrap_or(u64::MAX)
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
