//! # nodeflow-core - Graph Execution Engine for Agent Orchestration
//!
//! A runtime for user-defined directed graphs of typed nodes, where each
//! node is one LLM step or deterministic computation. The engine resolves
//! every node's input dependencies concurrently, asks a pluggable
//! language-model backend to choose the next node type or populate output
//! fields, captures the execution trace, and can suspend a run mid-flight on
//! *input gates* awaiting human input.
//!
//! ## Core Concepts
//!
//! ### Node types and field markers
//!
//! A node type is a [`NodeDescriptor`]: named, typed fields plus a route
//! describing its successors. Each field carries a [`Binding`] selecting how
//! its value is produced:
//!
//! - `Dep(fn)` - computed by a callable, which may itself have deps, forming
//!   a per-type DAG resolved level-parallel and memoized per run;
//! - `Recall` - pulled from the trace by type match, most recent first;
//! - `Gate(description)` - supplied by a concurrent actor resolving a
//!   suspended future;
//! - no marker - plain: filled by the backend (caller-supplied on the start
//!   node).
//!
//! ### Two-phase dispatch
//!
//! When a node's route is a union, the backend first *chooses* a successor
//! type from the current node's resolved context, then *fills* the chosen
//! target's plain fields from the target's own context. Parse failures are
//! retried once with the validator message as a correction hint.
//!
//! ### Runs and the registry
//!
//! [`Graph::run`]/[`Graph::arun`] execute directly. The [`Registry`] wraps
//! runs with lifecycle tracking: states (`RUNNING`, `WAITING`, `DONE`,
//! `FAILED`, `CANCELLED`), bounded archival, cancellation, per-call and
//! per-dep timings, resident-set deltas, and policy-gated event emission.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nodeflow_core::{
//!     FieldSpec, FieldType, Graph, NodeDescriptor, NodeTable, RouteSpec, RunOptions,
//! };
//! use serde_json::json;
//!
//! let mut table = NodeTable::new();
//! table.insert(
//!     NodeDescriptor::new("Start")
//!         .with_field(FieldSpec::plain("q", FieldType::Str))
//!         .with_route(RouteSpec::Single("Answer".into())),
//! );
//! table.insert(
//!     NodeDescriptor::new("Answer")
//!         .with_doc("Answer the question.")
//!         .with_field(FieldSpec::plain("text", FieldType::Str))
//!         .with_route(RouteSpec::Terminal),
//! );
//!
//! let graph = Graph::new("Start", &table)?;
//! let mut fields = serde_json::Map::new();
//! fields.insert("q".into(), json!("what is nodeflow?"));
//! let result = graph.run(fields, RunOptions::new().with_lm(backend))?;
//! println!("{:?}", result.result());
//! ```
//!
//! ## Module Organization
//!
//! - [`field`] - field types, markers, and the classifier
//! - [`dep`] - dep callables and the per-type dependency DAG
//! - [`resolver`] - concurrent, memoized field resolution
//! - [`cache`] - the per-run dep cache and its reserved slots
//! - [`node`] - descriptors, routes, instances, traces
//! - [`schema`] - plain-field schemas and backend output validation
//! - [`graph`] - graph discovery, validation, and run entry points
//! - [`lm`] - the backend protocol and timing decorator
//! - [`registry`] - run lifecycle, archival, cancellation, events
//! - [`gate`] - input gates and the gate hook
//! - [`error`] - the engine error taxonomy

pub mod cache;
pub mod dep;
pub mod error;
mod events;
mod executor;
pub mod field;
pub mod gate;
pub mod graph;
pub mod lm;
pub mod node;
pub mod registry;
pub mod resolver;
mod rss;
pub mod schema;

pub use cache::{DepCache, DepTimingHook, TransitionHook};
pub use dep::{Dep, DepDag, DepResult, DepTiming};
pub use error::{EngineError, ErrorKind, Result};
pub use field::{classify, Binding, FieldKind, FieldSpec, FieldType, StructSchema};
pub use gate::{GateFieldSpec, GateHook, InputGate};
pub use graph::{Graph, GraphResult, RunOptions, DEFAULT_MAX_ITERS};
pub use lm::{Chosen, LmBackend, LmCallKind, LmTiming, TimingLm, TimingSink};
pub use node::{
    recall_from_trace, CallKind, NodeDescriptor, NodeHandler, NodeInstance, NodeTable, RouteSpec,
    Trace,
};
pub use registry::{
    Notify, OutputPolicy, Registry, RunRecord, RunState, SubmitOptions, DEFAULT_ARCHIVE_CAPACITY,
};
pub use schema::{plain_schema, validate_filled};
