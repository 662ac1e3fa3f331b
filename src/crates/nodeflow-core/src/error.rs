//! Error types for graph construction and execution.
//!
//! Every engine failure is an [`EngineError`]: a typed [`ErrorKind`] plus the
//! partial trace produced before the failure (possibly empty). The executor
//! attaches the trace at its outer boundary, so callers that receive an error
//! from [`crate::Graph::run`] or the run registry can always inspect how far
//! the run advanced.
//!
//! # Error Hierarchy
//!
//! ```text
//! EngineError
//! ├── Dep          - a dep callable failed while resolving inputs
//! ├── Recall       - no prior trace instance matched a recall field
//! ├── Fill         - backend output failed validation after retries
//! ├── Lm           - backend transport failed after retries
//! ├── Gate         - input gate coercion failure or cancellation
//! ├── Handler      - user escape-hatch code failed
//! ├── MaxIters     - step limit exceeded
//! └── Construction - graph factory rejected the graph
//! ```
//!
//! # Error Handling Patterns
//!
//! ## Basic Error Handling
//!
//! Engine entry points return [`Result`], so `?` propagates failures:
//!
//! ```rust
//! use nodeflow_core::{Graph, NodeDescriptor, NodeTable, Result, RouteSpec};
//!
//! fn build_graph() -> Result<Graph> {
//!     let mut table = NodeTable::new();
//!     table.insert(NodeDescriptor::new("Solo").with_route(RouteSpec::Terminal));
//!     let graph = Graph::new("Solo", &table)?;
//!     Ok(graph)
//! }
//!
//! assert!(build_graph().is_ok());
//! ```
//!
//! ## Matching Specific Errors
//!
//! The kind is public, so callers can route on the failure category:
//!
//! ```rust
//! use nodeflow_core::{EngineError, ErrorKind};
//!
//! fn describe(err: &EngineError) -> String {
//!     match &err.kind {
//!         ErrorKind::Gate { gate_id, reason } => {
//!             format!("gate {} failed: {}", gate_id, reason)
//!         }
//!         ErrorKind::MaxIters { limit } => {
//!             format!("hit the {}-step limit", limit)
//!         }
//!         _ => err.to_string(),
//!     }
//! }
//!
//! let err = EngineError::gate("g1.0", "cancelled while pending");
//! assert_eq!(describe(&err), "gate g1.0 failed: cancelled while pending");
//! ```
//!
//! ## Recovering the Partial Trace
//!
//! Whatever the kind, the trace shows the successful prefix of the run:
//!
//! ```rust
//! use nodeflow_core::{EngineError, NodeInstance};
//! use serde_json::Map;
//!
//! let err = EngineError::max_iters(10)
//!     .with_trace(vec![NodeInstance::new("Start", Map::new())]);
//!
//! assert_eq!(err.trace.len(), 1);
//! assert_eq!(err.trace[0].type_name, "Start");
//! ```
//!
//! # See Also
//!
//! - [`Result`] - convenience type alias
//! - [`crate::RunRecord`] - how the registry surfaces a failed run

use thiserror::Error;

use crate::node::NodeInstance;

/// Convenience result type using [`EngineError`].
///
/// # Examples
///
/// ```rust
/// use nodeflow_core::{EngineError, Result};
///
/// fn validate_name(name: &str) -> Result<()> {
///     if name.is_empty() {
///         return Err(EngineError::construction("node type name is empty"));
///     }
///     Ok(())
/// }
///
/// assert!(validate_name("Summary").is_ok());
/// assert!(validate_name("").is_err());
/// ```
pub type Result<T> = std::result::Result<T, EngineError>;

/// The distinguishable failure categories of the engine.
///
/// Kinds carry their own context (node type, field, attempt counts). The
/// partial trace lives on the enclosing [`EngineError`], not on the kind.
///
/// # Categories
///
/// - **Resolution**: `Dep`, `Recall`, `Gate`
/// - **Backend**: `Fill`, `Lm`
/// - **User code**: `Handler`
/// - **Limits**: `MaxIters`
/// - **Build time**: `Construction`
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// A dep callable raised while resolving a node's input fields.
    ///
    /// `field` is the dep-annotated field whose callable failed, or `None`
    /// when the failure came from a transitive dep that no field names
    /// directly.
    ///
    /// **Common causes**: an external service a dep wraps is down, a
    /// pre-seeded handle is missing from the dep cache, a bug in user dep
    /// code.
    ///
    /// **Recovery**: fix the dep callable or its environment; the first
    /// failure in a level cancels its siblings, so only one cause is
    /// reported per run.
    #[error("dep resolution failed for node type '{node_type}' (field: {}): {cause}", field.as_deref().unwrap_or("<transitive>"))]
    Dep {
        node_type: String,
        field: Option<String>,
        cause: anyhow::Error,
    },

    /// A recall field found no prior trace instance of the declared type.
    ///
    /// **Common causes**: the recalled type is only produced on a branch the
    /// run did not take, or the recall sits on an early node before the
    /// producer has run.
    ///
    /// **Recovery**: restructure the graph so every path to the recalling
    /// node passes through a producer of the declared type.
    #[error("no trace instance of type '{field_type}' found for recall field '{field}' on node type '{node_type}'")]
    Recall {
        node_type: String,
        field: String,
        field_type: String,
    },

    /// The backend's output failed validation against the target node's
    /// plain-field schema, on every attempt.
    ///
    /// The first attempt's validator message is fed back to the backend as a
    /// correction hint; `parse_errors` keeps every attempt's message for
    /// inspection.
    ///
    /// **Recovery**: tighten the target's field docs, or use a stronger
    /// model; the messages in `parse_errors` say exactly which field failed.
    #[error("failed to fill node type '{target}' after {attempts} attempts: {}", parse_errors.join("; "))]
    Fill {
        target: String,
        parse_errors: Vec<String>,
        attempts: u32,
    },

    /// The backend transport (network, subprocess, rate limit) failed after
    /// its retry.
    ///
    /// **Common causes**: connectivity loss, an exhausted API quota, a local
    /// model server that is not running, a subprocess timeout.
    ///
    /// **Recovery**: check the backend's availability and configuration;
    /// the engine has already waited and retried once.
    #[error("language model call failed after {attempts} attempts: {cause}")]
    Lm { cause: anyhow::Error, attempts: u32 },

    /// An input gate was cancelled or handed an uncoercible value.
    ///
    /// Cancellation reaches every coroutine awaiting the gate; a coercion
    /// failure is reported to the resolving caller instead and leaves the
    /// gate pending.
    #[error("gate '{gate_id}' failed: {reason}")]
    Gate { gate_id: String, reason: String },

    /// User escape-hatch code failed. The inner error is passed through
    /// unchanged.
    ///
    /// **Recovery**: the engine adds no interpretation; the cause is
    /// whatever the node's own `call` implementation raised.
    #[error("call handler for node type '{node_type}' failed: {cause}")]
    Handler {
        node_type: String,
        cause: anyhow::Error,
    },

    /// The executor hit the per-run step limit.
    ///
    /// **Common causes**: a routing loop the backend never exits, or a
    /// legitimate long graph run with the default limit of 10.
    ///
    /// **Recovery**: raise `max_iters` on submission, or fix the loop; the
    /// attached trace shows which node types cycled.
    #[error("graph exceeded the step limit of {limit} iterations")]
    MaxIters { limit: usize },

    /// The graph factory rejected the graph before any run started.
    ///
    /// **Common causes**: an unregistered successor type, an empty union, a
    /// dep cycle or name collision, a recall field declaring a non-node
    /// type, invalid caller-supplied start fields.
    ///
    /// **Recovery**: fix the descriptor set; nothing has executed yet.
    #[error("graph construction failed: {0}")]
    Construction(String),
}

/// An engine failure with the partial trace attached.
///
/// The trace contains every node instance appended before the failure, in
/// executor order. It is empty when the failure happened on the first node.
///
/// # Examples
///
/// ## Creating Errors
///
/// ```rust
/// use nodeflow_core::EngineError;
///
/// let err = EngineError::construction("start type 'Ghost' is not registered");
/// assert_eq!(err.kind_name(), "construction");
/// assert!(err.trace.is_empty());
/// ```
///
/// ## Matching Errors
///
/// ```rust
/// use nodeflow_core::{EngineError, ErrorKind};
///
/// let err = EngineError::max_iters(10);
/// match &err.kind {
///     ErrorKind::MaxIters { limit } => assert_eq!(*limit, 10),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub trace: Vec<NodeInstance>,
}

impl EngineError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
        }
    }

    /// Replace the attached trace. Used by the executor's outer boundary;
    /// an already-attached trace is preserved elsewhere.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::{EngineError, NodeInstance};
    /// use serde_json::Map;
    ///
    /// let err = EngineError::max_iters(3)
    ///     .with_trace(vec![NodeInstance::new("Loop", Map::new())]);
    /// assert_eq!(err.trace.len(), 1);
    /// ```
    pub fn with_trace(mut self, trace: Vec<NodeInstance>) -> Self {
        self.trace = trace;
        self
    }

    /// Create a dep resolution error.
    ///
    /// # Arguments
    ///
    /// * `node_type` - the node whose inputs were being resolved
    /// * `field` - the dep-annotated field, or `None` for a transitive dep
    /// * `cause` - the error the dep callable raised
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::EngineError;
    ///
    /// let err = EngineError::dep("Fetch", Some("rows".into()), anyhow::anyhow!("db down"));
    /// assert_eq!(err.kind_name(), "dep");
    /// assert!(err.to_string().contains("db down"));
    ///
    /// let transitive = EngineError::dep("Fetch", None, anyhow::anyhow!("pool closed"));
    /// assert!(transitive.to_string().contains("<transitive>"));
    /// ```
    pub fn dep(
        node_type: impl Into<String>,
        field: Option<String>,
        cause: anyhow::Error,
    ) -> Self {
        Self::new(ErrorKind::Dep {
            node_type: node_type.into(),
            field,
            cause,
        })
    }

    /// Create a recall miss error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::EngineError;
    ///
    /// let err = EngineError::recall("Summary", "report", "Report");
    /// assert_eq!(err.kind_name(), "recall");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "no trace instance of type 'Report' found for recall field 'report' on node type 'Summary'"
    /// );
    /// ```
    pub fn recall(
        node_type: impl Into<String>,
        field: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Recall {
            node_type: node_type.into(),
            field: field.into(),
            field_type: field_type.into(),
        })
    }

    /// Create a fill validation error.
    ///
    /// # Arguments
    ///
    /// * `target` - the node type the backend was filling
    /// * `parse_errors` - one validator message per failed attempt
    /// * `attempts` - total attempts made (two, per the retry contract)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::EngineError;
    ///
    /// let err = EngineError::fill(
    ///     "Answer",
    ///     vec!["missing required field 'text' (str)".into()],
    ///     2,
    /// );
    /// assert_eq!(err.kind_name(), "fill");
    /// assert!(err.to_string().contains("after 2 attempts"));
    /// assert!(err.to_string().contains("missing required field 'text'"));
    /// ```
    pub fn fill(target: impl Into<String>, parse_errors: Vec<String>, attempts: u32) -> Self {
        Self::new(ErrorKind::Fill {
            target: target.into(),
            parse_errors,
            attempts,
        })
    }

    /// Create a backend transport error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::EngineError;
    ///
    /// let err = EngineError::lm(anyhow::anyhow!("connection refused"), 2);
    /// assert_eq!(err.kind_name(), "lm");
    /// assert!(err.to_string().contains("connection refused"));
    /// ```
    pub fn lm(cause: anyhow::Error, attempts: u32) -> Self {
        Self::new(ErrorKind::Lm { cause, attempts })
    }

    /// Create a gate error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::EngineError;
    ///
    /// let err = EngineError::gate("g1.0", "cancelled while pending");
    /// assert_eq!(err.kind_name(), "gate");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "gate 'g1.0' failed: cancelled while pending"
    /// );
    /// ```
    pub fn gate(gate_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Gate {
            gate_id: gate_id.into(),
            reason: reason.into(),
        })
    }

    /// Create an escape-hatch failure.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::EngineError;
    ///
    /// let err = EngineError::handler("Sync", anyhow::anyhow!("upstream 500"));
    /// assert_eq!(err.kind_name(), "handler");
    /// assert!(err.to_string().contains("node type 'Sync'"));
    /// ```
    pub fn handler(node_type: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::new(ErrorKind::Handler {
            node_type: node_type.into(),
            cause,
        })
    }

    pub fn max_iters(limit: usize) -> Self {
        Self::new(ErrorKind::MaxIters { limit })
    }

    pub fn construction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Construction(message.into()))
    }

    /// Short machine-friendly name of the kind, used in `error` event
    /// metadata and run records.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeflow_core::EngineError;
    ///
    /// assert_eq!(EngineError::max_iters(10).kind_name(), "max-iters");
    /// assert_eq!(EngineError::construction("bad").kind_name(), "construction");
    /// ```
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ErrorKind::Dep { .. } => "dep",
            ErrorKind::Recall { .. } => "recall",
            ErrorKind::Fill { .. } => "fill",
            ErrorKind::Lm { .. } => "lm",
            ErrorKind::Gate { .. } => "gate",
            ErrorKind::Handler { .. } => "handler",
            ErrorKind::MaxIters { .. } => "max-iters",
            ErrorKind::Construction(_) => "construction",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for EngineError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = EngineError::recall("Summary", "report", "Report");
        assert_eq!(
            err.to_string(),
            "no trace instance of type 'Report' found for recall field 'report' on node type 'Summary'"
        );
    }

    #[test]
    fn dep_error_marks_transitive_failures() {
        let err = EngineError::dep("Plan", None, anyhow::anyhow!("boom"));
        assert!(err.to_string().contains("<transitive>"));
        assert_eq!(err.kind_name(), "dep");
    }

    #[test]
    fn trace_attaches_once() {
        let err = EngineError::max_iters(10).with_trace(Vec::new());
        assert!(err.trace.is_empty());
        assert_eq!(err.to_string(), "graph exceeded the step limit of 10 iterations");
    }
}
