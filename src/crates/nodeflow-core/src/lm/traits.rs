//! The backend trait driven by the graph executor.
//!
//! # Architecture Philosophy
//!
//! The engine is an **orchestration layer**, not an LLM client library:
//!
//! - the core crate defines the [`LmBackend`] trait and drives it;
//! - concrete providers (HTTP API, CLI subprocess, scripted) live in the
//!   `nodeflow-lm` crate and map the two operations onto their wire format;
//! - the executor never sees prompts or transports, only typed results.
//!
//! The protocol is deliberately minimal. Two operations cover the whole
//! engine-to-model surface:
//!
//! | Operation | Question it answers | Input context |
//! |---|---|---|
//! | [`choose_type`](LmBackend::choose_type) | which successor next? | current node's resolved values |
//! | [`fill`](LmBackend::fill) | what goes in its fields? | target node's resolved values |
//!
//! # Implementing a Backend
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::{Map, Value};
//!
//! use nodeflow_core::{Chosen, FieldSpec, FieldType, LmBackend, NodeDescriptor, Result};
//!
//! /// Always picks the first candidate and fills strings with a stub.
//! struct FirstCandidate;
//!
//! #[async_trait]
//! impl LmBackend for FirstCandidate {
//!     async fn choose_type(
//!         &self,
//!         candidates: &[Arc<NodeDescriptor>],
//!         _allows_end: bool,
//!         _context: &Map<String, Value>,
//!     ) -> Result<Chosen> {
//!         Ok(Chosen::Node(Arc::clone(&candidates[0])))
//!     }
//!
//!     async fn fill(
//!         &self,
//!         target: &Arc<NodeDescriptor>,
//!         _context: &Map<String, Value>,
//!         _instruction: &str,
//!     ) -> Result<Map<String, Value>> {
//!         let mut out = Map::new();
//!         for field in target.plain_fields() {
//!             out.insert(field.name.clone(), Value::String("stub".into()));
//!         }
//!         Ok(out)
//!     }
//! }
//!
//! let lm: Arc<dyn LmBackend> = Arc::new(FirstCandidate);
//! let answer = Arc::new(
//!     NodeDescriptor::new("Answer").with_field(FieldSpec::plain("text", FieldType::Str)),
//! );
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let chosen = lm
//!         .choose_type(std::slice::from_ref(&answer), false, &Map::new())
//!         .await
//!         .unwrap();
//!     assert_eq!(chosen.type_name(), "Answer");
//!
//!     let filled = lm.fill(&answer, &Map::new(), "Answer").await.unwrap();
//!     assert_eq!(filled["text"], Value::String("stub".into()));
//! });
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::node::NodeDescriptor;

/// Outcome of a `choose_type` call.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use nodeflow_core::{Chosen, NodeDescriptor};
///
/// let node = Chosen::Node(Arc::new(NodeDescriptor::new("Report")));
/// assert_eq!(node.type_name(), "Report");
/// assert_eq!(Chosen::End.type_name(), "__end__");
/// ```
#[derive(Clone, Debug)]
pub enum Chosen {
    /// The backend picked the unit type; the current node becomes terminal.
    End,
    /// The backend picked one of the candidate node types.
    Node(Arc<NodeDescriptor>),
}

impl Chosen {
    pub fn type_name(&self) -> &str {
        match self {
            Chosen::End => "__end__",
            Chosen::Node(descriptor) => &descriptor.name,
        }
    }
}

/// A pluggable language-model backend.
///
/// Implementations map the two protocol operations onto their wire format:
/// structured JSON prompts for a CLI subprocess, a typed structured-output
/// API for a managed SDK, a scripted table for tests. Both operations receive
/// a `context` of already-resolved field values; neither ever sees fields the
/// engine resolves itself (the `fill` schema is plain fields only).
///
/// # Retry Contract
///
/// - Output that fails validation is retried exactly once with the validator
///   message appended as a correction hint; a second failure is a
///   [`crate::ErrorKind::Fill`].
/// - Transport failures wait roughly a second and retry once; a second
///   failure is a [`crate::ErrorKind::Lm`].
///
/// # Threading
///
/// Implementations must be `Send + Sync`; the engine shares them across
/// concurrent runs as `Arc<dyn LmBackend>`. The registry wraps every
/// submitted run's backend in a [`crate::TimingLm`], which relies on the
/// same bounds.
#[async_trait]
pub trait LmBackend: Send + Sync {
    /// Pick exactly one successor from `candidates`.
    ///
    /// # Arguments
    ///
    /// * `candidates` - the union's successor descriptors, in declaration
    ///   order
    /// * `allows_end` - true when the union includes the unit type; only
    ///   then may the backend return [`Chosen::End`]
    /// * `context` - the resolved dep and recall values of the *current*
    ///   node, which is where the reasoning context lives
    ///
    /// # Returns
    ///
    /// The chosen successor descriptor, or [`Chosen::End`] to finish the
    /// run.
    ///
    /// # Errors
    ///
    /// A transport failure after the retry is a [`crate::ErrorKind::Lm`];
    /// an answer naming no candidate, after the correction-hint retry, is
    /// reported the same way.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use async_trait::async_trait;
    /// # use serde_json::{Map, Value};
    /// # use nodeflow_core::{Chosen, LmBackend, NodeDescriptor, Result};
    /// # struct FirstCandidate;
    /// # #[async_trait]
    /// # impl LmBackend for FirstCandidate {
    /// #     async fn choose_type(
    /// #         &self,
    /// #         candidates: &[Arc<NodeDescriptor>],
    /// #         _allows_end: bool,
    /// #         _context: &Map<String, Value>,
    /// #     ) -> Result<Chosen> {
    /// #         Ok(Chosen::Node(Arc::clone(&candidates[0])))
    /// #     }
    /// #     async fn fill(
    /// #         &self,
    /// #         _target: &Arc<NodeDescriptor>,
    /// #         _context: &Map<String, Value>,
    /// #         _instruction: &str,
    /// #     ) -> Result<Map<String, Value>> {
    /// #         Ok(Map::new())
    /// #     }
    /// # }
    /// let lm: Arc<dyn LmBackend> = Arc::new(FirstCandidate);
    /// let report = Arc::new(NodeDescriptor::new("Report"));
    /// let escalate = Arc::new(NodeDescriptor::new("Escalate"));
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let chosen = lm
    ///     .choose_type(&[report, escalate], false, &Map::new())
    ///     .await
    ///     .unwrap();
    /// assert_eq!(chosen.type_name(), "Report");
    /// # });
    /// ```
    async fn choose_type(
        &self,
        candidates: &[Arc<NodeDescriptor>],
        allows_end: bool,
        context: &Map<String, Value>,
    ) -> Result<Chosen>;

    /// Populate the plain fields of `target`.
    ///
    /// # Arguments
    ///
    /// * `target` - the node type to fill; its dep, recall, and gate fields
    ///   are excluded from the schema the backend works against
    /// * `context` - resolved values from the *target's* side (deps and
    ///   gates; recall values are never presented to `fill`)
    /// * `instruction` - the target's type name plus docstring
    ///
    /// # Returns
    ///
    /// The validated plain-field values in declaration order. The executor
    /// composes them with the resolved values into the full instance;
    /// backends never construct instances themselves.
    ///
    /// # Errors
    ///
    /// Output failing schema validation twice is a
    /// [`crate::ErrorKind::Fill`] carrying every attempt's validator
    /// message; transport exhaustion is a [`crate::ErrorKind::Lm`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use async_trait::async_trait;
    /// # use serde_json::{Map, Value};
    /// # use nodeflow_core::{Chosen, FieldSpec, FieldType, LmBackend, NodeDescriptor, Result};
    /// # struct StubFill;
    /// # #[async_trait]
    /// # impl LmBackend for StubFill {
    /// #     async fn choose_type(
    /// #         &self,
    /// #         candidates: &[Arc<NodeDescriptor>],
    /// #         _allows_end: bool,
    /// #         _context: &Map<String, Value>,
    /// #     ) -> Result<Chosen> {
    /// #         Ok(Chosen::Node(Arc::clone(&candidates[0])))
    /// #     }
    /// #     async fn fill(
    /// #         &self,
    /// #         target: &Arc<NodeDescriptor>,
    /// #         _context: &Map<String, Value>,
    /// #         _instruction: &str,
    /// #     ) -> Result<Map<String, Value>> {
    /// #         let mut out = Map::new();
    /// #         for field in target.plain_fields() {
    /// #             out.insert(field.name.clone(), Value::String("stub".into()));
    /// #         }
    /// #         Ok(out)
    /// #     }
    /// # }
    /// let lm: Arc<dyn LmBackend> = Arc::new(StubFill);
    /// let answer = Arc::new(
    ///     NodeDescriptor::new("Answer")
    ///         .with_doc("Answer the question.")
    ///         .with_field(FieldSpec::plain("text", FieldType::Str)),
    /// );
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let filled = lm
    ///     .fill(&answer, &Map::new(), &answer.instruction())
    ///     .await
    ///     .unwrap();
    /// assert_eq!(filled["text"], Value::String("stub".into()));
    /// # });
    /// ```
    async fn fill(
        &self,
        target: &Arc<NodeDescriptor>,
        context: &Map<String, Value>,
        instruction: &str,
    ) -> Result<Map<String, Value>>;

    /// Backend name for logs and timings.
    fn name(&self) -> &str {
        "lm"
    }
}
