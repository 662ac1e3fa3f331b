//! Deterministic scripted backend for tests and demos.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use nodeflow_core::{
    validate_filled, Chosen, EngineError, LmBackend, NodeDescriptor, Result,
};
use serde_json::{Map, Value};

/// A backend that replays canned successor choices and raw fill outputs.
///
/// Choices are consumed in order; fills are keyed by target type and go
/// through the real validation path, so a scripted output that violates the
/// target schema fails exactly like a live backend's would.
///
/// # Example
///
/// ```rust,ignore
/// let lm = Arc::new(
///     ScriptedLm::new()
///         .with_choice("C")
///         .with_fill("C", json!({"y": "z"})),
/// );
/// ```
#[derive(Default)]
pub struct ScriptedLm {
    choices: Mutex<VecDeque<String>>,
    fills: Mutex<HashMap<String, Value>>,
}

impl ScriptedLm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next union choice. `"__end__"` finishes the run.
    pub fn with_choice(self, name: impl Into<String>) -> Self {
        if let Ok(mut choices) = self.choices.lock() {
            choices.push_back(name.into());
        }
        self
    }

    /// Set the raw output returned for fills of `target`.
    pub fn with_fill(self, target: impl Into<String>, raw: Value) -> Self {
        if let Ok(mut fills) = self.fills.lock() {
            fills.insert(target.into(), raw);
        }
        self
    }
}

#[async_trait]
impl LmBackend for ScriptedLm {
    async fn choose_type(
        &self,
        candidates: &[Arc<NodeDescriptor>],
        allows_end: bool,
        _context: &Map<String, Value>,
    ) -> Result<Chosen> {
        let name = self
            .choices
            .lock()
            .ok()
            .and_then(|mut choices| choices.pop_front())
            .ok_or_else(|| EngineError::lm(anyhow!("script has no choice queued"), 1))?;

        if name == "__end__" {
            return if allows_end {
                Ok(Chosen::End)
            } else {
                Err(EngineError::lm(
                    anyhow!("script chose '__end__' for a union without unit"),
                    1,
                ))
            };
        }
        candidates
            .iter()
            .find(|c| c.name == name)
            .map(|c| Ok(Chosen::Node(Arc::clone(c))))
            .unwrap_or_else(|| {
                Err(EngineError::lm(
                    anyhow!("script chose '{}', which is not a candidate", name),
                    1,
                ))
            })
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
            .ok()
            .and_then(|fills| fills.get(&target.name).cloned())
            .ok_or_else(|| {
                EngineError::lm(anyhow!("script has no fill for '{}'", target.name), 1)
            })?;
        validate_filled(target, &raw)
            .map_err(|e| EngineError::fill(&target.name, vec![e], 1))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
