//! Timing decorator for backends.
//!
//! The registry wraps every submitted run's backend in a [`TimingLm`] so the
//! run record accumulates per-call durations without backend cooperation.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::node::NodeDescriptor;

use super::traits::{Chosen, LmBackend};

/// Which protocol operation a timing entry measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LmCallKind {
    Fill,
    Choose,
}

impl std::fmt::Display for LmCallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LmCallKind::Fill => "fill",
            LmCallKind::Choose => "choose",
        })
    }
}

/// One recorded backend call.
#[derive(Clone, Debug, serde::Serialize)]
pub struct LmTiming {
    pub node_type: String,
    pub kind: LmCallKind,
    pub duration_ns: u64,
}

/// Shared sink the registry reads timings out of.
pub type TimingSink = Arc<Mutex<Vec<LmTiming>>>;

/// Decorator backend that records call durations into a [`TimingSink`].
///
/// Fill entries are stamped with the target type; choose entries with the
/// chosen type (`__end__` when the backend finished the run).
pub struct TimingLm {
    inner: Arc<dyn LmBackend>,
    sink: TimingSink,
}

impl TimingLm {
    pub fn new(inner: Arc<dyn LmBackend>, sink: TimingSink) -> Self {
        Self { inner, sink }
    }

    fn record(&self, node_type: &str, kind: LmCallKind, started: Instant) {
        let entry = LmTiming {
            node_type: node_type.to_string(),
            kind,
            duration_ns: started.elapsed().as_nanos() as u64,
        };
        if let Ok(mut sink) = self.sink.lock() {
            sink.push(entry);
        }
    }
}

#[async_trait]
impl LmBackend for TimingLm {
    async fn choose_type(
        &self,
        candidates: &[Arc<NodeDescriptor>],
        allows_end: bool,
        context: &Map<String, Value>,
    ) -> Result<Chosen> {
        let started = Instant::now();
        let chosen = self.inner.choose_type(candidates, allows_end, context).await?;
        self.record(chosen.type_name(), LmCallKind::Choose, started);
        Ok(chosen)
    }

    async fn fill(
        &self,
        target: &Arc<NodeDescriptor>,
        context: &Map<String, Value>,
        instruction: &str,
    ) -> Result<Map<String, Value>> {
        let started = Instant::now();
        let filled = self.inner.fill(target, context, instruction).await?;
        self.record(&target.name, LmCallKind::Fill, started);
        Ok(filled)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldSpec, FieldType};

    struct SlowLm;

    #[async_trait]
    impl LmBackend for SlowLm {
        async fn choose_type(
            &self,
            candidates: &[Arc<NodeDescriptor>],
            _allows_end: bool,
            _context: &Map<String, Value>,
        ) -> Result<Chosen> {
            Ok(Chosen::Node(Arc::clone(&candidates[0])))
        }

        async fn fill(
            &self,
            _target: &Arc<NodeDescriptor>,
            _context: &Map<String, Value>,
            _instruction: &str,
        ) -> Result<Map<String, Value>> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(Map::new())
        }
    }

    #[tokio::test]
    async fn records_fill_and_choose() {
        let sink: TimingSink = Arc::new(Mutex::new(Vec::new()));
        let lm = TimingLm::new(Arc::new(SlowLm), Arc::clone(&sink));
        let target = Arc::new(
            NodeDescriptor::new("T").with_field(FieldSpec::plain("x", FieldType::Str)),
        );

        lm.choose_type(std::slice::from_ref(&target), false, &Map::new())
            .await
            .unwrap();
        lm.fill(&target, &Map::new(), "T").await.unwrap();

        let entries = sink.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, LmCallKind::Choose);
        assert_eq!(entries[0].node_type, "T");
        assert_eq!(entries[1].kind, LmCallKind::Fill);
        assert!(entries[1].duration_ns >= 5_000_000);
    }
}
