//! Async field resolution for one node type.
//!
//! [`resolve`] produces the dep, recall, and gate values of a node in field
//! declaration order:
//!
//! 1. Gate fields go through the hook in the dep cache, memoized per node
//!    type so the hook fires once even though the executor resolves twice per
//!    step (current side, then target side before fill).
//! 2. Recall fields walk the trace backward for the most recent instance of
//!    the declared type.
//! 3. Dep fields run through the type's dep DAG level by level. Every
//!    not-yet-cached callable in a level is dispatched concurrently with a
//!    single fan-in; the first failure drops the level's remaining futures
//!    and surfaces as a `DepError`. Results are memoized by callable name for
//!    the rest of the run.
//!
//! Plain fields never appear in the output: a node with only plain fields
//! resolves to an empty map without any fan-out.

use std::sync::Arc;
use std::time::Instant;

use futures::future;
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::DepCache;
use crate::dep::{Dep, DepDag};
use crate::error::{EngineError, Result};
use crate::field::{Binding, FieldType};
use crate::gate::GateFieldSpec;
use crate::node::{recall_from_trace, NodeDescriptor, NodeInstance};

/// Resolve all dep, recall, and gate fields of `descriptor` against `trace`,
/// memoizing into `cache`.
pub async fn resolve(
    descriptor: &Arc<NodeDescriptor>,
    trace: &[NodeInstance],
    cache: &mut DepCache,
) -> Result<Map<String, Value>> {
    let gate_values = resolve_gates(descriptor, cache).await?;
    let recall_values = resolve_recalls(descriptor, trace)?;
    resolve_deps(descriptor, cache).await?;

    let mut out = Map::new();
    for field in descriptor.fields.iter().filter(|f| !f.is_internal()) {
        match &field.binding {
            Binding::Dep(dep) => {
                if let Some(value) = cache.get(dep.name()) {
                    out.insert(field.name.clone(), value.clone());
                }
            }
            Binding::Recall => {
                if let Some(value) = recall_values.get(&field.name) {
                    out.insert(field.name.clone(), value.clone());
                }
            }
            Binding::Gate { .. } => {
                if let Some(value) = gate_values.get(&field.name) {
                    out.insert(field.name.clone(), value.clone());
                }
            }
            Binding::Plain | Binding::Effect => {}
        }
    }
    Ok(out)
}

async fn resolve_gates(
    descriptor: &Arc<NodeDescriptor>,
    cache: &mut DepCache,
) -> Result<Map<String, Value>> {
    let specs: Vec<GateFieldSpec> = descriptor
        .fields
        .iter()
        .filter(|f| !f.is_internal())
        .filter_map(|f| match &f.binding {
            Binding::Gate { description } => Some(GateFieldSpec {
                name: f.name.clone(),
                ty: f.ty.clone(),
                description: description.clone(),
            }),
            _ => None,
        })
        .collect();
    if specs.is_empty() {
        return Ok(Map::new());
    }

    if let Some(memo) = cache.gate_memo(&descriptor.name) {
        return Ok(memo.clone());
    }

    let hook = cache.gate_hook().ok_or_else(|| {
        EngineError::gate(
            "<unregistered>",
            format!(
                "node type '{}' declares gate fields but no gate hook is installed; submit the graph through a registry",
                descriptor.name
            ),
        )
    })?;

    debug!(node_type = %descriptor.name, gates = specs.len(), "opening input gates");
    let values = hook.open(Arc::clone(descriptor), specs).await?;
    cache.memoize_gates(descriptor.name.clone(), values.clone());
    Ok(values)
}

fn resolve_recalls(
    descriptor: &Arc<NodeDescriptor>,
    trace: &[NodeInstance],
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for field in descriptor.fields.iter().filter(|f| !f.is_internal()) {
        if !matches!(field.binding, Binding::Recall) {
            continue;
        }
        let wanted = match field.ty.base() {
            FieldType::Node(name) => name.as_str(),
            other => {
                return Err(EngineError::construction(format!(
                    "recall field '{}.{}' must declare a node type, not {}",
                    descriptor.name, field.name, other
                )))
            }
        };
        match recall_from_trace(trace, wanted) {
            Some(instance) => {
                out.insert(field.name.clone(), instance.as_value());
            }
            None => {
                return Err(EngineError::recall(
                    &descriptor.name,
                    &field.name,
                    wanted,
                ))
            }
        }
    }
    Ok(out)
}

async fn resolve_deps(descriptor: &Arc<NodeDescriptor>, cache: &mut DepCache) -> Result<()> {
    let dag = DepDag::build(descriptor).map_err(EngineError::construction)?;
    if dag.is_empty() {
        return Ok(());
    }

    let timing_hook = cache.dep_timing_hook();
    for (depth, level) in dag.levels().iter().enumerate() {
        let pending: Vec<Arc<Dep>> = level
            .iter()
            .filter(|dep| !cache.contains(dep.name()))
            .cloned()
            .collect();
        if pending.is_empty() {
            continue;
        }
        debug!(
            node_type = %descriptor.name,
            depth,
            count = pending.len(),
            "dispatching dep level"
        );

        let futures: Vec<_> = pending
            .iter()
            .map(|dep| {
                let mut args = Map::new();
                for (param, required) in dep.requires() {
                    if let Some(value) = cache.get(required.name()) {
                        args.insert(param.clone(), value.clone());
                    }
                }
                let dep = Arc::clone(dep);
                let hook = timing_hook.clone();
                async move {
                    let started = Instant::now();
                    let value = dep
                        .invoke(args)
                        .await
                        .map_err(|cause| (dep.name().to_string(), cause))?;
                    if let Some(hook) = &hook {
                        hook(dep.name(), started.elapsed().as_nanos() as u64);
                    }
                    Ok((dep.name().to_string(), value))
                }
            })
            .collect();

        match future::try_join_all(futures).await {
            Ok(resolved) => {
                for (name, value) in resolved {
                    cache.insert(name, value);
                }
            }
            Err((dep_name, cause)) => {
                let field = descriptor
                    .fields
                    .iter()
                    .find(|f| matches!(&f.binding, Binding::Dep(d) if d.name() == dep_name))
                    .map(|f| f.name.clone());
                return Err(EngineError::dep(&descriptor.name, field, cause));
            }
        }
    }
    Ok(())
}
