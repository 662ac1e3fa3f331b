//! The step loop driving a graph run.
//!
//! Each iteration yields to the event loop, resolves the current node's
//! marked fields, then routes:
//!
//! - terminal: append the current instance and stop;
//! - single successor: resolve the target, fill it, advance;
//! - union: let the backend choose a successor from the current node's
//!   resolved context, then resolve and fill the chosen target;
//! - escape hatch: run the node's own handler, with the backend injected
//!   when the descriptor asks for it.
//!
//! Target-side resolution runs after the choice so context is drawn from the
//! successor's vantage, and before the current instance is appended, exactly
//! once per step thanks to dep and gate memoization. Every error leaving the
//! loop carries the partial trace.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tracing::{debug, trace as trace_event};

use crate::cache::DepCache;
use crate::error::{EngineError, Result};
use crate::field::FieldKind;
use crate::graph::{Graph, GraphResult, RunOptions};
use crate::lm::{Chosen, LmBackend};
use crate::node::{CallKind, NodeDescriptor, NodeInstance, RouteSpec, Trace};
use crate::resolver::resolve;

/// Trace handle shared with the registry so partial traces survive failure
/// and task abort.
pub(crate) type SharedTrace = Arc<Mutex<Trace>>;

pub(crate) async fn run_graph(
    graph: &Graph,
    start: NodeInstance,
    opts: RunOptions,
    shared: Option<SharedTrace>,
) -> Result<GraphResult> {
    let mut cache = opts.cache;
    if let Some(lm) = opts.lm {
        cache.set_lm(lm);
    }
    let lm = cache.lm();

    let mut trace: Trace = Vec::new();
    match drive(
        graph,
        start,
        &mut cache,
        lm,
        opts.max_iters,
        &mut trace,
        shared.as_ref(),
    )
    .await
    {
        Ok(()) => Ok(GraphResult { trace }),
        Err(err) => Err(err.with_trace(trace)),
    }
}

async fn drive(
    graph: &Graph,
    start: NodeInstance,
    cache: &mut DepCache,
    lm: Option<Arc<dyn LmBackend>>,
    max_iters: usize,
    trace: &mut Trace,
    shared: Option<&SharedTrace>,
) -> Result<()> {
    let mut current = Some(start);
    let mut iters = 0usize;

    while let Some(mut node) = current.take() {
        if iters >= max_iters {
            return Err(EngineError::max_iters(max_iters));
        }
        // Single-step so long runs do not starve sibling coroutines.
        tokio::task::yield_now().await;

        let descriptor = graph
            .node(&node.type_name)
            .ok_or_else(|| {
                EngineError::construction(format!(
                    "node type '{}' is not part of the graph",
                    node.type_name
                ))
            })?
            .clone();

        let resolved = resolve(&descriptor, trace, cache).await?;
        node.merge_resolved(&resolved);

        let next = match &descriptor.call {
            CallKind::Handler { wants_lm, handler } => {
                debug!(node_type = %descriptor.name, "executing escape hatch");
                let lm_arg = if *wants_lm { lm.clone() } else { None };
                handler
                    .call(&node, &resolved, lm_arg)
                    .await
                    .map_err(|cause| EngineError::handler(&descriptor.name, cause))?
            }
            CallKind::Auto => match &descriptor.route {
                RouteSpec::Terminal => None,
                RouteSpec::Single(successor) => {
                    let target = lookup(graph, successor)?;
                    Some(fill_target(&target, trace, cache, &lm).await?)
                }
                RouteSpec::Union {
                    candidates,
                    allows_end,
                } => {
                    let backend = require_lm(&lm, &descriptor.name)?;
                    let targets: Vec<Arc<NodeDescriptor>> = candidates
                        .iter()
                        .map(|name| lookup(graph, name))
                        .collect::<Result<_>>()?;
                    let chosen = backend
                        .choose_type(&targets, *allows_end, &resolved)
                        .await?;
                    trace_event!(
                        node_type = %descriptor.name,
                        chosen = chosen.type_name(),
                        "successor chosen"
                    );
                    match chosen {
                        Chosen::End => None,
                        Chosen::Node(target) => {
                            Some(fill_target(&target, trace, cache, &lm).await?)
                        }
                    }
                }
            },
        };

        if let Some(hook) = cache.transition_hook() {
            hook(
                &node.type_name,
                next.as_ref().map(|n| n.type_name.as_str()),
            );
        }
        push(trace, shared, node);
        current = next;
        iters += 1;
    }
    Ok(())
}

/// Resolve the target's fields, strip recall values from the backend-visible
/// context, fill the plain fields, and compose the full instance.
async fn fill_target(
    target: &Arc<NodeDescriptor>,
    trace: &Trace,
    cache: &mut DepCache,
    lm: &Option<Arc<dyn LmBackend>>,
) -> Result<NodeInstance> {
    let backend = require_lm(lm, &target.name)?;
    let resolved = resolve(target, trace, cache).await?;

    let mut context = resolved.clone();
    for field in &target.fields {
        if field.kind() == FieldKind::Recall {
            context.remove(&field.name);
        }
    }

    let plain = backend
        .fill(target, &context, &target.instruction())
        .await?;
    Ok(NodeInstance::compose(target, &plain, &resolved))
}

fn lookup(graph: &Graph, name: &str) -> Result<Arc<NodeDescriptor>> {
    graph
        .node(name)
        .cloned()
        .ok_or_else(|| {
            EngineError::construction(format!("node type '{}' is not part of the graph", name))
        })
}

fn require_lm(
    lm: &Option<Arc<dyn LmBackend>>,
    node_type: &str,
) -> Result<Arc<dyn LmBackend>> {
    lm.clone().ok_or_else(|| {
        EngineError::lm(
            anyhow!(
                "auto-routed node type '{}' needs a backend, but none was configured",
                node_type
            ),
            0,
        )
    })
}

fn push(trace: &mut Trace, shared: Option<&SharedTrace>, node: NodeInstance) {
    if let Some(shared) = shared {
        if let Ok(mut guard) = shared.lock() {
            guard.push(node.clone());
        }
    }
    trace.push(node);
}
