//! Dependency edges discovered while macros run.
//!
//! Edges are queued on the shared state as modules are loaded, defined or
//! included by macro code and are only committed to the dependency sink when
//! the macro context is flushed.

use crate::context::{CompilationContext, SharedState};
use crate::dependency_graph::{DependencyReason, DependencySink};
use crate::types::Path;
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDependencyEdge {
    /// Module that must be rebuilt when `target` changes
    pub consumer: Path,
    pub target: Path,
    pub reason: DependencyReason,
}

/// Queue an edge from the context's current module to `target`.
pub fn record(ctx: &CompilationContext, target: &Path, reason: DependencyReason) {
    let consumer = ctx.current_module.clone();
    if consumer.is_empty() || &consumer == target {
        return;
    }
    let edge = PendingDependencyEdge {
        consumer,
        target: target.clone(),
        reason,
    };
    let mut shared = ctx.shared.borrow_mut();
    if !shared.pending_edges.contains(&edge) {
        shared.pending_edges.push(edge);
    }
}

/// Drain pending edges into `sink`; returns how many were committed.
pub fn commit_into(pending: &mut Vec<PendingDependencyEdge>, sink: &mut dyn DependencySink) -> usize {
    let count = pending.len();
    for edge in pending.drain(..) {
        debug!("dependency {} -> {} ({})", edge.consumer, edge.target, edge.reason);
        sink.add_dependency(&edge.consumer, &edge.target, edge.reason);
    }
    count
}

/// Commit the shared state's pending edges into its dependency graph.
pub fn commit(shared: &mut SharedState) -> usize {
    let SharedState {
        pending_edges,
        graph,
        ..
    } = shared;
    commit_into(pending_edges, graph)
}

/// Drop queued edges that originate from an invalidated module.
pub fn discard_from(shared: &mut SharedState, module: &Path) {
    shared.pending_edges.retain(|e| &e.consumer != module);
    shared.graph.invalidate_module(module);
}
