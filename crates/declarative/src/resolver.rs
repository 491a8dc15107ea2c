//! Dependency resolver
//!
//! Topological orderings over the resource graph. Ready nodes are kept in a
//! min-heap keyed by declaration index, so independent resources always come
//! out in the order they were declared.

use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::resource::ResourceId;
use crate::state::AppliedState;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Kahn's algorithm over `prereqs[i]` (nodes that must come before `i`).
///
/// On a cycle, returns the nodes that could not be ordered.
fn kahn(prereqs: &[Vec<usize>]) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let count = prereqs.len();
    let mut pending: Vec<usize> = prereqs.iter().map(Vec::len).collect();
    let mut unlocks = vec![Vec::new(); count];
    for (node, before) in prereqs.iter().enumerate() {
        for &b in before {
            unlocks[b].push(node);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|&i| pending[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in &unlocks[node] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|&i| pending[i] > 0).collect())
    }
}

/// Indices in creation order: dependencies before dependents.
pub fn creation_indices(graph: &ResourceGraph) -> Vec<usize> {
    // The graph builder already rejected cycles
    kahn(graph.dependency_lists()).unwrap_or_default()
}

/// Indices in deletion order: dependents before dependencies.
pub fn deletion_indices(graph: &ResourceGraph) -> Vec<usize> {
    kahn(graph.dependent_lists()).unwrap_or_default()
}

pub fn creation_order(graph: &ResourceGraph) -> Vec<ResourceId> {
    creation_indices(graph)
        .into_iter()
        .map(|i| graph.node(i).id.clone())
        .collect()
}

pub fn deletion_order(graph: &ResourceGraph) -> Vec<ResourceId> {
    deletion_indices(graph)
        .into_iter()
        .map(|i| graph.node(i).id.clone())
        .collect()
}

/// Deletion order for resources that only exist in applied state.
///
/// Uses the dependencies recorded when each resource was last applied.
/// Ties break by position in `ids`; dependencies outside `ids` are ignored.
pub fn order_applied(state: &AppliedState, ids: &[ResourceId]) -> Result<Vec<ResourceId>> {
    let position: HashMap<&ResourceId, usize> = ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

    // A resource can only be deleted once everything that depended on it is gone
    let mut prereqs = vec![Vec::new(); ids.len()];
    for (i, id) in ids.iter().enumerate() {
        let Some(resource) = state.resources.get(id) else {
            continue;
        };
        for dep in &resource.dependencies {
            if let Some(&j) = position.get(dep)
                && j != i
            {
                prereqs[j].push(i);
            }
        }
    }

    kahn(&prereqs)
        .map(|order| order.into_iter().map(|i| ids[i].clone()).collect())
        .map_err(|stuck| {
            let mut cycle: Vec<ResourceId> = stuck.into_iter().map(|i| ids[i].clone()).collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            Error::CyclicDependency { cycle }
        })
}

/// Group nodes by depth: level 0 has no dependencies, level n depends on level n-1.
pub fn levels(graph: &ResourceGraph) -> Vec<Vec<ResourceId>> {
    let mut depth = vec![0usize; graph.len()];
    let mut out: Vec<Vec<ResourceId>> = Vec::new();

    for index in creation_indices(graph) {
        let level = graph
            .dependencies(index)
            .iter()
            .map(|&d| depth[d] + 1)
            .max()
            .unwrap_or(0);
        depth[index] = level;
        if out.len() <= level {
            out.resize_with(level + 1, Vec::new);
        }
        out[level].push(graph.node(index).id.clone());
    }

    out
}
