//! Resource graph builder
//!
//! Turns a list of declarations into a directed acyclic graph. Nodes keep
//! their declaration index, which the resolver uses to break ties so that
//! orderings are reproducible across runs.

use crate::error::{Error, Result};
use crate::resource::{ResourceDecl, ResourceId};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: Vec<ResourceDecl>,
    index: HashMap<ResourceId, usize>,
    /// `deps[i]`: nodes that `i` depends on
    deps: Vec<Vec<usize>>,
    /// `rdeps[i]`: nodes that depend on `i`
    rdeps: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl ResourceGraph {
    /// Build the graph, failing on duplicate ids, dangling references or cycles.
    pub fn build(decls: Vec<ResourceDecl>) -> Result<Self> {
        let mut index = HashMap::with_capacity(decls.len());
        for (i, decl) in decls.iter().enumerate() {
            if index.insert(decl.id.clone(), i).is_some() {
                return Err(Error::DuplicateResource {
                    id: decl.id.clone(),
                });
            }
        }

        let mut deps = vec![Vec::new(); decls.len()];
        let mut rdeps = vec![Vec::new(); decls.len()];
        for (i, decl) in decls.iter().enumerate() {
            for dep in decl.dependency_ids() {
                if dep == decl.id {
                    return Err(Error::SelfReference {
                        id: decl.id.clone(),
                    });
                }
                let j = *index.get(&dep).ok_or_else(|| Error::UnresolvedReference {
                    from: decl.id.clone(),
                    to: dep.clone(),
                })?;
                deps[i].push(j);
                rdeps[j].push(i);
            }
        }
        for list in deps.iter_mut().chain(rdeps.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let graph = Self {
            nodes: decls,
            index,
            deps,
            rdeps,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited
                && let Some(cycle) = self.find_cycle(start, &mut marks)
            {
                return Err(Error::CyclicDependency {
                    cycle: cycle.into_iter().map(|i| self.nodes[i].id.clone()).collect(),
                });
            }
        }
        Ok(())
    }

    /// Depth-first search from `start` with an explicit stack of
    /// `(node, next dependency to visit)`, so long chains cannot overflow.
    fn find_cycle(&self, start: usize, marks: &mut [Mark]) -> Option<Vec<usize>> {
        let mut stack = vec![(start, 0)];
        marks[start] = Mark::InProgress;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(&dep) = self.deps[node].get(frame.1) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;
            match marks[dep] {
                Mark::InProgress => {
                    let from = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut cycle: Vec<usize> = stack[from..].iter().map(|&(n, _)| n).collect();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    marks[dep] = Mark::InProgress;
                    stack.push((dep, 0));
                }
                Mark::Done => {}
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declarations in declaration order.
    pub fn decls(&self) -> &[ResourceDecl] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &ResourceDecl {
        &self.nodes[index]
    }

    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDecl> {
        self.position(id).map(|i| &self.nodes[i])
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Indices of the nodes `index` depends on.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.deps[index]
    }

    /// Indices of the nodes that depend on `index`.
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.rdeps[index]
    }

    pub(crate) fn dependency_lists(&self) -> &[Vec<usize>] {
        &self.deps
    }

    pub(crate) fn dependent_lists(&self) -> &[Vec<usize>] {
        &self.rdeps
    }

    /// Every node that depends on `index`, directly or transitively.
    pub fn transitive_dependents(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![index];
        while let Some(node) = stack.pop() {
            for &dependent in &self.rdeps[node] {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
        seen
    }

    /// Graphviz rendering, edges pointing from dependent to dependency.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph resources {\n  rankdir = \"RL\";\n");
        for node in &self.nodes {
            let _ = writeln!(out, "  \"{}\" [shape = box];", node.id);
        }
        for (i, deps) in self.deps.iter().enumerate() {
            for &j in deps {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", self.nodes[i].id, self.nodes[j].id);
            }
        }
        out.push_str("}\n");
        out
    }
}
