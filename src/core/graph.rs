//! Dependency graph for unit ordering.
//!
//! The graph is owned by the scheduler, not embedded in the units: edges
//! are `DiGraph` edges over unit ids, and cycle detection runs as a
//! separate pass at registration time so a cyclic batch is rejected before
//! anything executes.

use crate::core::unit::UnitId;
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct UnitRef {
    id: UnitId,
    label: String,
}

/// Directed dependency graph over unit ids.
///
/// An edge `a -> b` means `b` depends on `a`: `b` becomes eligible only
/// once `a` is finished.
#[derive(Clone, Default)]
pub struct DepGraph {
    graph: DiGraph<UnitRef, ()>,
    index: HashMap<UnitId, NodeIndex>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit node. Adding an already-known id is a no-op.
    pub fn add_unit(&mut self, id: UnitId, label: &str) {
        if self.index.contains_key(&id) {
            return;
        }
        let node = self.graph.add_node(UnitRef {
            id,
            label: label.to_string(),
        });
        self.index.insert(id, node);
    }

    /// Add a dependency edge: `dependent` waits for `dep`.
    ///
    /// Rejects unknown units and any edge that would close a cycle; the
    /// cycle error names the participating units.
    pub fn add_edge(&mut self, dep: &UnitId, dependent: &UnitId) -> Result<()> {
        let from = self.node(dep)?;
        let to = self.node(dependent)?;

        // Add tentatively, then check. On a cycle the participants are
        // computed while the offending edge is still present.
        let edge = self.graph.add_edge(from, to, ());
        if is_cyclic_directed(&self.graph) {
            let units = self.cycle_members(to);
            self.graph.remove_edge(edge);
            return Err(Error::DependencyCycle { units });
        }
        Ok(())
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dep: &UnitId, dependent: &UnitId) -> Result<()> {
        let from = self.node(dep)?;
        let to = self.node(dependent)?;
        let edge = self.graph.find_edge(from, to).ok_or_else(|| {
            Error::Validation(format!(
                "no dependency from {} to {}",
                dep.short(),
                dependent.short()
            ))
        })?;
        self.graph.remove_edge(edge);
        Ok(())
    }

    pub fn contains(&self, id: &UnitId) -> bool {
        self.index.contains_key(id)
    }

    pub fn unit_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn has_edge(&self, dep: &UnitId, dependent: &UnitId) -> bool {
        match (self.index.get(dep), self.index.get(dependent)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    /// Units the given unit depends on (incoming edges).
    pub fn dependencies_of(&self, id: &UnitId) -> Vec<UnitId> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    /// Units that depend on the given unit (outgoing edges).
    pub fn dependents_of(&self, id: &UnitId) -> Vec<UnitId> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    /// Ids of units whose dependencies are all in `finished`, excluding
    /// units already finished themselves.
    pub fn ready_units(&self, finished: &HashSet<UnitId>) -> Vec<UnitId> {
        self.graph
            .node_indices()
            .filter_map(|node| {
                let unit = &self.graph[node];
                if finished.contains(&unit.id) {
                    return None;
                }
                let satisfied = self
                    .graph
                    .neighbors_directed(node, petgraph::Direction::Incoming)
                    .all(|dep| finished.contains(&self.graph[dep].id));
                satisfied.then_some(unit.id)
            })
            .collect()
    }

    /// Whether every unit in the graph is in `finished`.
    pub fn all_finished(&self, finished: &HashSet<UnitId>) -> bool {
        self.graph
            .node_weights()
            .all(|unit| finished.contains(&unit.id))
    }

    fn node(&self, id: &UnitId) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or(Error::UnitNotFound { id: *id })
    }

    fn neighbors(&self, id: &UnitId, dir: petgraph::Direction) -> Vec<UnitId> {
        match self.index.get(id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, dir)
                .map(|n| self.graph[n].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Labels of the strongly connected component containing `node`, in a
    /// stable order, for cycle error reporting.
    fn cycle_members(&self, node: NodeIndex) -> Vec<String> {
        for scc in tarjan_scc(&self.graph) {
            if scc.len() > 1 && scc.contains(&node) {
                let mut names: Vec<String> = scc
                    .into_iter()
                    .map(|n| self.graph[n].label.clone())
                    .collect();
                names.sort();
                return names;
            }
        }
        // Self-edge: a single-node cycle.
        vec![self.graph[node].label.clone()]
    }
}

impl std::fmt::Debug for DepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepGraph")
            .field("units", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}
