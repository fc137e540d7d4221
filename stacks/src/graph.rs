// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Directed acyclic build graph.
//!
//! Nodes are resource (or stack) definitions, edges read "must exist
//! before". [`BuildGraph::topological_order`] returns a deterministic build
//! order: among the nodes that are ready, the one inserted first goes first.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::GraphError;

#[derive(Debug, Clone)]
pub struct BuildGraph<N> {
    ids: Vec<String>,
    nodes: BTreeMap<String, N>,
    /// node -> nodes it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl<N> Default for BuildGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> BuildGraph<N> {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn add_node(&mut self, id: impl Into<String>, node: N) -> Result<(), GraphError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.ids.push(id.clone());
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Records that `node` must be built after `on`. Unknown ids are
    /// reported by [`topological_order`](Self::topological_order).
    pub fn add_dependency(&mut self, node: impl Into<String>, on: impl Into<String>) {
        self.edges.entry(node.into()).or_default().insert(on.into());
    }

    pub fn node(&self, id: &str) -> Option<&N> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl DoubleEndedIterator<Item = (&str, &N)> {
        self.ids
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|node| (id.as_str(), node)))
    }

    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(id)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn topological_order(&self) -> Result<Vec<&str>, GraphError> {
        for (node, deps) in &self.edges {
            if !self.nodes.contains_key(node) {
                return Err(GraphError::MissingDependency {
                    node: node.clone(),
                    missing: node.clone(),
                });
            }
            if let Some(missing) = deps.iter().find(|dep| !self.nodes.contains_key(*dep)) {
                return Err(GraphError::MissingDependency {
                    node: node.clone(),
                    missing: missing.clone(),
                });
            }
        }

        let index: BTreeMap<&str, usize> = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut pending: Vec<usize> = vec![0; self.ids.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.ids.len()];
        for (node, deps) in &self.edges {
            let n = index[node.as_str()];
            pending[n] = deps.len();
            for dep in deps {
                dependents[index[dep.as_str()]].push(n);
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.ids.len()).filter(|i| pending[*i] == 0).collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(next) = ready.pop_first() {
            order.push(self.ids[next].as_str());
            for dependent in &dependents[next] {
                pending[*dependent] -= 1;
                if pending[*dependent] == 0 {
                    ready.insert(*dependent);
                }
            }
        }

        if order.len() != self.ids.len() {
            let cycle = self
                .ids
                .iter()
                .enumerate()
                .filter(|(i, _)| pending[*i] > 0)
                .map(|(_, id)| id.clone())
                .collect();
            return Err(GraphError::Cycle(cycle));
        }

        Ok(order)
    }
}
