// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use petgraph::{
    algo::toposort,
    prelude::DiGraph,
    visit::{Dfs, Walker},
};

pub mod subgraph;

/// NodeIndex as employed by `Dag` usage
pub type NodeIndex = petgraph::prelude::NodeIndex<u32>;

/// Simplistic encapsulation of petgraph APIs to provide
/// suitable mechanisms for dependency-ordered traversal
#[derive(Debug, Clone)]
pub struct Dag<N>(DiGraph<N, (), u32>);

impl<N> Default for Dag<N> {
    fn default() -> Self {
        Self(DiGraph::default())
    }
}

impl<N> Dag<N>
where
    N: Clone + PartialEq,
{
    /// Construct a new Dag
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds node N to the graph and returns the index.
    /// If N already exists, it'll return the index of that node.
    pub fn add_node_or_get_index(&mut self, node: N) -> NodeIndex {
        if let Some(index) = self.get_index(&node) {
            index
        } else {
            self.0.add_node(node)
        }
    }

    /// Returns true if the node exists
    pub fn node_exists(&self, node: &N) -> bool {
        self.get_index(node).is_some()
    }

    /// Add an edge from a to b, unconditionally. Unlike a conventional
    /// dependency dag, cycle detection is deferred to [`Dag::cycle`] so
    /// that callers can report the whole offending cycle rather than
    /// just the edge that would have closed it.
    pub fn add_edge(&mut self, a: NodeIndex, b: NodeIndex) {
        if self.0.find_edge(a, b).is_none() {
            self.0.add_edge(a, b, ());
        }
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &'_ N> {
        self.0.node_indices().map(|i| &self.0[i])
    }

    /// Perform a depth-first search, given the start index
    pub fn dfs(&self, start: NodeIndex) -> impl Iterator<Item = &'_ N> {
        let dfs = Dfs::new(&self.0, start);
        dfs.iter(&self.0).map(|i| &self.0[i])
    }

    /// Split the graph at the given start node(s), returning a new graph
    /// containing only nodes reachable from them.
    pub fn subgraph(&self, starting_nodes: &[N]) -> Self {
        let start_indices = starting_nodes
            .iter()
            .filter_map(|n| self.get_index(n))
            .collect();
        Self(subgraph::subgraph(&self.0, start_indices))
    }

    /// Return the index for node of type N
    pub fn get_index(&self, node: &N) -> Option<NodeIndex> {
        self.0.node_indices().find(|i| self.0[*i] == *node)
    }

    /// Return a topological order of the graph's nodes, or the node
    /// that closes a cycle if the graph isn't a DAG.
    pub fn toposort(&self) -> Result<Vec<&'_ N>, &'_ N> {
        toposort(&self.0, None)
            .map(|order| order.into_iter().map(|i| &self.0[i]).collect())
            .map_err(|cycle| &self.0[cycle.node_id()])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_cycle() {
        let mut dag = Dag::new();
        let a = dag.add_node_or_get_index("a");
        let b = dag.add_node_or_get_index("b");
        let c = dag.add_node_or_get_index("c");
        dag.add_edge(a, b);
        dag.add_edge(b, c);
        dag.add_edge(c, a);

        assert!(dag.toposort().is_err());
    }

    #[test]
    fn orders_acyclic_graph() {
        let mut dag = Dag::new();
        let a = dag.add_node_or_get_index("a");
        let b = dag.add_node_or_get_index("b");
        let c = dag.add_node_or_get_index("c");
        dag.add_edge(a, b);
        dag.add_edge(a, c);
        dag.add_edge(b, c);

        let order = dag.toposort().unwrap();
        assert_eq!(order, vec![&"a", &"b", &"c"]);
    }
}
