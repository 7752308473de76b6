// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use petgraph::{graph::DiGraph, visit::Dfs};

/// Given an input graph and starting node indices, construct a subgraph
/// containing only the nodes reachable from them.
pub fn subgraph<N, E>(graph: &DiGraph<N, E, u32>, starting_nodes: Vec<petgraph::graph::NodeIndex<u32>>) -> DiGraph<N, E, u32>
where
    N: Clone,
    E: Clone,
{
    let mut res = graph.clone();
    let mut keep = vec![false; graph.node_count()];

    let mut dfs = Dfs::empty(&graph);
    for start in starting_nodes {
        dfs.move_to(start);
        while let Some(node) = dfs.next(&graph) {
            keep[node.index()] = true;
        }
    }

    res.retain_nodes(|_, i| keep[i.index()]);
    res
}
