// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The build graph: path-interned [`Node`]s connected by [`Edge`]s,
//! built from a [`Recipe`] and validated to be acyclic with a unique
//! producer per output path.

use std::{collections::HashMap, path::PathBuf};

use dag::Dag;
use thiserror::Error;

use crate::recipe::{Build, Recipe, Rule};

/// Index of a [`Node`] within a [`Graph`]. Stable for the lifetime of
/// the graph: nodes are only ever appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of an [`Edge`] within a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

/// A single interned filesystem path participating in the graph, either
/// as an input, an output, or both.
#[derive(Debug, Clone)]
pub struct Node {
    pub path: PathBuf,
    /// The edge that produces this node, if any. A node with no
    /// producer is a source file expected to already exist on disk.
    pub in_edge: Option<EdgeId>,
    /// Edges that consume this node as an input (explicit, implicit or
    /// order-only alike).
    pub out_edges: Vec<EdgeId>,
}

impl Node {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            in_edge: None,
            out_edges: Vec::new(),
        }
    }
}

/// The inputs of an [`Edge`], laid out as a single vector in the order
/// `explicit ‖ implicit ‖ discovered ‖ order_only` (§9 design note iv:
/// deps discovered via a depfile are inserted after the implicit-input
/// region and before order-only inputs, so they join
/// [`EdgeIns::dirtying`] without disturbing `$in`/order-only slicing).
#[derive(Debug, Clone, Default)]
pub struct EdgeIns {
    pub ids: Vec<NodeId>,
    /// Number of leading entries in `ids` that are explicit inputs
    /// (appear in `$in`).
    pub explicit: usize,
    /// Number of entries after the explicit ones that are implicit
    /// inputs (affect freshness, don't appear in `$in`).
    pub implicit: usize,
    /// Number of entries after the implicit ones that were appended by
    /// depfile ingestion.
    pub discovered: usize,
}

impl EdgeIns {
    pub fn explicit(&self) -> &[NodeId] {
        &self.ids[..self.explicit]
    }

    pub fn implicit(&self) -> &[NodeId] {
        &self.ids[self.explicit..self.explicit + self.implicit]
    }

    pub fn discovered(&self) -> &[NodeId] {
        let start = self.explicit + self.implicit;
        &self.ids[start..start + self.discovered]
    }

    pub fn order_only(&self) -> &[NodeId] {
        &self.ids[self.explicit + self.implicit + self.discovered..]
    }

    /// `update_only_inputs` (§3): explicit, implicit and discovered
    /// inputs, whose staleness should mark this edge dirty. Order-only
    /// inputs affect scheduling order but never the dirty decision.
    pub fn dirtying(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids[..self.explicit + self.implicit + self.discovered].iter().copied()
    }

    /// Insert newly-discovered dependency ids at the boundary between
    /// the implicit and order-only regions.
    fn insert_discovered(&mut self, new_ids: Vec<NodeId>) {
        let at = self.explicit + self.implicit + self.discovered;
        self.discovered += new_ids.len();
        self.ids.splice(at..at, new_ids);
    }
}

/// The outputs of an [`Edge`].
#[derive(Debug, Clone, Default)]
pub struct EdgeOuts {
    pub ids: Vec<NodeId>,
    /// Number of leading entries that are explicit outputs (appear in `$out`).
    pub explicit: usize,
}

impl EdgeOuts {
    pub fn explicit(&self) -> &[NodeId] {
        &self.ids[..self.explicit]
    }

    pub fn implicit(&self) -> &[NodeId] {
        &self.ids[self.explicit..]
    }
}

/// One instantiated build step: a rule applied to concrete inputs and outputs.
#[derive(Debug, Clone)]
pub struct Edge {
    pub rule: Rule,
    pub ins: EdgeIns,
    pub outs: EdgeOuts,
    pub bindings: Vec<(String, String)>,
    pub jobs: u32,
}

impl Edge {
    pub fn binding(&self, key: &str) -> Option<&str> {
        self.bindings.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Path-interned build graph plus the DAG used to validate it and drive
/// dependency-ordered traversal.
#[derive(Debug)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub cache_dir: PathBuf,
    pub(crate) paths: HashMap<PathBuf, NodeId>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("build references undefined rule `{0}`")]
    UndefinedRule(String),
    #[error("multiple rules produce `{0}`")]
    MultipleProducers(PathBuf),
    #[error("dependency cycle involving `{0}`")]
    Cycle(PathBuf),
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    #[error("build of rule `{0}` has jobs == 0")]
    ZeroJobs(String),
}

impl Graph {
    /// Intern `path`, creating a [`Node`] for it if this is the first
    /// time it's been seen.
    fn intern(&mut self, path: PathBuf) -> NodeId {
        if let Some(&id) = self.paths.get(&path) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(path.clone()));
        self.paths.insert(path, id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn get_node(&self, path: &std::path::Path) -> Option<NodeId> {
        self.paths.get(path).copied()
    }

    pub fn path(&self, id: NodeId) -> &std::path::Path {
        &self.nodes[id.0].path
    }

    /// Resolve `names` (as given on the command line) to node ids, or
    /// every node with no consumers if `names` is empty.
    pub fn targets(&self, names: &[String]) -> Result<Vec<NodeId>, Error> {
        if names.is_empty() {
            return Ok(self.default_targets());
        }
        names
            .iter()
            .map(|name| {
                self.get_node(std::path::Path::new(name))
                    .ok_or_else(|| Error::UnknownTarget(name.clone()))
            })
            .collect()
    }

    /// Outputs that aren't consumed as input by any other edge: the
    /// natural "build everything" target set.
    fn default_targets(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.in_edge.is_some() && node.out_edges.is_empty())
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Build a graph from a parsed recipe: intern every path, validate
    /// that each output has at most one producer, and check the result
    /// is acyclic.
    pub fn from_recipe(recipe: &Recipe) -> Result<Self, Error> {
        let mut graph = Graph {
            nodes: Vec::new(),
            edges: Vec::new(),
            cache_dir: recipe.cache_dir.clone(),
            paths: HashMap::new(),
        };

        for build in &recipe.builds {
            graph.add_build(recipe, build)?;
        }

        graph.check_acyclic()?;

        Ok(graph)
    }

    /// Splice dependencies discovered on a previous run (recorded in
    /// the command log against each of an edge's outputs) back into
    /// that edge's inputs, so the State Engine can see them as
    /// dirtying inputs without the command having to run first (§4.6
    /// step 3). Inserted after implicit inputs, before order-only
    /// inputs (§9 design note iv).
    pub fn apply_discovered_deps(&mut self, log: &crate::log::CommandLog) {
        for edge_idx in 0..self.edges.len() {
            let Some(&first_output) = self.edges[edge_idx].outs.ids.first() else {
                continue;
            };
            let output_path = self.path(first_output).to_string_lossy().into_owned();
            let deps = log.discovered_deps(&output_path).to_vec();
            if deps.is_empty() {
                continue;
            }

            let ids: Vec<NodeId> = deps.into_iter().map(|d| self.intern(PathBuf::from(d))).collect();
            for &id in &ids {
                self.nodes[id.0].out_edges.push(EdgeId(edge_idx));
            }

            self.edges[edge_idx].ins.insert_discovered(ids);
        }
    }

    fn add_build(&mut self, recipe: &Recipe, build: &Build) -> Result<(), Error> {
        let rule = recipe
            .rule(&build.rule)
            .cloned()
            .ok_or_else(|| Error::UndefinedRule(build.rule.clone()))?;

        let mut ins = EdgeIns {
            explicit: build.inputs.len(),
            implicit: build.implicit_inputs.len(),
            discovered: 0,
            ids: Vec::new(),
        };
        for path in build
            .inputs
            .iter()
            .chain(&build.implicit_inputs)
            .chain(&build.order_only_inputs)
        {
            ins.ids.push(self.intern(PathBuf::from(path)));
        }

        let mut outs = EdgeOuts {
            explicit: build.outputs.len(),
            ids: Vec::new(),
        };
        for path in build.outputs.iter().chain(&build.implicit_outputs) {
            outs.ids.push(self.intern(PathBuf::from(path)));
        }

        let jobs = build.jobs.unwrap_or(rule.jobs);
        if jobs == 0 {
            return Err(Error::ZeroJobs(rule.name.clone()));
        }

        let edge_id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            rule,
            ins,
            outs: outs.clone(),
            bindings: build.bindings.clone(),
            jobs,
        });

        for &out_id in &outs.ids {
            let node = &mut self.nodes[out_id.0];
            if let Some(existing) = node.in_edge {
                if existing != edge_id {
                    return Err(Error::MultipleProducers(node.path.clone()));
                }
            }
            node.in_edge = Some(edge_id);
        }

        for &in_id in &self.edges[edge_id.0].ins.ids {
            self.nodes[in_id.0].out_edges.push(edge_id);
        }

        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), Error> {
        let mut dag: Dag<NodeId> = Dag::new();
        for (i, _) in self.nodes.iter().enumerate() {
            dag.add_node_or_get_index(NodeId(i));
        }
        for edge in &self.edges {
            for &out_id in edge.outs.ids.iter() {
                let out_idx = dag.add_node_or_get_index(out_id);
                for &in_id in &edge.ins.ids {
                    let in_idx = dag.add_node_or_get_index(in_id);
                    dag.add_edge(in_idx, out_idx);
                }
            }
        }
        dag.toposort()
            .map(|_| ())
            .map_err(|node| Error::Cycle(self.path(*node).to_path_buf()))
    }

    /// All ancestor nodes of `targets`, in dependency order (producers
    /// before consumers), including the targets themselves.
    pub fn plan_order(&self, targets: &[NodeId]) -> Result<Vec<NodeId>, Error> {
        let mut dag: Dag<NodeId> = Dag::new();
        for edge in &self.edges {
            for &out_id in &edge.outs.ids {
                let out_idx = dag.add_node_or_get_index(out_id);
                for &in_id in &edge.ins.ids {
                    let in_idx = dag.add_node_or_get_index(in_id);
                    dag.add_edge(in_idx, out_idx);
                }
            }
        }
        for &target in targets {
            dag.add_node_or_get_index(target);
        }

        let sub = dag.subgraph(targets);
        sub.toposort()
            .map(|order| order.into_iter().copied().collect())
            .map_err(|node| Error::Cycle(self.path(*node).to_path_buf()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::recipe::{Build, Recipe, Rule};

    fn recipe_with(builds: Vec<Build>) -> Recipe {
        let mut recipe = Recipe::default();
        recipe.rules.push(Rule::new("cc"));
        recipe.builds = builds;
        recipe
    }

    #[test]
    fn interns_shared_paths() {
        let mut a = Build::new("cc");
        a.outputs = vec!["out/a.o".into()];
        a.inputs = vec!["src/shared.h".into()];
        let mut b = Build::new("cc");
        b.outputs = vec!["out/b.o".into()];
        b.inputs = vec!["src/shared.h".into()];

        let graph = Graph::from_recipe(&recipe_with(vec![a, b])).unwrap();
        assert_eq!(graph.nodes.len(), 4);
    }

    #[test]
    fn rejects_multiple_producers() {
        let mut a = Build::new("cc");
        a.outputs = vec!["out/x.o".into()];
        a.inputs = vec!["src/a.c".into()];
        let mut b = Build::new("cc");
        b.outputs = vec!["out/x.o".into()];
        b.inputs = vec!["src/b.c".into()];

        let err = Graph::from_recipe(&recipe_with(vec![a, b])).unwrap_err();
        assert!(matches!(err, Error::MultipleProducers(_)));
    }

    #[test]
    fn rejects_cycle() {
        let mut a = Build::new("cc");
        a.outputs = vec!["a".into()];
        a.inputs = vec!["b".into()];
        let mut b = Build::new("cc");
        b.outputs = vec!["b".into()];
        b.inputs = vec!["a".into()];

        let err = Graph::from_recipe(&recipe_with(vec![a, b])).unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));
    }
}
