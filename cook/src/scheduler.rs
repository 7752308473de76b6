// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Drives the build: walks the plan in dependency order, keeps a
//! ready-queue of edges whose inputs are no longer pending, and spawns
//! [`crate::worker`] runs up to a job budget. Edges become ready as
//! soon as every edge that produces one of their inputs has finished,
//! not when the whole graph settles, so independent subtrees overlap.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    expand,
    graph::{EdgeId, Graph, NodeId},
    log::CommandLog,
    recipe::Binding,
    state::{self, FileState},
    worker,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] crate::graph::Error),
    #[error(transparent)]
    CommandLog(#[from] crate::log::Error),
    #[error(transparent)]
    Expand(#[from] expand::Error),
    #[error(transparent)]
    State(#[from] state::Error),
    #[error("`{0}` failed:\n{1}")]
    EdgeFailed(String, String),
    #[error("worker")]
    Worker(#[from] worker::Error),
    #[error(transparent)]
    PostBuild(#[from] std::io::Error),
    #[error("deadlock: no edge is ready but {0} edge(s) remain to build")]
    Deadlock(usize),
}

/// Outcome of a full scheduler run.
#[derive(Debug)]
pub struct Report {
    pub ran: usize,
    pub skipped: usize,
}

struct PendingEdge {
    id: EdgeId,
    /// Number of this edge's inputs that are still pending (produced by
    /// an edge that hasn't finished, or not yet determined to exist).
    waiting_on: usize,
}

/// Build every edge required by `targets`, respecting `max_jobs`
/// concurrent running commands. `force` skips the freshness check
/// entirely and rebuilds everything in the plan.
pub async fn run(
    graph: &Graph,
    recipe_bindings: &[Binding],
    log: &mut CommandLog,
    targets: &[NodeId],
    max_jobs: u32,
    force: bool,
) -> Result<Report, Error> {
    let order = graph.plan_order(targets)?;
    let edges_in_plan: Vec<EdgeId> = order.iter().filter_map(|&id| graph.node(id).in_edge).collect();
    let edges_in_plan: Vec<EdgeId> = dedup(edges_in_plan);

    let mut file_state = FileState::default();

    if edges_in_plan.is_empty() {
        for &target in targets {
            state::check_state_if_needed(graph, &mut file_state, log, &HashMap::new(), target)?;
        }
        return Ok(Report { ran: 0, skipped: 0 });
    }

    // Every edge's command is expanded once up front: the State Engine
    // needs the hash of every edge it may recurse into, not just the
    // ones actually dispatched.
    let mut commands: HashMap<EdgeId, String> = HashMap::new();
    for &edge_id in &edges_in_plan {
        let edge = graph.edge(edge_id);
        let command = expand::expand(&edge.rule.command, edge, graph, recipe_bindings)?;
        commands.insert(edge_id, command);
    }

    // Primary inputs that don't exist are a fatal setup error (§4.6 step 1).
    for &target in targets {
        state::check_state_if_needed(graph, &mut file_state, log, &commands, target)?;
    }

    let mut pending: HashMap<EdgeId, PendingEdge> = HashMap::new();
    let mut producer_of: HashMap<NodeId, EdgeId> = HashMap::new();
    let mut waiters: HashMap<EdgeId, Vec<EdgeId>> = HashMap::new();

    for &edge_id in &edges_in_plan {
        for &out_id in &graph.edge(edge_id).outs.ids {
            producer_of.insert(out_id, edge_id);
        }
    }

    let in_plan: HashSet<EdgeId> = edges_in_plan.iter().copied().collect();

    for &edge_id in &edges_in_plan {
        let edge = graph.edge(edge_id);
        let mut waiting_on = 0;
        for in_id in edge.ins.dirtying() {
            if let Some(&producer) = producer_of.get(&in_id) {
                if in_plan.contains(&producer) {
                    waiting_on += 1;
                    waiters.entry(producer).or_default().push(edge_id);
                }
            }
        }
        pending.insert(edge_id, PendingEdge { id: edge_id, waiting_on });
    }

    let mut ready: Vec<EdgeId> = pending
        .values()
        .filter(|p| p.waiting_on == 0)
        .map(|p| p.id)
        .collect();

    let mut budget: i64 = max_jobs as i64;
    let mut running = 0usize;
    let mut ran = 0usize;
    let mut skipped = 0usize;
    let mut remaining = edges_in_plan.len();

    let (tx, mut rx) = mpsc::unbounded_channel::<(EdgeId, Result<Vec<String>, Error>)>();

    loop {
        while budget > 0 {
            let Some(edge_id) = ready.pop() else { break };
            pending.remove(&edge_id);

            let edge = graph.edge(edge_id);
            let command = commands[&edge_id].clone();
            let jobs = edge.jobs;

            let mut needs_build = force;
            if !needs_build {
                for &out_id in edge.outs.explicit().iter().chain(edge.outs.implicit()) {
                    let state = state::check_state_if_needed(graph, &mut file_state, log, &commands, out_id)?;
                    if state.needs_rebuild() {
                        needs_build = true;
                    }
                }
            }

            if !needs_build {
                skipped += 1;
                remaining -= 1;
                promote_dependents(edge_id, &waiters, &mut pending, &mut ready);
                continue;
            }

            budget -= jobs as i64;
            running += 1;

            info!("{}", edge_description(edge, graph, recipe_bindings));

            let depfile = match &edge.rule.depfile {
                Some(template) => Some(expand::expand(template, edge, graph, recipe_bindings)?),
                None => None,
            };
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = worker::run(&command, depfile.as_deref()).await;
                let result = match result {
                    Ok(outcome) if outcome.success => Ok(outcome.discovered_deps),
                    Ok(outcome) => Err(Error::EdgeFailed(command.clone(), outcome.output)),
                    Err(err) => Err(Error::Worker(err)),
                };
                let _ = tx.send((edge_id, result));
            });
        }

        if remaining == 0 {
            break;
        }

        if running == 0 {
            return Err(Error::Deadlock(remaining));
        }

        let Some((edge_id, result)) = rx.recv().await else {
            break;
        };
        running -= 1;
        remaining -= 1;

        let edge = graph.edge(edge_id);
        budget += edge.jobs as i64;

        let discovered_deps = result?;

        let command = commands[&edge_id].clone();
        state::post_build(graph, &mut file_state, log, edge_id, &command, discovered_deps)?;
        ran += 1;

        promote_dependents(edge_id, &waiters, &mut pending, &mut ready);
    }

    debug!("build finished: {ran} ran, {skipped} skipped");

    Ok(Report { ran, skipped })
}

/// Decrement the `waiting_on` count of every edge blocked on `finished`
/// and move any that reach zero onto the ready queue.
fn promote_dependents(
    finished: EdgeId,
    waiters: &HashMap<EdgeId, Vec<EdgeId>>,
    pending: &mut HashMap<EdgeId, PendingEdge>,
    ready: &mut Vec<EdgeId>,
) {
    let Some(dependents) = waiters.get(&finished) else {
        return;
    };
    for &dependent in dependents {
        if let Some(entry) = pending.get_mut(&dependent) {
            entry.waiting_on = entry.waiting_on.saturating_sub(1);
            if entry.waiting_on == 0 {
                ready.push(dependent);
            }
        }
    }
}

fn dedup(mut ids: Vec<EdgeId>) -> Vec<EdgeId> {
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(*id));
    ids
}

fn edge_description(edge: &crate::graph::Edge, graph: &Graph, recipe_bindings: &[Binding]) -> String {
    if edge.rule.description != crate::recipe::DEFAULT_DESCRIPTION {
        expand::expand(&edge.rule.description, edge, graph, recipe_bindings).unwrap_or_else(|_| edge.rule.description.clone())
    } else {
        let outs: Vec<_> = edge.outs.explicit().iter().map(|&id| graph.path(id).display().to_string()).collect();
        format!("[{}] {}", edge.rule.name, outs.join(" "))
    }
}
