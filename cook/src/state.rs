// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Freshness checking (§4.6): a recursive per-node state machine
//! combining on-disk mtime, the command log's recorded mtime and
//! command hash, and depfile-discovered implicit inputs.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::{
    graph::{EdgeId, Graph, NodeId},
    log::CommandLog,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("primary input `{0}` does not exist")]
    MissingPrimaryInput(PathBuf),
}

/// File modification time, with `Missing` ordered as older than any
/// real timestamp so dirtiness comparisons don't need a special case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    /// Encode as nanoseconds since the Unix epoch, for storage in the
    /// command log; `Missing` encodes as zero.
    pub fn as_nanos(&self) -> u64 {
        match self {
            MTime::Missing => 0,
            MTime::Stamp(t) => t.duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0),
        }
    }

    pub fn from_nanos(nanos: u64) -> Self {
        MTime::Stamp(UNIX_EPOCH + std::time::Duration::from_nanos(nanos))
    }
}

pub fn stat(path: &Path) -> MTime {
    match fs::metadata(path) {
        Ok(meta) => meta.modified().map(MTime::Stamp).unwrap_or(MTime::Missing),
        Err(_) => MTime::Missing,
    }
}

/// Node state, per §3: starts `Unknown`, moves monotonically toward
/// `UpToDate` within a session (discovered deps aside, which re-expose
/// a node via [`FileState::reset`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    NotExist,
    Dirty,
    UpToDate,
}

impl NodeState {
    pub fn needs_rebuild(self) -> bool {
        matches!(self, NodeState::NotExist | NodeState::Dirty)
    }
}

/// Per-node state and mtime cache, populated lazily as nodes are
/// checked so a node is never stat'd twice in one session.
#[derive(Default)]
pub struct FileState {
    states: HashMap<NodeId, NodeState>,
    mtimes: HashMap<NodeId, MTime>,
}

impl FileState {
    pub fn state(&self, id: NodeId) -> NodeState {
        self.states.get(&id).copied().unwrap_or(NodeState::Unknown)
    }

    pub fn mtime(&self, id: NodeId) -> MTime {
        self.mtimes.get(&id).copied().unwrap_or(MTime::Missing)
    }

    /// Re-expose a node to reconsideration, used after its producing
    /// edge completes so `post_build` can record a fresh state.
    pub fn reset(&mut self, id: NodeId) {
        self.states.remove(&id);
        self.mtimes.remove(&id);
    }
}

/// Hash the fully-expanded command line the same way it'll be recorded
/// in the command log.
pub fn hash_command(command: &str) -> u64 {
    xxh3_64(command.as_bytes())
}

/// As `check_state`, but a no-op (returning the cached state) when the
/// node's state is already known (§4.6: "a no-op when state ≠
/// Unknown").
pub fn check_state_if_needed(
    graph: &Graph,
    fs: &mut FileState,
    log: &CommandLog,
    commands: &HashMap<EdgeId, String>,
    node_id: NodeId,
) -> Result<NodeState, Error> {
    let cached = fs.state(node_id);
    if cached != NodeState::Unknown {
        return Ok(cached);
    }
    check_state(graph, fs, log, commands, node_id)
}

/// Compute `node_id`'s freshness per the six steps of §4.6.
fn check_state(
    graph: &Graph,
    fs: &mut FileState,
    log: &CommandLog,
    commands: &HashMap<EdgeId, String>,
    node_id: NodeId,
) -> Result<NodeState, Error> {
    let node = graph.node(node_id);

    let state = match node.in_edge {
        // Step 1: a primary input with no producer must exist.
        None => {
            let mtime = stat(graph.path(node_id));
            if mtime == MTime::Missing {
                return Err(Error::MissingPrimaryInput(graph.path(node_id).to_path_buf()));
            }
            fs.mtimes.insert(node_id, mtime);
            NodeState::UpToDate
        }
        Some(edge_id) => {
            let mtime = stat(graph.path(node_id));
            if mtime == MTime::Missing {
                // Step 2.
                NodeState::NotExist
            } else {
                // Step 3: record mtime (discovered deps were already
                // spliced into the edge by `Graph::apply_discovered_deps`
                // before planning began).
                fs.mtimes.insert(node_id, mtime);

                let edge = graph.edge(edge_id);

                // Step 4: recurse over update_only_inputs.
                let mut dirty = false;
                let mut most_recent_input = MTime::Missing;
                for in_id in edge.ins.dirtying() {
                    let input_state = check_state_if_needed(graph, fs, log, commands, in_id)?;
                    let input_mtime = fs.mtime(in_id);
                    most_recent_input = most_recent_input.max(input_mtime);
                    if input_state.needs_rebuild() || input_mtime > mtime {
                        dirty = true;
                    }
                }

                if dirty {
                    NodeState::Dirty
                } else {
                    // Step 5/6: compare against the log entry.
                    let output_path = graph.path(node_id).to_string_lossy().into_owned();
                    match log.entry(&output_path) {
                        Some(entry) => {
                            let command = commands.get(&edge_id).map(String::as_str).unwrap_or_default();
                            let current_hash = hash_command(command);
                            if entry.hash != current_hash || most_recent_input > entry.mtime() {
                                NodeState::Dirty
                            } else {
                                NodeState::UpToDate
                            }
                        }
                        None => NodeState::Dirty,
                    }
                }
            }
        }
    };

    fs.states.insert(node_id, state);
    Ok(state)
}

/// Record the outcome of having just run `edge_id` with `command`:
/// restat its outputs (which MUST now exist), write a fresh log entry
/// for each, and mark them UpToDate.
pub fn post_build(
    graph: &Graph,
    fs: &mut FileState,
    log: &mut CommandLog,
    edge_id: EdgeId,
    command: &str,
    discovered_deps: Vec<String>,
) -> Result<(), io::Error> {
    let edge = graph.edge(edge_id);
    let hash = hash_command(command);

    for &id in edge.outs.explicit().iter().chain(edge.outs.implicit()) {
        fs.reset(id);
        let path = graph.path(id);
        let mtime = stat(path);
        if mtime == MTime::Missing {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("output `{}` was not produced", path.display())));
        }
        fs.mtimes.insert(id, mtime);
        fs.states.insert(id, NodeState::UpToDate);

        let output_path = path.to_string_lossy().into_owned();
        log.set_entry(output_path, mtime, hash, discovered_deps.clone());
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_status_orders_before_any_stamp() {
        assert!(MTime::Missing < MTime::Stamp(SystemTime::now()));
    }

    #[test]
    fn same_command_hashes_identically() {
        assert_eq!(hash_command("gcc -c a.c -o a.o"), hash_command("gcc -c a.c -o a.o"));
        assert_ne!(hash_command("gcc -c a.c -o a.o"), hash_command("gcc -c b.c -o b.o"));
    }

    #[test]
    fn mtime_nanos_round_trip() {
        let now = MTime::Stamp(UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000));
        assert_eq!(MTime::from_nanos(now.as_nanos()), now);
    }
}
