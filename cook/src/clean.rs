// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `cook --clean`: remove every output the recipe knows how to
//! produce, their depfiles, any parent directories left empty by doing
//! so, and the command log itself.

use log::warn;

use crate::{
    expand,
    graph::Graph,
    log::CommandLog,
    recipe::Binding,
    util::remove_dir_if_empty,
};

pub struct Report {
    pub removed_files: usize,
}

/// Delete every output produced by an edge in `graph` (source files
/// with no producer are left alone), then the command log.
pub fn run(graph: &Graph, recipe_bindings: &[Binding], log: CommandLog) -> Report {
    let mut removed_files = 0;

    for node in &graph.nodes {
        let Some(edge_id) = node.in_edge else {
            continue;
        };

        if remove_file(&node.path) {
            removed_files += 1;
        }
        if let Some(dir) = node.path.parent() {
            remove_dir_if_empty(dir);
        }

        let edge = graph.edge(edge_id);
        if let Some(template) = &edge.rule.depfile {
            if let Ok(depfile) = expand::expand(template, edge, graph, recipe_bindings) {
                if remove_file(std::path::Path::new(&depfile)) {
                    removed_files += 1;
                }
            }
        }
    }

    drop(log);
    let log_path = graph.cache_dir.join(".cook_log");
    if remove_file(&log_path) {
        removed_files += 1;
    }

    Report { removed_files }
}

fn remove_file(path: &std::path::Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            warn!("failed to remove `{}`: {err}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::recipe::{Build, Recipe, Rule};

    #[test]
    fn removes_only_produced_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.o");
        let src_path = dir.path().join("src.c");
        std::fs::write(&out_path, b"object").unwrap();
        std::fs::write(&src_path, b"source").unwrap();

        let mut recipe = Recipe {
            cache_dir: dir.path().to_path_buf(),
            ..Recipe::default()
        };
        recipe.rules.push(Rule::new("cc"));
        let mut build = Build::new("cc");
        build.outputs = vec![out_path.to_string_lossy().into_owned()];
        build.inputs = vec![src_path.to_string_lossy().into_owned()];
        recipe.builds.push(build);

        let graph = Graph::from_recipe(&recipe).unwrap();
        let log = CommandLog::open(dir.path()).unwrap();
        let report = run(&graph, &recipe.bindings, log);

        assert!(!out_path.exists());
        assert!(src_path.exists());
        assert!(report.removed_files >= 1);
    }
}
