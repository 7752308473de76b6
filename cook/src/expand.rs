// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Variable expansion: `$var`, `$$`, `$in`, `$out` resolved against a
//! two-level binding lookup (the owning Build's bindings, then the
//! Recipe's top-level bindings), per §4.5.

use std::fmt;

use crate::graph::{Edge, Graph, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub template: String,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "empty variable name in template `{}`", self.template)
    }
}

impl std::error::Error for Error {}

/// Expand every `$`-reference in `text` against `edge`'s local
/// bindings, falling back to `recipe_bindings` and finally the
/// built-in `in`/`out` variables computed from `edge`'s explicit
/// inputs/outputs. An empty variable name (`$` followed by anything
/// but a name character, `$` or `{`) is a fatal error naming `text`.
pub fn expand(text: &str, edge: &Edge, graph: &Graph, recipe_bindings: &[(String, String)]) -> Result<String, Error> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some(c) if is_var_start(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if is_var_char(c) {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&lookup(&name, edge, graph, recipe_bindings));
            }
            _ => {
                return Err(Error {
                    template: text.to_owned(),
                });
            }
        }
    }

    Ok(out)
}

fn is_var_start(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Two-level lookup, per §4.5: the Build's local bindings, then the
/// Recipe's top-level bindings, then the built-in `in`/`out`. Missing
/// keys expand to the empty string (not an error).
fn lookup(name: &str, edge: &Edge, graph: &Graph, recipe_bindings: &[(String, String)]) -> String {
    if let Some(value) = edge.binding(name) {
        return value.to_owned();
    }

    if let Some((_, value)) = recipe_bindings.iter().find(|(k, _)| k == name) {
        return value.clone();
    }

    match name {
        "in" => join_paths(graph, edge.ins.explicit()),
        "out" => join_paths(graph, edge.outs.explicit()),
        _ => String::new(),
    }
}

fn join_paths(graph: &Graph, ids: &[NodeId]) -> String {
    ids.iter()
        .map(|&id| escape_path(&graph.path(id).display().to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape a path for inclusion in a space-joined `$in`/`$out` value:
/// spaces become `\ `, double quotes become `\"` (§4.5).
fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => escaped.push_str("\\ "),
            '"' => escaped.push_str("\\\""),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{EdgeIns, EdgeOuts, Graph};
    use crate::recipe::Rule;

    fn graph_with_edge(inputs: &[&str], outputs: &[&str]) -> (Graph, crate::graph::EdgeId) {
        let mut graph = Graph {
            nodes: Vec::new(),
            edges: Vec::new(),
            cache_dir: ".".into(),
            paths: Default::default(),
        };
        let in_ids: Vec<_> = inputs.iter().map(|p| intern(&mut graph, p)).collect();
        let out_ids: Vec<_> = outputs.iter().map(|p| intern(&mut graph, p)).collect();

        let edge = Edge {
            rule: Rule::new("cc"),
            ins: EdgeIns {
                ids: in_ids,
                explicit: inputs.len(),
                implicit: 0,
                discovered: 0,
            },
            outs: EdgeOuts {
                ids: out_ids,
                explicit: outputs.len(),
            },
            bindings: vec![("extra".into(), "flags".into())],
            jobs: 1,
        };
        graph.edges.push(edge);
        (graph, crate::graph::EdgeId(0))
    }

    fn intern(graph: &mut Graph, path: &str) -> NodeId {
        let id = NodeId(graph.nodes.len());
        graph.nodes.push(crate::graph::Node {
            path: path.into(),
            in_edge: None,
            out_edges: Vec::new(),
        });
        id
    }

    #[test]
    fn expands_in_and_out() {
        let (graph, edge_id) = graph_with_edge(&["a.c", "b.c"], &["out.o"]);
        let edge = graph.edge(edge_id);
        let result = expand("cc $in -o $out", edge, &graph, &[]).unwrap();
        assert_eq!(result, "cc a.c b.c -o out.o");
    }

    #[test]
    fn expands_local_binding_and_literal_dollar() {
        let (graph, edge_id) = graph_with_edge(&["a.c"], &["out.o"]);
        let edge = graph.edge(edge_id);
        let result = expand("cc $extra $$HOME", edge, &graph, &[]).unwrap();
        assert_eq!(result, "cc flags $HOME");
    }

    #[test]
    fn falls_back_to_recipe_bindings() {
        let (graph, edge_id) = graph_with_edge(&["a.c"], &["out.o"]);
        let edge = graph.edge(edge_id);
        let bindings = vec![("cflags".to_owned(), "-O2".to_owned())];
        let result = expand("cc $cflags", edge, &graph, &bindings).unwrap();
        assert_eq!(result, "cc -O2");
    }

    #[test]
    fn escapes_spaces_and_quotes_in_in_out() {
        let (graph, edge_id) = graph_with_edge(&["my file.c"], &["out \"1\".o"]);
        let edge = graph.edge(edge_id);
        let result = expand("cc $in -o $out", edge, &graph, &[]).unwrap();
        assert_eq!(result, "cc my\\ file.c -o out\\ \\\"1\\\".o");
    }

    #[test]
    fn rejects_empty_variable_name() {
        let (graph, edge_id) = graph_with_edge(&["a.c"], &["out.o"]);
        let edge = graph.edge(edge_id);
        let err = expand("cc $.", edge, &graph, &[]).unwrap_err();
        assert_eq!(err.template, "cc $.");
    }

    #[test]
    fn rejects_dollar_at_end_of_template() {
        let (graph, edge_id) = graph_with_edge(&["a.c"], &["out.o"]);
        let edge = graph.edge(edge_id);
        assert!(expand("cc $", edge, &graph, &[]).is_err());
    }
}
