// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Makefile-style depfile parsing, as emitted by `gcc -MMD -MF`:
//!
//! ```text
//! out/main.o: src/main.c src/config.h \
//!   include/stdlib.h
//! ```
//!
//! Backslash-newline continues a rule onto the next line; `\ ` escapes
//! a literal space inside a path. Only the first `target: deps` rule in
//! the file is consumed — a depfile describing more than one target is
//! malformed for our purposes, since each edge owns exactly one depfile.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "depfile: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// The `target: dep dep ...` parsed out of a depfile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Depfile {
    pub target: String,
    pub deps: Vec<String>,
}

/// Parse a depfile's contents, joining backslash-continued lines before
/// tokenizing on whitespace with `\ ` treated as an escaped space. If
/// `expected_target` is given and doesn't match the depfile's own
/// target, fail (§4.3).
pub fn parse(source: &str, expected_target: Option<&str>) -> Result<Depfile, ParseError> {
    let joined = join_continuations(source);
    let line = joined.trim();
    if line.is_empty() {
        return Ok(Depfile::default());
    }

    let (target, rest) = line.split_once(':').ok_or_else(|| ParseError {
        message: "missing `:` separating target from dependencies".to_owned(),
    })?;
    let target = unescape(target.trim());

    if let Some(expected) = expected_target {
        if target != expected {
            return Err(ParseError {
                message: format!("depfile target `{target}` does not match expected target `{expected}`"),
            });
        }
    }

    let deps = tokenize(rest);

    Ok(Depfile { target, deps })
}

fn join_continuations(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && matches!(chars.peek(), Some('\n')) {
            chars.next();
            out.push(' ');
        } else {
            out.push(c);
        }
    }

    out
}

fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some(' ')) => {
                chars.next();
                current.push(' ');
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

fn unescape(s: &str) -> String {
    s.replace("\\ ", " ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_single_line() {
        let dep = parse("out/main.o: src/main.c src/config.h\n", None).unwrap();
        assert_eq!(dep.target, "out/main.o");
        assert_eq!(dep.deps, vec!["src/main.c", "src/config.h"]);
    }

    #[test]
    fn joins_continuations() {
        let dep = parse("out/main.o: src/main.c \\\n  include/stdlib.h\n", None).unwrap();
        assert_eq!(dep.deps, vec!["src/main.c", "include/stdlib.h"]);
    }

    #[test]
    fn unescapes_spaces_in_paths() {
        let dep = parse("out/main.o: src/my\\ file.c\n", None).unwrap();
        assert_eq!(dep.deps, vec!["src/my file.c"]);
    }

    #[test]
    fn empty_input_yields_empty_depfile() {
        let dep = parse("", None).unwrap();
        assert_eq!(dep, Depfile::default());
    }

    #[test]
    fn rejects_missing_colon() {
        let err = parse("out/main.o src/main.c\n", None).unwrap_err();
        assert!(err.message.contains("`:`"));
    }

    #[test]
    fn accepts_matching_expected_target() {
        let dep = parse("out/main.o: src/main.c\n", Some("out/main.o")).unwrap();
        assert_eq!(dep.target, "out/main.o");
    }

    #[test]
    fn rejects_mismatched_expected_target() {
        let err = parse("out/main.o: src/main.c\n", Some("out/other.o")).unwrap_err();
        assert!(err.message.contains("does not match"));
    }
}
