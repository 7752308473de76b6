// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Line-oriented parser for the recipe text format.
//!
//! ```text
//! cacheDir .cook
//!
//! rule cc
//!     description Compiling $out
//!     command gcc -MMD -MF $out.d -c $in -o $out
//!     depfile $out.d
//!     deps gcc
//!
//! build cc
//!     input src/main.c
//!     output out/main.o
//! ```
//!
//! Every `rule`/`build` block is terminated by a blank line (or EOF);
//! body lines carry a single leading run of whitespace, any width.
//! Unknown keys inside a block are a parse error naming the file and
//! line number.

use std::{fmt, path::Path};

use super::{Build, Recipe, Rule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

struct Parser<'a> {
    file: String,
    lines: std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>,
}

impl<'a> Parser<'a> {
    fn new(file: String, source: &'a str) -> Self {
        Self {
            file,
            lines: source.lines().enumerate().peekable(),
        }
    }

    fn err(&self, line: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.clone(),
            line: line + 1,
            message: message.into(),
        }
    }

    /// Split an indented body line into its keyword and the rest of
    /// the line (trimmed), failing if the line carries no keyword.
    fn split_keyword<'l>(&self, num: usize, raw: &'l str) -> Result<(&'l str, &'l str), ParseError> {
        let trimmed = raw.trim_start();
        match trimmed.split_once(char::is_whitespace) {
            Some((keyword, rest)) => Ok((keyword, rest.trim())),
            None if !trimmed.is_empty() => Ok((trimmed, "")),
            None => Err(self.err(num, "expected a keyword")),
        }
    }
}

pub fn parse(path: &Path, source: &str) -> Result<Recipe, ParseError> {
    let file = path.display().to_string();
    let mut parser = Parser::new(file, source);
    let mut recipe = Recipe::default();
    let mut saw_cache_dir = false;

    while let Some(&(num, raw)) = parser.lines.peek() {
        let line = raw.trim();

        if line.is_empty() {
            parser.lines.next();
            continue;
        }

        if is_indented(raw) {
            return Err(parser.err(num, format!("unexpected indented line `{line}`")));
        }

        let (keyword, rest) = parser.split_keyword(num, line)?;

        match keyword {
            "cacheDir" => {
                parser.lines.next();
                if rest.is_empty() {
                    return Err(parser.err(num, "cacheDir requires a path"));
                }
                recipe.cache_dir = Path::new(rest).to_path_buf();
                saw_cache_dir = true;
            }
            "binding" => {
                parser.lines.next();
                recipe.bindings.push(parse_binding(&parser, num, rest)?);
            }
            "rule" => {
                parser.lines.next();
                if rest.is_empty() {
                    return Err(parser.err(num, "rule requires a name"));
                }
                if recipe.rules.iter().any(|r| r.name == rest) {
                    return Err(parser.err(num, format!("duplicate rule `{rest}`")));
                }
                let rule = parse_rule_block(&mut parser, rest)?;
                recipe.rules.push(rule);
            }
            "build" => {
                parser.lines.next();
                if rest.is_empty() {
                    return Err(parser.err(num, "build requires a rule name"));
                }
                let build = parse_build_block(&mut parser, rest)?;
                recipe.builds.push(build);
            }
            other => return Err(parser.err(num, format!("unrecognized top-level keyword `{other}`"))),
        }
    }

    if !saw_cache_dir {
        recipe.cache_dir = Path::new(".cook").to_path_buf();
    }

    for build in &recipe.builds {
        if recipe.rule(&build.rule).is_none() {
            return Err(ParseError {
                file: path.display().to_string(),
                line: 0,
                message: format!("build references undefined rule `{}`", build.rule),
            });
        }
    }

    check_unique_outputs(&recipe)?;

    Ok(recipe)
}

fn is_indented(raw: &str) -> bool {
    raw.starts_with(' ') || raw.starts_with('\t')
}

fn parse_binding(parser: &Parser<'_>, num: usize, rest: &str) -> Result<(String, String), ParseError> {
    let (key, value) = rest
        .split_once('=')
        .ok_or_else(|| parser.err(num, "expected `binding <key> = <value>`"))?;
    Ok((key.trim().to_owned(), value.trim().to_owned()))
}

fn parse_rule_block(parser: &mut Parser<'_>, name: &str) -> Result<Rule, ParseError> {
    let mut rule = Rule::new(name);

    while let Some(&(num, raw)) = parser.lines.peek() {
        if raw.trim().is_empty() {
            parser.lines.next();
            break;
        }
        if !is_indented(raw) {
            break;
        }
        parser.lines.next();

        let (keyword, rest) = parser.split_keyword(num, raw)?;
        match keyword {
            "description" => rule.description = rest.to_owned(),
            "command" => rule.command = rest.to_owned(),
            "depfile" => rule.depfile = Some(rest.to_owned()),
            "deps" => {
                rule.deps = rest.parse().map_err(|message| parser.err(num, message))?;
            }
            "jobs" => rule.jobs = parse_jobs(parser, num, rest)?,
            other => return Err(parser.err(num, format!("unknown rule key `{other}`"))),
        }
    }

    Ok(rule)
}

fn parse_build_block(parser: &mut Parser<'_>, rule_name: &str) -> Result<Build, ParseError> {
    let mut build = Build::new(rule_name);

    while let Some(&(num, raw)) = parser.lines.peek() {
        if raw.trim().is_empty() {
            parser.lines.next();
            break;
        }
        if !is_indented(raw) {
            break;
        }
        parser.lines.next();

        let (keyword, rest) = parser.split_keyword(num, raw)?;
        match keyword {
            "input" => build.inputs.push(require_path(parser, num, rest)?),
            "implicitInput" => build.implicit_inputs.push(require_path(parser, num, rest)?),
            "orderOnlyInput" => build.order_only_inputs.push(require_path(parser, num, rest)?),
            "output" => build.outputs.push(require_path(parser, num, rest)?),
            "implicitOutput" => build.implicit_outputs.push(require_path(parser, num, rest)?),
            "binding" => build.bindings.push(parse_binding(parser, num, rest)?),
            "jobs" => build.jobs = Some(parse_jobs(parser, num, rest)?),
            other => return Err(parser.err(num, format!("unknown build key `{other}`"))),
        }
    }

    Ok(build)
}

fn require_path(parser: &Parser<'_>, num: usize, rest: &str) -> Result<String, ParseError> {
    if rest.is_empty() {
        return Err(parser.err(num, "expected a path"));
    }
    Ok(rest.to_owned())
}

fn parse_jobs(parser: &Parser<'_>, num: usize, rest: &str) -> Result<u32, ParseError> {
    let jobs: u32 = rest.parse().map_err(|_| parser.err(num, format!("invalid jobs value `{rest}`")))?;
    if jobs == 0 {
        return Err(parser.err(num, "jobs must be positive"));
    }
    Ok(jobs)
}

/// §3: each output path must be produced by at most one Build, across
/// the whole recipe (explicit and implicit outputs alike).
fn check_unique_outputs(recipe: &Recipe) -> Result<(), ParseError> {
    let mut seen = std::collections::HashSet::new();
    for build in &recipe.builds {
        for path in build.outputs.iter().chain(&build.implicit_outputs) {
            if !seen.insert(path) {
                return Err(ParseError {
                    file: String::new(),
                    line: 0,
                    message: format!("multiple builds produce `{path}`"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_recipe() {
        let source = "\
cacheDir .cook

rule cc
    command gcc -c $in -o $out

build cc
    input src/main.c
    output out/main.o
";
        let recipe = parse(Path::new("build.cook"), source).unwrap();
        assert_eq!(recipe.cache_dir, Path::new(".cook"));
        assert_eq!(recipe.rules.len(), 1);
        assert_eq!(recipe.rules[0].name, "cc");
        assert_eq!(recipe.builds.len(), 1);
        assert_eq!(recipe.builds[0].outputs, vec!["out/main.o"]);
        assert_eq!(recipe.builds[0].inputs, vec!["src/main.c"]);
    }

    #[test]
    fn parses_implicit_and_order_only_inputs() {
        let source = "\
rule cc
    command gcc -c $in -o $out

build cc
    input src/main.c
    implicitInput include/config.h
    orderOnlyInput tools/gen
    output out/main.o
";
        let recipe = parse(Path::new("build.cook"), source).unwrap();
        let build = &recipe.builds[0];
        assert_eq!(build.inputs, vec!["src/main.c"]);
        assert_eq!(build.implicit_inputs, vec!["include/config.h"]);
        assert_eq!(build.order_only_inputs, vec!["tools/gen"]);
    }

    #[test]
    fn parses_bindings_and_jobs() {
        let source = "\
rule cc
    command gcc -c $in -o $out
    jobs 2

build cc
    input a.c
    output a.o
    binding cflags = -O2
    jobs 3
";
        let recipe = parse(Path::new("build.cook"), source).unwrap();
        assert_eq!(recipe.rules[0].jobs, 2);
        assert_eq!(recipe.builds[0].jobs, Some(3));
        assert_eq!(recipe.builds[0].bindings, vec![("cflags".to_owned(), "-O2".to_owned())]);
    }

    #[test]
    fn rejects_build_with_undefined_rule() {
        let source = "\
build missing
    input in
    output out
";
        let err = parse(Path::new("build.cook"), source).unwrap_err();
        assert!(err.message.contains("undefined rule"));
    }

    #[test]
    fn rejects_duplicate_rule_names() {
        let source = "\
rule cc
    command gcc

rule cc
    command clang
";
        let err = parse(Path::new("build.cook"), source).unwrap_err();
        assert!(err.message.contains("duplicate rule"));
    }

    #[test]
    fn rejects_unknown_rule_key() {
        let source = "\
rule cc
    bogus 1
";
        let err = parse(Path::new("build.cook"), source).unwrap_err();
        assert!(err.message.contains("unknown rule key"));
    }

    #[test]
    fn rejects_zero_jobs() {
        let source = "\
rule cc
    command gcc
    jobs 0
";
        let err = parse(Path::new("build.cook"), source).unwrap_err();
        assert!(err.message.contains("positive"));
    }

    #[test]
    fn rejects_duplicate_output_producers() {
        let source = "\
rule cc
    command gcc -c $in -o $out

build cc
    input a.c
    output out.o

build cc
    input b.c
    output out.o
";
        let err = parse(Path::new("build.cook"), source).unwrap_err();
        assert!(err.message.contains("multiple builds produce"));
    }
}
