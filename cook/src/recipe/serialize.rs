// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The inverse of [`super::parse`]: render a [`Recipe`] back to the
//! line-oriented text format. Used by the `--clean`-adjacent tooling
//! and by the round-trip tests (§8 S6).

use std::fmt::Write as _;

use super::{Build, DepsFormat, Recipe, Rule};

pub fn serialize(recipe: &Recipe) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "cacheDir {}", recipe.cache_dir.display());

    for (key, value) in &recipe.bindings {
        let _ = writeln!(out, "binding {key} = {value}");
    }

    for rule in &recipe.rules {
        out.push('\n');
        write_rule(&mut out, rule);
    }

    for build in &recipe.builds {
        out.push('\n');
        write_build(&mut out, build);
    }

    out
}

fn write_rule(out: &mut String, rule: &Rule) {
    let _ = writeln!(out, "rule {}", rule.name);
    if rule.description != super::DEFAULT_DESCRIPTION {
        let _ = writeln!(out, "    description {}", rule.description);
    }
    let _ = writeln!(out, "    command {}", rule.command);
    if let Some(depfile) = &rule.depfile {
        let _ = writeln!(out, "    depfile {depfile}");
    }
    if rule.deps != DepsFormat::None {
        let _ = writeln!(out, "    deps {}", rule.deps);
    }
    if rule.jobs != 1 {
        let _ = writeln!(out, "    jobs {}", rule.jobs);
    }
}

fn write_build(out: &mut String, build: &Build) {
    let _ = writeln!(out, "build {}", build.rule);
    for path in &build.inputs {
        let _ = writeln!(out, "    input {path}");
    }
    for path in &build.implicit_inputs {
        let _ = writeln!(out, "    implicitInput {path}");
    }
    for path in &build.order_only_inputs {
        let _ = writeln!(out, "    orderOnlyInput {path}");
    }
    for path in &build.outputs {
        let _ = writeln!(out, "    output {path}");
    }
    for path in &build.implicit_outputs {
        let _ = writeln!(out, "    implicitOutput {path}");
    }
    for (key, value) in &build.bindings {
        let _ = writeln!(out, "    binding {key} = {value}");
    }
    if let Some(jobs) = build.jobs {
        let _ = writeln!(out, "    jobs {jobs}");
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;
    use crate::recipe::parse;

    #[test]
    fn round_trips_through_parse() {
        let source = "\
cacheDir .cook

rule cc
    command gcc -c $in -o $out
    depfile $out.d
    deps gcc

build cc
    input src/main.c
    implicitInput include/config.h
    orderOnlyInput tools/gen
    output out/main.o
    jobs 2
";
        let recipe = parse::parse(Path::new("build.cook"), source).unwrap();
        let text = serialize(&recipe);
        let reparsed = parse::parse(Path::new("build.cook"), &text).unwrap();

        assert_eq!(recipe.cache_dir, reparsed.cache_dir);
        assert_eq!(recipe.rules.len(), reparsed.rules.len());
        assert_eq!(recipe.builds[0].outputs, reparsed.builds[0].outputs);
        assert_eq!(recipe.builds[0].implicit_inputs, reparsed.builds[0].implicit_inputs);
        assert_eq!(recipe.builds[0].order_only_inputs, reparsed.builds[0].order_only_inputs);
        assert_eq!(recipe.builds[0].jobs, reparsed.builds[0].jobs);
    }

    #[test]
    fn round_trips_bindings_and_cache_dir() {
        let mut recipe = Recipe {
            cache_dir: "/tmp/cache".into(),
            ..Recipe::default()
        };
        recipe.bindings.push(("cflags".to_owned(), "-O2".to_owned()));
        recipe.rules.push(Rule::new("cc"));
        recipe.rules[0].command = "gcc $cflags -c $in -o $out".to_owned();

        let text = serialize(&recipe);
        let reparsed = parse::parse(Path::new("build.cook"), &text).unwrap();

        assert_eq!(recipe.cache_dir, reparsed.cache_dir);
        assert_eq!(recipe.bindings, reparsed.bindings);
    }
}
