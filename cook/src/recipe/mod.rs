// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Value types for the declarative recipe: [`Rule`], [`Build`] and
//! [`Recipe`] itself, plus the line-oriented text (de)serialization
//! described by the on-disk recipe format.

use std::{
    env, fmt, io,
    path::{Path, PathBuf},
};

use fs_err as fs;
use thiserror::Error;

mod parse;
mod serialize;

pub use self::parse::ParseError;

/// Default description template applied to a [`Rule`] that doesn't
/// declare one of its own.
pub const DEFAULT_DESCRIPTION: &str = "Processing $in";

/// `deps` tag on a [`Rule`]. `Msvc` and `Dmd` are reserved: the loader
/// accepts them but the scheduler treats them identically to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepsFormat {
    #[default]
    None,
    Gcc,
    Msvc,
    Dmd,
}

impl DepsFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepsFormat::None => "none",
            DepsFormat::Gcc => "gcc",
            DepsFormat::Msvc => "msvc",
            DepsFormat::Dmd => "dmd",
        }
    }
}

impl fmt::Display for DepsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DepsFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DepsFormat::None),
            "gcc" => Ok(DepsFormat::Gcc),
            "msvc" => Ok(DepsFormat::Msvc),
            "dmd" => Ok(DepsFormat::Dmd),
            other => Err(format!("unknown deps format: {other}")),
        }
    }
}

/// An immutable template for producing outputs from inputs via a command line.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub command: String,
    pub depfile: Option<String>,
    pub deps: DepsFormat,
    pub jobs: u32,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: DEFAULT_DESCRIPTION.to_owned(),
            command: String::new(),
            depfile: None,
            deps: DepsFormat::None,
            jobs: 1,
        }
    }
}

/// A single key/value binding, as found in a [`Build`]'s local bindings
/// or a [`Recipe`]'s top-level bindings.
pub type Binding = (String, String);

/// An instantiation of a [`Rule`] with concrete input/output paths and
/// optional local bindings.
#[derive(Debug, Clone)]
pub struct Build {
    pub rule: String,
    pub inputs: Vec<String>,
    pub implicit_inputs: Vec<String>,
    pub order_only_inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub implicit_outputs: Vec<String>,
    pub bindings: Vec<Binding>,
    pub jobs: Option<u32>,
}

impl Build {
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            inputs: Vec::new(),
            implicit_inputs: Vec::new(),
            order_only_inputs: Vec::new(),
            outputs: Vec::new(),
            implicit_outputs: Vec::new(),
            bindings: Vec::new(),
            jobs: None,
        }
    }
}

/// The declarative input to the build engine: rules, builds, top-level
/// bindings and the cache directory they share.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub rules: Vec<Rule>,
    pub builds: Vec<Build>,
    pub bindings: Vec<Binding>,
    pub cache_dir: PathBuf,
}

impl Default for Recipe {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            builds: Vec::new(),
            bindings: Vec::new(),
            cache_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl Recipe {
    /// Load and parse a recipe from `path`. Relative input/output/depfile
    /// paths are rebased so they remain correct from the process's
    /// current working directory, per the recipe file's own location.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let mut recipe = parse::parse(path, &source)?;

        if let Some(recipe_dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            rebase(&mut recipe, recipe_dir);
        }

        Ok(recipe)
    }

    /// Serialize back to the line-oriented text format (§4.1).
    pub fn to_text(&self) -> String {
        serialize::serialize(self)
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn binding(&self, key: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Rebase every path-shaped field of a freshly-parsed recipe onto
/// `recipe_dir`, unless it was already absolute.
fn rebase(recipe: &mut Recipe, recipe_dir: &Path) {
    let rebase_one = |value: &mut String| {
        let p = Path::new(value.as_str());
        if p.is_relative() {
            *value = recipe_dir.join(p).to_string_lossy().into_owned();
        }
    };

    if recipe.cache_dir.is_relative() {
        recipe.cache_dir = recipe_dir.join(&recipe.cache_dir);
    }

    for build in &mut recipe.builds {
        for list in [
            &mut build.inputs,
            &mut build.implicit_inputs,
            &mut build.order_only_inputs,
            &mut build.outputs,
            &mut build.implicit_outputs,
        ] {
            for value in list.iter_mut() {
                rebase_one(value);
            }
        }
    }

    for rule in &mut recipe.rules {
        if let Some(depfile) = &mut rule.depfile {
            rebase_one(depfile);
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("load recipe")]
    Load(#[from] io::Error),
    #[error("parse recipe")]
    Parse(#[from] ParseError),
}
