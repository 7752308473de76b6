// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::{clean, graph::Graph, log::CommandLog, recipe::Recipe, scheduler};

/// cook - a small parallel build engine.
#[derive(Debug, Parser)]
#[command(name = "cook", version)]
pub struct Command {
    /// Path to the recipe file.
    #[arg(short, long, default_value = "./cook.recipe")]
    pub recipe: PathBuf,

    /// Number of concurrent jobs. Defaults to the number of logical CPUs.
    #[arg(short = 'j', long)]
    pub jobs: Option<u32>,

    /// Rebuild every target even if it appears up to date.
    #[arg(short, long)]
    pub force: bool,

    /// Remove every output the recipe knows how to produce, then exit.
    #[arg(long, conflicts_with_all = ["jobs", "force"])]
    pub clean: bool,

    /// Targets to build. Defaults to every output with no further consumer.
    pub targets: Vec<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("load recipe")]
    Recipe(#[from] crate::recipe::Error),
    #[error("build graph")]
    Graph(#[from] crate::graph::Error),
    #[error("command log")]
    CommandLog(#[from] crate::log::Error),
    #[error("build")]
    Scheduler(#[from] scheduler::Error),
}

/// Process exit codes, per §6: 0 on success, 1 on an argument error or
/// missing/malformed recipe, 2 on a build failure.
pub enum ExitCode {
    Success = 0,
    SetupFailed = 1,
    BuildFailed = 2,
}

pub async fn process(command: Command) -> Result<ExitCode, Error> {
    let recipe = Recipe::load(&command.recipe)?;
    let mut graph = Graph::from_recipe(&recipe)?;

    if command.clean {
        let log = CommandLog::open(&graph.cache_dir)?;
        let report = clean::run(&graph, &recipe.bindings, log);
        log::info!("removed {} file(s)", report.removed_files);
        return Ok(ExitCode::Success);
    }

    let mut log = CommandLog::open(&graph.cache_dir)?;
    graph.apply_discovered_deps(&log);

    let targets = match graph.targets(&command.targets) {
        Ok(targets) => targets,
        Err(err) => {
            let _ = log.close();
            return Err(scheduler::Error::from(err).into());
        }
    };

    let max_jobs = command.jobs.unwrap_or_else(|| num_cpus::get() as u32).max(1);

    let result = scheduler::run(&graph, &recipe.bindings, &mut log, &targets, max_jobs, command.force).await;

    log.close()?;

    match result {
        Ok(report) => {
            log::info!("{} built, {} skipped", report.ran, report.skipped);
            Ok(ExitCode::Success)
        }
        Err(scheduler::Error::EdgeFailed(command, output)) => {
            eprintln!("FAILED: {command}");
            if !output.is_empty() {
                eprintln!("{output}");
            }
            Ok(ExitCode::BuildFailed)
        }
        Err(err) => Err(err.into()),
    }
}
