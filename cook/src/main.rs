// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::error::Error;

use clap::Parser;

use cook::cli;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = cli::Command::parse();

    let code = match cli::process(command).await {
        Ok(code) => code,
        Err(error) => {
            report_error(&error);
            cli::ExitCode::SetupFailed
        }
    };

    std::process::exit(code as i32);
}

fn report_error(error: &cli::Error) {
    let sources = sources(error);
    eprintln!("error: {}", sources.join(": "));
}

fn sources(error: &cli::Error) -> Vec<String> {
    let mut sources = vec![error.to_string()];
    let mut source = error.source();
    while let Some(error) = source.take() {
        sources.push(error.to_string());
        source = error.source();
    }
    sources
}
