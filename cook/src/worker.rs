// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Runs one edge's command line to completion: tokenizes it POSIX-lite
//! (§4.8 step 1), spawns the resulting argv directly with combined
//! stdout+stderr capture, and ingests its depfile (if the rule declares
//! one) once it exits successfully.

use std::{io::Read, process::Stdio};

use fs_err as fs;
use thiserror::Error;
use tokio::process::Command;

use crate::depfile;

#[derive(Debug, Error)]
pub enum Error {
    #[error("empty command line")]
    EmptyCommand,
    #[error("unterminated quote in command line")]
    UnterminatedQuote,
    #[error("spawn command")]
    Spawn(#[source] std::io::Error),
    #[error("wait for command")]
    Wait(#[source] std::io::Error),
    #[error("create output pipe")]
    Pipe(#[source] nix::Error),
    #[error("read depfile `{path}`")]
    ReadDepfile { path: String, source: std::io::Error },
    #[error("parse depfile `{path}`")]
    ParseDepfile { path: String, source: depfile::ParseError },
}

/// The result of running one edge's command.
pub struct Outcome {
    pub success: bool,
    pub output: String,
    pub discovered_deps: Vec<String>,
}

/// Split `command` into argv per §4.8 step 1: whitespace separates
/// arguments, double-quotes group, and a backslash escapes any single
/// following character inside or outside quotes. No globbing or
/// variable substitution (that already happened during expansion).
pub fn tokenize(command: &str) -> Result<Vec<String>, Error> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(c) = chars.next() {
                                current.push(c);
                            } else {
                                return Err(Error::UnterminatedQuote);
                            }
                        }
                        Some(c) => current.push(c),
                        None => return Err(Error::UnterminatedQuote),
                    }
                }
            }
            '\\' => {
                in_token = true;
                if let Some(c) = chars.next() {
                    current.push(c);
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    if tokens.is_empty() {
        return Err(Error::EmptyCommand);
    }

    Ok(tokens)
}

/// Run `command`'s tokenized argv directly, capturing stdout and
/// stderr interleaved into a single buffer, then ingest `depfile` if
/// given and the command exited successfully.
pub async fn run(command: &str, depfile: Option<&str>) -> Result<Outcome, Error> {
    let argv = tokenize(command)?;

    let (read_fd, write_fd) = nix::unistd::pipe().map_err(Error::Pipe)?;
    let stderr_fd = nix::unistd::dup(&write_fd).map_err(Error::Pipe)?;

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::from(write_fd))
        .stderr(Stdio::from(stderr_fd))
        .spawn()
        .map_err(Error::Spawn)?;

    let mut reader = std::fs::File::from(read_fd);
    let read_task = tokio::task::spawn_blocking(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    });

    let status = child.wait().await.map_err(Error::Wait)?;
    let output_bytes = read_task.await.unwrap_or_default();
    let output = String::from_utf8_lossy(&output_bytes).into_owned();

    let mut discovered_deps = Vec::new();
    if status.success() {
        if let Some(path) = depfile {
            discovered_deps = ingest_depfile(path)?;
        }
    }

    Ok(Outcome {
        success: status.success(),
        output,
        discovered_deps,
    })
}

/// Read and parse `path` as a depfile, used after a successful run of a
/// rule that declares one. Per §4.8 step 4, the target is not enforced
/// here.
pub fn ingest_depfile(path: &str) -> Result<Vec<String>, Error> {
    let source = fs::read_to_string(path).map_err(|source| Error::ReadDepfile {
        path: path.to_owned(),
        source,
    })?;
    let parsed = depfile::parse(&source, None).map_err(|source| Error::ParseDepfile {
        path: path.to_owned(),
        source,
    })?;
    Ok(parsed.deps)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokenizes_simple_command() {
        assert_eq!(tokenize("gcc -c a.c -o a.o").unwrap(), vec!["gcc", "-c", "a.c", "-o", "a.o"]);
    }

    #[test]
    fn tokenizes_quoted_arguments() {
        assert_eq!(tokenize("echo \"quoted arg\"").unwrap(), vec!["echo", "quoted arg"]);
    }

    #[test]
    fn tokenizes_backslash_escapes() {
        assert_eq!(tokenize(r"echo a\ b").unwrap(), vec!["echo", "a b"]);
    }

    #[test]
    fn rejects_empty_command() {
        assert!(matches!(tokenize("   "), Err(Error::EmptyCommand)));
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(matches!(tokenize("echo \"unterminated"), Err(Error::UnterminatedQuote)));
    }

    #[tokio::test]
    async fn runs_command_and_captures_combined_output() {
        let outcome = run("sh -c \"echo out; echo err 1>&2\"", None).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
    }

    #[tokio::test]
    async fn reports_failure_status() {
        let outcome = run("sh -c \"exit 3\"", None).await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn escaped_space_in_path_survives_as_one_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my file.txt");
        std::fs::write(&path, b"hi").unwrap();
        let escaped = path.display().to_string().replace(' ', "\\ ");
        let outcome = run(&format!("cat {escaped}"), None).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("hi"));
    }
}
