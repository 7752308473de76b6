// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The persistent `.cook_log`: one line per output path recording the
//! mtime and command hash recorded when it was last produced, plus any
//! dependencies discovered via its depfile, so [`crate::state`] can
//! tell a content-identical rebuild from a genuine change. An advisory
//! `flock` keeps two concurrent `cook` invocations in the same cache
//! directory from corrupting each other's log.

use std::{
    collections::HashMap,
    io::{self, BufRead, Write},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};

use fs_err::{File, OpenOptions};
use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

use crate::state::MTime;

const LOG_FILE_NAME: &str = ".cook_log";

#[derive(Debug, Error)]
pub enum Error {
    #[error("open command log")]
    Open(#[source] io::Error),
    #[error("lock command log")]
    Lock(#[source] nix::Error),
    #[error("read command log")]
    Read(#[source] io::Error),
    #[error("write command log")]
    Write(#[source] io::Error),
    #[error("malformed command log entry on line {line}: `{text}`")]
    Malformed { line: usize, text: String },
}

/// A single `.cook_log` record (§3): the output's mtime at completion,
/// the hash of the command that produced it, and any dependencies
/// discovered via its depfile on that run (§4.6 step 3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    pub mtime_nanos: u64,
    pub hash: u64,
    pub discovered_deps: Vec<String>,
}

impl LogEntry {
    pub fn mtime(&self) -> MTime {
        MTime::from_nanos(self.mtime_nanos)
    }
}

/// In-memory view of `.cook_log`, loaded in full on open and rewritten
/// in full on [`CommandLog::close`]. Entries are keyed by output path
/// since a path has at most one producing edge (§4.4).
pub struct CommandLog {
    path: PathBuf,
    file: File,
    entries: HashMap<String, LogEntry>,
    dirty: bool,
}

impl CommandLog {
    /// Open (creating if needed) and exclusively lock the command log
    /// under `cache_dir`. The lock is held until [`CommandLog::close`]
    /// drops the file handle.
    pub fn open(cache_dir: &Path) -> Result<Self, Error> {
        std::fs::create_dir_all(cache_dir).map_err(Error::Open)?;
        let path = cache_dir.join(LOG_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(Error::Open)?;

        flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(Error::Lock)?;

        let entries = read_entries(&path)?;

        Ok(Self {
            path,
            file,
            entries,
            dirty: false,
        })
    }

    /// The entry last recorded for `output`, if any.
    pub fn entry(&self, output: &str) -> Option<&LogEntry> {
        self.entries.get(output)
    }

    /// Dependencies discovered via `output`'s depfile on the run that
    /// last produced it, if any were recorded.
    pub fn discovered_deps(&self, output: &str) -> &[String] {
        self.entries.get(output).map(|e| e.discovered_deps.as_slice()).unwrap_or_default()
    }

    /// Record that `output` was produced with mtime `mtime`, by a
    /// command hashing to `hash`, along with any dependencies
    /// discovered via its depfile, to be persisted on
    /// [`CommandLog::close`].
    pub fn set_entry(&mut self, output: String, mtime: MTime, hash: u64, discovered_deps: Vec<String>) {
        self.entries.insert(
            output,
            LogEntry {
                mtime_nanos: mtime.as_nanos(),
                hash,
                discovered_deps,
            },
        );
        self.dirty = true;
    }

    /// Drop an output's entry, used by the clean operation to keep the
    /// log from referencing paths that no longer exist.
    pub fn remove_entry(&mut self, output: &str) {
        if self.entries.remove(output).is_some() {
            self.dirty = true;
        }
    }

    /// Flush pending changes to disk and release the lock. Rewrites the
    /// whole file rather than appending, so the log never accumulates
    /// stale duplicate entries for a path whose hash changed.
    pub fn close(mut self) -> Result<(), Error> {
        if self.dirty {
            self.flush()?;
        }
        // Lock is released implicitly when `self.file` is dropped.
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path.with_extension("tmp"))
            .map_err(Error::Write)?;

        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (output, entry) in entries {
            if entry.discovered_deps.is_empty() {
                writeln!(tmp, "{output}\t{}\t{:016x}", entry.mtime_nanos, entry.hash).map_err(Error::Write)?;
            } else {
                writeln!(
                    tmp,
                    "{output}\t{}\t{:016x}\t{}",
                    entry.mtime_nanos,
                    entry.hash,
                    entry.discovered_deps.join("\u{1f}")
                )
                .map_err(Error::Write)?;
            }
        }
        tmp.flush().map_err(Error::Write)?;

        fs_err::rename(self.path.with_extension("tmp"), &self.path).map_err(Error::Write)?;
        self.dirty = false;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<HashMap<String, LogEntry>, Error> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(Error::Read(err)),
    };

    let mut entries = HashMap::new();
    for (num, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(Error::Read)?;
        if line.trim().is_empty() {
            continue;
        }

        let malformed = || Error::Malformed {
            line: num + 1,
            text: line.clone(),
        };

        let mut parts = line.split('\t');
        let output = parts.next().ok_or_else(malformed)?;
        let mtime_nanos: u64 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let hash = parts.next().ok_or_else(malformed)?;
        let hash = u64::from_str_radix(hash, 16).map_err(|_| malformed())?;
        let discovered_deps = match parts.next() {
            Some(deps) => deps.split('\u{1f}').map(str::to_owned).collect(),
            None => Vec::new(),
        };

        entries.insert(
            output.to_owned(),
            LogEntry {
                mtime_nanos,
                hash,
                discovered_deps,
            },
        );
    }

    Ok(entries)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CommandLog::open(dir.path()).unwrap();
        log.set_entry("out/main.o".into(), MTime::from_nanos(123), 0xdead_beef, Vec::new());
        log.close().unwrap();

        let log = CommandLog::open(dir.path()).unwrap();
        assert_eq!(log.entry("out/main.o").map(|e| e.hash), Some(0xdead_beef));
        assert_eq!(log.entry("out/main.o").map(|e| e.mtime_nanos), Some(123));
        assert!(log.entry("out/other.o").is_none());
    }

    #[test]
    fn round_trips_discovered_deps() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CommandLog::open(dir.path()).unwrap();
        log.set_entry(
            "out/main.o".into(),
            MTime::from_nanos(1),
            1,
            vec!["a.h".into(), "b.h".into()],
        );
        log.close().unwrap();

        let log = CommandLog::open(dir.path()).unwrap();
        assert_eq!(log.discovered_deps("out/main.o"), &["a.h".to_owned(), "b.h".to_owned()]);
    }

    #[test]
    fn remove_entry_marks_dirty_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CommandLog::open(dir.path()).unwrap();
        log.set_entry("out/a.o".into(), MTime::from_nanos(1), 1, Vec::new());
        log.close().unwrap();

        let mut log = CommandLog::open(dir.path()).unwrap();
        log.remove_entry("out/a.o");
        log.close().unwrap();

        let log = CommandLog::open(dir.path()).unwrap();
        assert!(log.entry("out/a.o").is_none());
    }
}
