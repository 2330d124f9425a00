//! Plain-text history logs written by backup runs
//!
//! A backup run writes to two sinks: the full-history log, one file
//! appended to by every run, and the partial-history log of the current
//! day, kept beside the day directories. Every line also goes to `tracing`
//! so the console shows the same run.
//!
//! The logger is an explicit value handed to the engine. Both files are
//! flushed by [`RunLog::finish`] and, if the run bails out early, by `Drop`.

use crate::error::Result;
use crate::types::{FileIssue, SnapshotDay};
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which history log a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// Full-history log only
    Full,
    /// Today's partial-history log only
    Partial,
    /// Both logs
    Both,
}

impl Sink {
    fn full(self) -> bool {
        matches!(self, Sink::Full | Sink::Both)
    }

    fn partial(self) -> bool {
        matches!(self, Sink::Partial | Sink::Both)
    }
}

/// Dual-sink run logger
#[derive(Debug)]
pub struct RunLog {
    full: Option<BufWriter<File>>,
    partial: Option<BufWriter<File>>,
    write_error: Option<std::io::Error>,
}

impl RunLog {
    /// Open both logs in append mode, creating parent directories
    pub fn open(full_path: &Path, partial_path: &Path) -> Result<Self> {
        Ok(Self {
            full: Some(open_append(full_path)?),
            partial: Some(open_append(partial_path)?),
            write_error: None,
        })
    }

    /// Logger that only emits `tracing` events
    pub fn console_only() -> Self {
        Self {
            full: None,
            partial: None,
            write_error: None,
        }
    }

    /// Name of the partial-history log of `day` under `partial_root`
    pub fn partial_log_path(partial_root: &Path, day: SnapshotDay) -> PathBuf {
        partial_root.join(format!("backup-partial-{}.log", day))
    }

    /// Write a line to the full-history log
    pub fn log_full(&mut self, msg: impl Display) {
        self.write(Sink::Full, &msg.to_string());
    }

    /// Write a line to today's partial-history log
    pub fn log_partial(&mut self, msg: impl Display) {
        self.write(Sink::Partial, &msg.to_string());
    }

    /// Write a line to both logs
    pub fn log_both(&mut self, msg: impl Display) {
        self.write(Sink::Both, &msg.to_string());
    }

    /// Record a per-file problem in the given logs
    pub fn issue(&mut self, sink: Sink, issue: &FileIssue) {
        let line = issue.to_string();
        warn!(target: "dabbak::run", "{}", line);
        self.append(sink, &line);
    }

    /// Flush both logs, reporting the first write failure of the run
    pub fn finish(mut self) -> Result<()> {
        self.flush();
        match self.write_error.take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn write(&mut self, sink: Sink, line: &str) {
        info!(target: "dabbak::run", "{}", line);
        self.append(sink, line);
    }

    fn append(&mut self, sink: Sink, line: &str) {
        let mut result = Ok(());
        if sink.full() {
            if let Some(full) = self.full.as_mut() {
                result = result.and(writeln!(full, "{}", line));
            }
        }
        if sink.partial() {
            if let Some(partial) = self.partial.as_mut() {
                result = result.and(writeln!(partial, "{}", line));
            }
        }
        if let Err(e) = result {
            self.remember(e);
        }
    }

    fn flush(&mut self) {
        for writer in [self.full.as_mut(), self.partial.as_mut()].into_iter().flatten() {
            if let Err(e) = writer.flush() {
                if self.write_error.is_none() {
                    self.write_error = Some(e);
                }
            }
        }
    }

    fn remember(&mut self, e: std::io::Error) {
        if self.write_error.is_none() {
            warn!("Run log write failed: {}", e);
            self.write_error = Some(e);
        }
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}
