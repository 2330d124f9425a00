//! Backup engine: one run of the full-mirror / day-snapshot state machine
//!
//! ## Overview
//!
//! A run scans every source root, compares each file's [`Fingerprint`]
//! against the full state persisted by the previous run and classifies it:
//!
//! | Class     | Condition                                        | Action                                   |
//! |-----------|--------------------------------------------------|------------------------------------------|
//! | new       | not in the full state                            | copy to mirror and today's directory     |
//! | changed   | fingerprint differs                              | copy to mirror and today's directory     |
//! | carried   | unchanged, but already marked changed today      | keep (or restore) today's copy           |
//! | unchanged | unchanged otherwise                              | nothing                                  |
//! | deleted   | in the full state, not seen by this run          | remove from mirror and today's directory |
//!
//! Paths are joined between the source, the mirror and the day directory
//! through their relative path, see [`SourceSet::relative_path`].
//!
//! ## Day semantics
//!
//! Marking a file changed is sticky for the rest of the day: today's
//! partial state (`__state.json`) lists every path copied into today's
//! directory, and later runs on the same day keep those paths in the
//! snapshot even when they have not changed again. A path deleted from the
//! source is removed from today's directory as well.
//!
//! ## Failure handling
//!
//! Per-file problems never stop the run. They are logged to the relevant
//! history log(s) as they happen, repeated in an error summary at the end
//! and returned in [`BackupReport::issues`]:
//!
//! - a file that cannot be stat'ed or copied is left out of the new full
//!   state but its mirror copy is kept, so the next run sees it as new;
//! - when a directory cannot be read, previous entries beneath it are
//!   carried forward unchanged instead of being treated as deleted;
//! - a mirror removal that fails keeps the entry so the next run retries;
//! - an entry that no longer falls under any configured source is kept and
//!   reported again on every run.
//!
//! Failing to write the full state is fatal: the run returns the error.

use crate::config::{Config, SourceSet};
use crate::error::{DabbakError, Result};
use crate::run_log::{RunLog, Sink};
use crate::scanner::TreeScanner;
use crate::state::{self, FingerprintMap, DAY_FULL_STATE_FILE, DAY_PARTIAL_STATE_FILE};
use crate::types::{BackupReport, FileIssue, Fingerprint, IssueKind, SnapshotDay};
use crate::utils::{self, Removal};
use chrono::Local;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Runs backups for one configuration
#[derive(Debug, Clone)]
pub struct BackupEngine<'a> {
    config: &'a Config,
    today: SnapshotDay,
}

impl<'a> BackupEngine<'a> {
    /// Engine writing into today's (local time) day directory
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            today: SnapshotDay::today(),
        }
    }

    /// Use a specific day directory instead of today's
    pub fn with_day(mut self, day: SnapshotDay) -> Self {
        self.today = day;
        self
    }

    /// Day directory this engine writes into
    pub fn day(&self) -> SnapshotDay {
        self.today
    }

    /// Run a backup, writing the full- and partial-history logs
    pub fn run(&self) -> Result<BackupReport> {
        let partial_log =
            RunLog::partial_log_path(&self.config.destination.directory_partial, self.today);
        let mut log = RunLog::open(&self.config.full_log_file, &partial_log)?;
        let report = self.run_with_log(&mut log)?;
        log.finish()?;
        Ok(report)
    }

    /// Run a backup reporting through the given logger
    #[instrument(skip_all, fields(day = %self.today))]
    pub fn run_with_log(&self, log: &mut RunLog) -> Result<BackupReport> {
        let start = Instant::now();
        let sources = self.config.sources();
        let dest_full = &self.config.destination.directory_full;
        let day_dir = self
            .config
            .destination
            .directory_partial
            .join(self.today.dir_name());

        self.log_header(log, &sources, &day_dir);

        log.log_both("read state");
        let previous = state::load(&self.config.full_state_file)?;
        let previous_partial = state::load(&day_dir.join(DAY_PARTIAL_STATE_FILE))?;

        fs::create_dir_all(dest_full)?;
        if !day_dir.exists() {
            log.log_partial(format!("create {}", day_dir.display()));
            fs::create_dir_all(&day_dir)?;
        }

        let mut pass = Pass {
            sources: &sources,
            dest_full,
            day_dir: &day_dir,
            previous: &previous,
            previous_partial: &previous_partial,
            new_full: FingerprintMap::new(),
            new_partial: FingerprintMap::new(),
            seen: HashSet::new(),
            pending: HashSet::new(),
            unreadable: Vec::new(),
            issues: Vec::new(),
            report: BackupReport {
                day: Some(self.today),
                ..Default::default()
            },
        };

        let (roots, failures) = sources.expand_roots();
        for (path, error) in failures {
            pass.unreadable.push(path.clone());
            pass.record(log, Sink::Both, FileIssue::new(path, IssueKind::Walk, error));
        }

        for root in &roots {
            log.log_both(format!("processing {}", root.root.display()));
            let scanner = TreeScanner::new(&root.root, &sources.excludes);
            for item in scanner.scan() {
                match item {
                    Ok(path) => pass.process_file(log, &path),
                    Err(error) => {
                        let path = match &error {
                            DabbakError::WalkDir(e) => {
                                e.path().map(Path::to_path_buf).unwrap_or_else(|| root.root.clone())
                            }
                            _ => root.root.clone(),
                        };
                        pass.unreadable.push(path.clone());
                        pass.record(log, Sink::Both, FileIssue::new(path, IssueKind::Walk, error));
                    }
                }
            }
        }

        pass.remove_deleted(log);

        log.log_both("write state");
        state::save(&self.config.full_state_file, &pass.new_full)?;
        log.log_partial("copying state to partial folder");
        state::save(&day_dir.join(DAY_FULL_STATE_FILE), &pass.new_full)?;
        state::save(&day_dir.join(DAY_PARTIAL_STATE_FILE), &pass.new_partial)?;

        let Pass { mut report, issues, .. } = pass;

        for sink in [Sink::Full, Sink::Partial] {
            let matching: Vec<_> = issues
                .iter()
                .filter(|(s, _)| *s == sink || *s == Sink::Both)
                .collect();
            if matching.is_empty() {
                continue;
            }
            write_line(log, sink, "Errors:");
            for (_, issue) in matching {
                write_line(log, sink, &issue.to_string());
            }
        }
        log.log_both("done");

        report.issues = issues.into_iter().map(|(_, issue)| issue).collect();
        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Backup finished: {} new, {} changed, {} carried, {} deleted, {} issues",
            report.files_new,
            report.files_changed,
            report.files_carried,
            report.files_deleted,
            report.issues.len()
        );
        Ok(report)
    }

    fn log_header(&self, log: &mut RunLog, sources: &SourceSet, day_dir: &Path) {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        log.log_both(format!("backup run {} on {}", Local::now().to_rfc3339(), host));
        log.log_both("sources:");
        for spec in &self.config.source.directories {
            log.log_both(spec);
        }
        if !sources.excludes.is_empty() {
            log.log_both("excludes:");
            for exclude in &self.config.source.excludes {
                log.log_both(exclude.display());
            }
        }
        log.log_both("destination:");
        log.log_full(self.config.destination.directory_full.display());
        log.log_partial(day_dir.display());
    }
}

fn write_line(log: &mut RunLog, sink: Sink, line: &str) {
    match sink {
        Sink::Full => log.log_full(line),
        Sink::Partial => log.log_partial(line),
        Sink::Both => log.log_both(line),
    }
}

/// Mutable state of one run
struct Pass<'r> {
    sources: &'r SourceSet,
    dest_full: &'r Path,
    day_dir: &'r Path,
    previous: &'r FingerprintMap,
    previous_partial: &'r FingerprintMap,
    new_full: FingerprintMap,
    new_partial: FingerprintMap,
    /// Keys already handled (roots may overlap)
    seen: HashSet<String>,
    /// Scanned but not recorded: exempt from deletion
    pending: HashSet<String>,
    /// Directories whose contents could not be listed
    unreadable: Vec<PathBuf>,
    issues: Vec<(Sink, FileIssue)>,
    report: BackupReport,
}

impl Pass<'_> {
    fn record(&mut self, log: &mut RunLog, sink: Sink, issue: FileIssue) {
        log.issue(sink, &issue);
        self.issues.push((sink, issue));
    }

    fn process_file(&mut self, log: &mut RunLog, path: &Path) {
        let key = match utils::path_key(path) {
            Ok(key) => key,
            Err(e) => {
                self.record(log, Sink::Both, FileIssue::new(path, IssueKind::NonUtf8Path, e));
                return;
            }
        };
        if !self.seen.insert(key.clone()) {
            return;
        }
        let relative = match self.sources.relative_path(path) {
            Ok(relative) => relative,
            Err(e) => {
                self.pending.insert(key);
                self.record(log, Sink::Both, FileIssue::new(path, IssueKind::UnresolvedPrefix, e));
                return;
            }
        };

        let fingerprint = match Fingerprint::of_path(path) {
            Ok(fp) => fp,
            Err(e) => {
                self.pending.insert(key);
                self.record(log, Sink::Both, FileIssue::new(path, IssueKind::Stat, e));
                return;
            }
        };

        let prior = self.previous.get(&key).copied();
        match prior {
            None => {
                log.log_both(format!("++ {}", path.display()));
                if self.copy_both(log, path, &relative) {
                    self.report.files_new += 1;
                    self.mark_changed(key, fingerprint);
                } else {
                    self.pending.insert(key);
                }
            }
            Some(old) if old != fingerprint => {
                log.log_both(format!("** {}", path.display()));
                if self.copy_both(log, path, &relative) {
                    self.report.files_changed += 1;
                    self.mark_changed(key, fingerprint);
                } else {
                    self.pending.insert(key);
                }
            }
            Some(_) if self.previous_partial.contains_key(&key) => {
                let day_copy = self.day_dir.join(&relative);
                if !day_copy.is_file() {
                    log.log_partial(format!("== {}", path.display()));
                    match utils::copy_preserving(path, &day_copy) {
                        Ok(bytes) => self.report.bytes_copied += bytes,
                        Err(e) => {
                            self.pending.insert(key);
                            self.record(log, Sink::Partial, FileIssue::new(path, IssueKind::Copy, e));
                            return;
                        }
                    }
                } else {
                    debug!("Carried {:?}", path);
                }
                self.report.files_carried += 1;
                self.mark_changed(key, fingerprint);
            }
            Some(_) => {
                self.report.files_unchanged += 1;
                self.new_full.insert(key, fingerprint);
            }
        }
    }

    fn mark_changed(&mut self, key: String, fingerprint: Fingerprint) {
        self.new_partial.insert(key.clone(), fingerprint);
        self.new_full.insert(key, fingerprint);
    }

    /// Copy into today's directory and the mirror; true if both succeeded
    fn copy_both(&mut self, log: &mut RunLog, path: &Path, relative: &Path) -> bool {
        let mut ok = true;
        match utils::copy_preserving(path, &self.day_dir.join(relative)) {
            Ok(bytes) => self.report.bytes_copied += bytes,
            Err(e) => {
                ok = false;
                self.record(log, Sink::Partial, FileIssue::new(path, IssueKind::Copy, e));
            }
        }
        match utils::copy_preserving(path, &self.dest_full.join(relative)) {
            Ok(bytes) => self.report.bytes_copied += bytes,
            Err(e) => {
                ok = false;
                self.record(log, Sink::Full, FileIssue::new(path, IssueKind::Copy, e));
            }
        }
        ok
    }

    /// Apply deletions for every previous entry this run did not record
    fn remove_deleted(&mut self, log: &mut RunLog) {
        let previous = self.previous;
        for (key, old) in previous {
            if self.new_full.contains_key(key) || self.pending.contains(key) {
                continue;
            }
            let path = Path::new(key);
            if self.unreadable.iter().any(|dir| path.starts_with(dir)) {
                debug!("Keeping {:?}: beneath an unreadable directory", path);
                self.new_full.insert(key.clone(), *old);
                continue;
            }

            // Unresolvable entries stay in the state and are reported on every run
            let relative = match self.sources.relative_path(path) {
                Ok(relative) => relative,
                Err(e) => {
                    self.new_full.insert(key.clone(), *old);
                    self.record(log, Sink::Full, FileIssue::new(path, IssueKind::UnresolvedPrefix, e));
                    continue;
                }
            };

            log.log_full(format!("-- {} (full)", path.display()));
            match utils::remove_and_prune(&self.dest_full.join(&relative), self.dest_full) {
                Ok(Removal::Removed) => {}
                Ok(Removal::NotFound) => debug!("{:?} already absent from mirror", relative),
                Err(e) => {
                    self.new_full.insert(key.clone(), *old);
                    self.record(log, Sink::Full, FileIssue::new(path, IssueKind::Remove, e));
                    continue;
                }
            }
            self.report.files_deleted += 1;

            let day_copy = self.day_dir.join(&relative);
            if day_copy.exists() {
                log.log_partial(format!("-- {} (partial)", path.display()));
                if let Err(e) = utils::remove_and_prune(&day_copy, self.day_dir) {
                    self.record(log, Sink::Partial, FileIssue::new(path, IssueKind::Remove, e));
                }
            }
        }
    }
}
