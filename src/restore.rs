//! Point-in-time restore from the snapshot history
//!
//! A restore to day `T` reads the full-state snapshot of the newest day at
//! or before `T` to learn which files existed, then copies each of them
//! from the newest day directory (at or before `T`) holding a copy. Copies
//! keep their stored modification times.
//!
//! The destination must not exist: nothing is written when it does.
//! Recorded paths that cannot be matched to a configured source, or that
//! have no stored copy, are reported as issues and the restore carries on.

use crate::config::Config;
use crate::error::{DabbakError, Result};
use crate::history::SnapshotHistory;
use crate::types::{FileIssue, IssueKind, RestoreResult, SnapshotDay};
use crate::utils::{self, normalize_path};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Restores a configuration's history into a fresh directory
#[derive(Debug, Clone)]
pub struct Restorer<'a> {
    config: &'a Config,
    filter: Option<PathBuf>,
}

impl<'a> Restorer<'a> {
    /// Restorer for every recorded file
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            filter: None,
        }
    }

    /// Only restore recorded paths beneath `source_path`
    pub fn with_filter(mut self, source_path: impl AsRef<Path>) -> Self {
        self.filter = Some(normalize_path(source_path.as_ref()));
        self
    }

    /// Restore the state as of `until` into `dest`
    ///
    /// # Errors
    ///
    /// - [`DabbakError::DestinationExists`] if `dest` exists
    /// - [`DabbakError::NoSnapshot`] if no day at or before `until` has a
    ///   full-state snapshot
    #[instrument(skip_all, fields(until = %until))]
    pub fn restore(&self, dest: &Path, until: SnapshotDay) -> Result<RestoreResult> {
        let start = Instant::now();
        if fs::symlink_metadata(dest).is_ok() {
            return Err(DabbakError::DestinationExists(dest.to_path_buf()));
        }

        let history = SnapshotHistory::load(&self.config.destination.directory_partial)?;
        let window = history.window(None, until);
        let (anchor, full_state) = history
            .anchor(&window)?
            .ok_or_else(|| DabbakError::NoSnapshot(until.to_string()))?;
        info!(
            "Restoring {} recorded files as of {} into {:?}",
            full_state.len(),
            anchor,
            dest
        );

        let sources = self.config.sources();
        let mut result = RestoreResult {
            anchor: Some(anchor),
            ..Default::default()
        };
        fs::create_dir_all(dest)?;

        for key in full_state.keys() {
            let path = Path::new(key);
            if let Some(filter) = &self.filter {
                if !path.starts_with(filter) {
                    continue;
                }
            }

            let relative = match sources.relative_path(path) {
                Ok(relative) => relative,
                Err(e) => {
                    warn!("Cannot restore {:?}: {}", path, e);
                    result
                        .issues
                        .push(FileIssue::new(path, IssueKind::UnresolvedPrefix, e));
                    continue;
                }
            };

            let Some((day, stored)) = history.find(&window, &relative) else {
                let e = DabbakError::NotFoundInBackup(path.to_path_buf());
                warn!("Cannot restore {:?}: {}", path, e);
                result
                    .issues
                    .push(FileIssue::new(path, IssueKind::NotFoundInBackup, e));
                continue;
            };

            debug!("Restoring {:?} from {}", relative, day);
            match utils::copy_preserving(&stored, &dest.join(&relative)) {
                Ok(bytes) => {
                    result.files_restored += 1;
                    result.bytes_written += bytes;
                }
                Err(e) => {
                    warn!("Failed to restore {:?}: {}", path, e);
                    result.issues.push(FileIssue::new(path, IssueKind::Copy, e));
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Restored {} files ({} issues)",
            result.files_restored,
            result.issues.len()
        );
        Ok(result)
    }
}
