//! Snapshot history: the day directories under the partial root
//!
//! Each backup day owns one directory named `YYYY-MM-DD` holding copies of
//! the files that changed that day (at their relative paths), the day's
//! partial state and a full-state snapshot. Anything else under the
//! partial root (run logs, stray files, directories not named by a valid
//! date) is not part of the history.
//!
//! Reading a point in time works on a *window* of days sorted newest first:
//! the full-state snapshot of the newest day defines which files existed,
//! and each file's content is the newest copy found walking the window.

use crate::error::Result;
use crate::state::{self, FingerprintMap, DAY_FULL_STATE_FILE};
use crate::types::SnapshotDay;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Day directories found under a partial root
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    root: PathBuf,
    /// Ascending
    days: Vec<SnapshotDay>,
}

impl SnapshotHistory {
    /// List the day directories under `root`; a missing root is an empty history
    pub fn load(root: &Path) -> Result<Self> {
        let mut days = Vec::new();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Self {
                    root: root.to_path_buf(),
                    days,
                })
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(str::parse::<SnapshotDay>) {
                Some(Ok(day)) => days.push(day),
                _ => debug!("Ignoring {:?} in history", entry.path()),
            }
        }
        days.sort();

        Ok(Self {
            root: root.to_path_buf(),
            days,
        })
    }

    /// All days, oldest first
    pub fn days(&self) -> &[SnapshotDay] {
        &self.days
    }

    /// Directory of a day
    pub fn day_dir(&self, day: SnapshotDay) -> PathBuf {
        self.root.join(day.dir_name())
    }

    /// Days in `(after, until]`, newest first
    ///
    /// `after = None` means "all time".
    pub fn window(&self, after: Option<SnapshotDay>, until: SnapshotDay) -> Vec<SnapshotDay> {
        self.days
            .iter()
            .rev()
            .copied()
            .filter(|day| *day <= until && after.map_or(true, |cutoff| *day > cutoff))
            .collect()
    }

    /// Newest day of `window` that carries a full-state snapshot, with that snapshot
    ///
    /// Day directories left behind by an interrupted run may lack the
    /// snapshot; they are skipped with a warning.
    pub fn anchor(&self, window: &[SnapshotDay]) -> Result<Option<(SnapshotDay, FingerprintMap)>> {
        for day in window {
            let snapshot = self.day_dir(*day).join(DAY_FULL_STATE_FILE);
            if snapshot.is_file() {
                return Ok(Some((*day, state::load(&snapshot)?)));
            }
            warn!("Day {} has no full-state snapshot, looking further back", day);
        }
        Ok(None)
    }

    /// Newest stored copy of `relative` among `window` (which is newest first)
    pub fn find(&self, window: &[SnapshotDay], relative: &Path) -> Option<(SnapshotDay, PathBuf)> {
        window.iter().find_map(|day| {
            let candidate = self.day_dir(*day).join(relative);
            candidate.is_file().then_some((*day, candidate))
        })
    }
}
