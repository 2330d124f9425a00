//! Core data types used throughout the dabbak library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Change detection**: [`Fingerprint`] - the (size, mtime) pair compared between runs
//! - **History**: [`SnapshotDay`] - the calendar day naming a partial snapshot directory
//! - **Outcomes**: [`BackupReport`], [`RestoreResult`], [`PackageResult`], [`RefreshResult`]
//! - **Per-file problems**: [`FileIssue`] and [`IssueKind`]

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use crate::error::DabbakError;

/// Cheap change-detection proxy for file content
///
/// Serialized as a two-element array `[size, mtime_seconds]`. The mtime is
/// truncated (not rounded) to whole seconds because copies do not keep
/// sub-second precision on every filesystem. Older state files stored the
/// mtime as a float; those load and truncate the same way.
///
/// # Examples
///
/// ```rust
/// # use dabbak::types::Fingerprint;
/// let fp: Fingerprint = serde_json::from_str("[1024, 1700000000.75]").unwrap();
/// assert_eq!(fp, Fingerprint::new(1024, 1_700_000_000));
/// assert_eq!(serde_json::to_string(&fp).unwrap(), "[1024,1700000000]");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u64, f64)", into = "(u64, i64)")]
pub struct Fingerprint {
    /// File size in bytes
    pub size: u64,
    /// Modification time in whole seconds since the Unix epoch
    pub mtime_seconds: i64,
}

impl Fingerprint {
    /// Create a fingerprint from its parts
    pub fn new(size: u64, mtime_seconds: i64) -> Self {
        Self { size, mtime_seconds }
    }

    /// Build a fingerprint from filesystem metadata
    pub fn from_metadata(metadata: &Metadata) -> std::io::Result<Self> {
        let modified = metadata.modified()?;
        let mtime_seconds = match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            // Truncation toward zero for pre-epoch times
            Err(e) => -(e.duration().as_secs() as i64),
        };
        Ok(Self::new(metadata.len(), mtime_seconds))
    }

    /// Stat a path (following symlinks) and fingerprint it
    pub fn of_path(path: &Path) -> std::io::Result<Self> {
        Self::from_metadata(&std::fs::metadata(path)?)
    }
}

impl From<(u64, f64)> for Fingerprint {
    fn from((size, mtime): (u64, f64)) -> Self {
        Self::new(size, mtime.trunc() as i64)
    }
}

impl From<Fingerprint> for (u64, i64) {
    fn from(fp: Fingerprint) -> Self {
        (fp.size, fp.mtime_seconds)
    }
}

/// Calendar day naming one partial snapshot directory (`YYYY-MM-DD`)
///
/// The zero-padded ISO form sorts lexically in date order, and ordering on
/// this type agrees with ordering on the directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotDay(NaiveDate);

impl SnapshotDay {
    /// Directory-name format of a snapshot day
    pub const FORMAT: &'static str = "%Y-%m-%d";

    /// Today in local time
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// Wrap a date
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The wrapped date
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Directory name of this day
    pub fn dir_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SnapshotDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for SnapshotDay {
    type Err = DabbakError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono accepts unpadded fields; directory names must be exact
        if s.len() != 10 {
            return Err(DabbakError::InvalidTimestamp(s.to_string()));
        }
        NaiveDate::parse_from_str(s, Self::FORMAT)
            .map(Self)
            .map_err(|_| DabbakError::InvalidTimestamp(s.to_string()))
    }
}

impl TryFrom<String> for SnapshotDay {
    type Error = DabbakError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SnapshotDay> for String {
    fn from(day: SnapshotDay) -> Self {
        day.to_string()
    }
}

/// Category of a per-file problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A directory could not be read while scanning
    Walk,
    /// A scanned file could not be stat'ed
    Stat,
    /// A copy into a destination failed
    Copy,
    /// A removal failed for a reason other than "already gone"
    Remove,
    /// A recorded path is not beneath any configured source root
    UnresolvedPrefix,
    /// A recorded path has no stored copy in the history
    NotFoundInBackup,
    /// A path is not valid UTF-8
    NonUtf8Path,
}

impl IssueKind {
    /// Whether this issue means persisted state and stored data disagree
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, IssueKind::UnresolvedPrefix | IssueKind::NotFoundInBackup)
    }
}

/// A non-fatal problem with a single path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssue {
    /// Path the problem concerns
    pub path: PathBuf,
    /// Problem category
    pub kind: IssueKind,
    /// Human-readable detail
    pub message: String,
}

impl FileIssue {
    /// Create an issue
    pub fn new(path: impl Into<PathBuf>, kind: IssueKind, message: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for FileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            IssueKind::Walk => "failed to read directory",
            IssueKind::Stat => "failed to stat",
            IssueKind::Copy => "failed to copy",
            IssueKind::Remove => "failed to delete",
            IssueKind::UnresolvedPrefix => "could not be matched to source dirs",
            IssueKind::NotFoundInBackup => "not found in backup",
            IssueKind::NonUtf8Path => "path is not valid UTF-8",
        };
        write!(f, "ERR: {} {}: {}", label, self.path.display(), self.message)
    }
}

/// Outcome of a backup run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupReport {
    /// Day directory the run wrote into
    pub day: Option<SnapshotDay>,
    /// Files seen for the first time
    pub files_new: usize,
    /// Files whose fingerprint changed
    pub files_changed: usize,
    /// Unchanged files kept in today's snapshot because they changed earlier today
    pub files_carried: usize,
    /// Unchanged files needing no copy
    pub files_unchanged: usize,
    /// Files removed from the full mirror
    pub files_deleted: usize,
    /// Bytes copied into the full mirror and today's snapshot
    pub bytes_copied: u64,
    /// Per-file problems
    pub issues: Vec<FileIssue>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

impl BackupReport {
    /// Whether the run finished without any per-file problem
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of files copied during the run
    pub fn files_copied(&self) -> usize {
        self.files_new + self.files_changed
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Snapshot day whose full state defined the file set
    pub anchor: Option<SnapshotDay>,
    /// Files written to the destination
    pub files_restored: usize,
    /// Bytes written to the destination
    pub bytes_written: u64,
    /// Per-file problems (unresolved prefixes, missing copies, failed copies)
    pub issues: Vec<FileIssue>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Outcome of a packaging run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageResult {
    /// Bundle directories touched, in bundle order
    pub bundles: Vec<PathBuf>,
    /// Files copied into bundles
    pub files_packaged: usize,
    /// Files already present at their bundle path
    pub files_skipped_existing: usize,
    /// Total size of files assigned to bundles
    pub bytes_packaged: u64,
    /// Whether the packaging cutoff was persisted
    pub cutoff_written: bool,
    /// Per-file problems
    pub issues: Vec<FileIssue>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Outcome of rebuilding the full state from the mirror
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshResult {
    /// Entries written to the full state
    pub files: usize,
    /// Per-file problems
    pub issues: Vec<FileIssue>,
}
