//! Exporting the snapshot history into size-capped bundles
//!
//! Packaging re-reads a window of the history, `(cutoff, until]`, and lays
//! the newest copy of every recorded file out under numbered bundle
//! directories:
//!
//! ```text
//! <dest>/backup-2024-03-01-part-1/docs/a.txt
//! <dest>/backup-2024-03-01-part-1/docs/b.txt
//! <dest>/backup-2024-03-01-part-2/projects/alpha/big.iso
//! ```
//!
//! Files are assigned in sorted path order. A new bundle starts when the
//! next file would push the current one over the cap; a file larger than
//! the cap therefore ends up alone in its bundle. Files already present at
//! their bundle path are not copied again but still count toward the
//! bundle's size, so a re-run reproduces the same layout.
//!
//! A full packaging run (`full = true`) considers the whole history and, if
//! it completes without issues, records `until` as the new cutoff. An
//! incremental run starts after the recorded cutoff and silently skips
//! files with no copy in its window: they have not changed since.

use crate::config::Config;
use crate::error::{DabbakError, Result};
use crate::history::SnapshotHistory;
use crate::state::PackagingState;
use crate::types::{FileIssue, IssueKind, PackageResult, SnapshotDay};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Packaging run options and entry point
#[derive(Debug, Clone)]
pub struct Packager<'a> {
    config: &'a Config,
    max_bundle_size: u64,
    full: bool,
    force: bool,
}

impl<'a> Packager<'a> {
    /// Incremental packager with bundles capped at `max_bundle_size` bytes
    pub fn new(config: &'a Config, max_bundle_size: u64) -> Self {
        Self {
            config,
            max_bundle_size,
            full: false,
            force: false,
        }
    }

    /// Package the whole history and persist the cutoff on success
    pub fn full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    /// Allow packaging into an existing destination
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Name of bundle `index` (from 1) of a run packaging up to `until`
    pub fn bundle_name(until: SnapshotDay, index: usize) -> String {
        format!("backup-{}-part-{}", until, index)
    }

    /// Package the history up to and including `until` into `dest`
    #[instrument(skip_all, fields(until = %until, full = self.full))]
    pub fn package(&self, dest: &Path, until: SnapshotDay) -> Result<PackageResult> {
        let start = Instant::now();
        if !self.force && fs::symlink_metadata(dest).is_ok() {
            return Err(DabbakError::DestinationExists(dest.to_path_buf()));
        }
        if self.max_bundle_size == 0 {
            return Err(DabbakError::InvalidSize("0".to_string()));
        }

        let cutoff = if self.full {
            None
        } else {
            PackagingState::load(&self.config.packaging_state_file)?
        };
        match cutoff {
            Some(cutoff) => info!("Packaging changes after {} up to {}", cutoff, until),
            None => info!("Packaging all history up to {}", until),
        }

        let history = SnapshotHistory::load(&self.config.destination.directory_partial)?;
        let window = history.window(cutoff, until);
        let mut result = PackageResult::default();

        match history.anchor(&window)? {
            Some((anchor, full_state)) => {
                debug!("Anchored on {} with {} recorded files", anchor, full_state.len());
                let sources = self.config.sources();
                let mut bundles = BundleAssigner::new(self.max_bundle_size);

                for key in full_state.keys() {
                    let path = Path::new(key);
                    let relative = match sources.relative_path(path) {
                        Ok(relative) => relative,
                        Err(e) => {
                            warn!("Cannot package {:?}: {}", path, e);
                            result
                                .issues
                                .push(FileIssue::new(path, IssueKind::UnresolvedPrefix, e));
                            continue;
                        }
                    };

                    let Some((day, stored)) = history.find(&window, &relative) else {
                        if self.full {
                            let e = DabbakError::NotFoundInBackup(path.to_path_buf());
                            warn!("Cannot package {:?}: {}", path, e);
                            result
                                .issues
                                .push(FileIssue::new(path, IssueKind::NotFoundInBackup, e));
                        }
                        continue;
                    };

                    let size = match fs::metadata(&stored) {
                        Ok(metadata) => metadata.len(),
                        Err(e) => {
                            result.issues.push(FileIssue::new(&stored, IssueKind::Stat, e));
                            continue;
                        }
                    };

                    let index = bundles.assign(size);
                    let bundle = dest.join(Self::bundle_name(until, index));
                    if result.bundles.last() != Some(&bundle) {
                        result.bundles.push(bundle.clone());
                    }
                    result.bytes_packaged += size;

                    let target = bundle.join(&relative);
                    if target.exists() {
                        debug!("{:?} already packaged", target);
                        result.files_skipped_existing += 1;
                        continue;
                    }
                    debug!("Packaging {:?} from {} into part {}", relative, day, index);
                    match utils::copy_preserving(&stored, &target) {
                        Ok(_) => result.files_packaged += 1,
                        Err(e) => {
                            warn!("Failed to package {:?}: {}", path, e);
                            result.issues.push(FileIssue::new(path, IssueKind::Copy, e));
                        }
                    }
                }
            }
            None => info!("No snapshot in the packaging window, nothing to do"),
        }

        if self.full && result.issues.is_empty() {
            PackagingState::save(&self.config.packaging_state_file, until)?;
            result.cutoff_written = true;
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Packaged {} files into {} bundles ({} already present, {} issues)",
            result.files_packaged,
            result.bundles.len(),
            result.files_skipped_existing,
            result.issues.len()
        );
        Ok(result)
    }
}

/// Greedy bundle assignment under a size cap
///
/// Bundles are numbered from 1. A file opens a new bundle when the current
/// one already holds a file and would exceed the cap with it. Emptiness is
/// counted in files, not bytes, so zero-byte files never share a bundle with
/// an oversize one.
#[derive(Debug, Clone)]
pub struct BundleAssigner {
    max: u64,
    index: usize,
    current: u64,
    files: usize,
}

impl BundleAssigner {
    /// Assigner for bundles of at most `max` bytes
    pub fn new(max: u64) -> Self {
        Self {
            max,
            index: 1,
            current: 0,
            files: 0,
        }
    }

    /// Bundle index for the next file of `size` bytes
    pub fn assign(&mut self, size: u64) -> usize {
        if self.files > 0 && self.current.saturating_add(size) > self.max {
            self.index += 1;
            self.current = 0;
            self.files = 0;
        }
        self.current = self.current.saturating_add(size);
        self.files += 1;
        self.index
    }
}

/// Bundle directories under `dest`, in index order
pub fn list_bundles(dest: &Path) -> Result<Vec<PathBuf>> {
    let mut bundles: Vec<(usize, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dest)? {
        let entry = entry?;
        let name = entry.file_name();
        let index = name
            .to_str()
            .and_then(|n| n.rsplit_once("-part-"))
            .and_then(|(_, index)| index.parse().ok());
        if let Some(index) = index {
            bundles.push((index, entry.path()));
        }
    }
    bundles.sort();
    Ok(bundles.into_iter().map(|(_, path)| path).collect())
}
