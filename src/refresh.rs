//! Rebuilding the full state from the full mirror
//!
//! Used after the mirror was edited by hand, or when the state file was
//! lost: every file under `directory_full/<relative root>` is mapped back to
//! the source path it mirrors and fingerprinted from the mirror copy, whose
//! timestamps were copied from the source. The result replaces the full
//! state and is stored as today's full-state snapshot. Today's partial
//! state is left alone.

use crate::config::Config;
use crate::error::Result;
use crate::scanner::TreeScanner;
use crate::state::{self, FingerprintMap, DAY_FULL_STATE_FILE};
use crate::types::{FileIssue, Fingerprint, IssueKind, RefreshResult, SnapshotDay};
use crate::utils;
use std::collections::HashSet;
use std::fs;
use tracing::{debug, info, instrument, warn};

/// Rebuild and persist the full state, writing the snapshot into `day`'s directory
#[instrument(skip_all, fields(day = %day))]
pub fn refresh_state(config: &Config, day: SnapshotDay) -> Result<RefreshResult> {
    let sources = config.sources();
    let mirror = &config.destination.directory_full;
    let no_excludes = HashSet::new();
    let mut full_state = FingerprintMap::new();
    let mut result = RefreshResult::default();

    let (roots, failures) = sources.expand_roots();
    for (path, e) in failures {
        result.issues.push(FileIssue::new(path, IssueKind::Walk, e));
    }

    for root in &roots {
        let Some(relative_root) = root.relative(&root.root) else {
            continue;
        };
        let mirror_root = mirror.join(&relative_root);
        debug!("Reading {:?} for {:?}", mirror_root, root.root);

        for item in TreeScanner::new(&mirror_root, &no_excludes).scan() {
            let copy = match item {
                Ok(copy) => copy,
                Err(e) if e.is_not_found() => {
                    debug!("{:?} was never backed up", root.root);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to read mirror under {:?}: {}", mirror_root, e);
                    result
                        .issues
                        .push(FileIssue::new(&mirror_root, IssueKind::Walk, e));
                    continue;
                }
            };

            let source_path = match copy.strip_prefix(&mirror_root) {
                Ok(within) if !within.as_os_str().is_empty() => root.root.join(within),
                _ => root.root.clone(),
            };
            let key = match utils::path_key(&source_path) {
                Ok(key) => key,
                Err(e) => {
                    result
                        .issues
                        .push(FileIssue::new(&source_path, IssueKind::NonUtf8Path, e));
                    continue;
                }
            };
            match Fingerprint::of_path(&copy) {
                Ok(fp) => {
                    full_state.insert(key, fp);
                }
                Err(e) => result.issues.push(FileIssue::new(&copy, IssueKind::Stat, e)),
            }
        }
    }

    state::save(&config.full_state_file, &full_state)?;
    let day_dir = config.destination.directory_partial.join(day.dir_name());
    fs::create_dir_all(&day_dir)?;
    state::save(&day_dir.join(DAY_FULL_STATE_FILE), &full_state)?;

    result.files = full_state.len();
    info!(
        "Rebuilt full state with {} files ({} issues)",
        result.files,
        result.issues.len()
    );
    Ok(result)
}
