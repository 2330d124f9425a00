//! Persisted fingerprint state
//!
//! A state file is a JSON object mapping absolute source paths to
//! `[size, mtime_seconds]`:
//!
//! ```json
//! {
//!   "/data/docs/a.txt": [1024, 1700000000],
//!   "/data/docs/b/c.txt": [5, 1700000123]
//! }
//! ```
//!
//! The same shape is used for the main full state, for the full-state
//! snapshot kept in every day directory (`__state_full.json`) and for the
//! day's partial state (`__state.json`, only the paths marked changed that
//! day). Files are always replaced whole, never merged, and a missing file
//! loads as an empty map.

use crate::error::Result;
use crate::types::{Fingerprint, SnapshotDay};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// Full-state snapshot inside a day directory
pub const DAY_FULL_STATE_FILE: &str = "__state_full.json";

/// Partial state (paths changed that day) inside a day directory
pub const DAY_PARTIAL_STATE_FILE: &str = "__state.json";

/// Mapping from absolute source path to fingerprint
///
/// Ordered so that state files diff cleanly and every walk over recorded
/// paths (restore, packaging, deletion) is deterministic.
pub type FingerprintMap = BTreeMap<String, Fingerprint>;

/// Load a state file; a missing file is an empty state
pub fn load(path: &Path) -> Result<FingerprintMap> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No state at {:?}, starting empty", path);
            return Ok(FingerprintMap::new());
        }
        Err(e) => return Err(e.into()),
    };
    let state: FingerprintMap = serde_json::from_str(&text)?;
    debug!("Loaded {} entries from {:?}", state.len(), path);
    Ok(state)
}

/// Replace a state file with `state`, pretty-printed
pub fn save(path: &Path, state: &FingerprintMap) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    utils::atomic_write(path, json.as_bytes())?;
    debug!("Wrote {} entries to {:?}", state.len(), path);
    Ok(())
}

/// Persisted packaging cutoff: the last day exported by a full packaging run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingState {
    /// Last packaged day
    pub timestamp: SnapshotDay,
}

impl PackagingState {
    /// Load the cutoff; `None` ("all time") if none was ever written
    pub fn load(path: &Path) -> Result<Option<SnapshotDay>> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let state: PackagingState = serde_json::from_str(&text)?;
                Ok(Some(state.timestamp))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a new cutoff
    pub fn save(path: &Path, timestamp: SnapshotDay) -> Result<()> {
        let json = serde_json::to_string_pretty(&PackagingState { timestamp })?;
        utils::atomic_write(path, json.as_bytes())
    }
}
