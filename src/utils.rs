//! Utility functions for dabbak
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - Copying a file while keeping its modification time
//! - Removing a file and pruning the directories it leaves empty
//! - Atomic file writing
//!
//! ### Path Manipulation
//! - Lexical normalization (no filesystem access, symlinks untouched)
//! - Converting paths to the string keys used in state files
//!
//! ### Formatting and Parsing
//! - Human-readable byte counts
//! - `N|Nk|Nm|Ng` size arguments

use crate::error::{DabbakError, Result};
use filetime::FileTime;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Outcome of a removal that tolerates the target being already gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The file existed and was removed
    Removed,
    /// Nothing was there to remove
    NotFound,
}

/// Copy a file, replacing any existing destination, and keep its timestamps
///
/// Parent directories of `dest` are created as needed. The destination is
/// removed first so read-only copies from an earlier run do not block the
/// overwrite. Access and modification times are copied from `src`, which
/// is what lets the mirror be fingerprinted the same way as the source.
///
/// Returns the number of bytes copied.
pub fn copy_preserving(src: &Path, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(dest) {
        Ok(()) => trace!("Replaced existing {:?}", dest),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let bytes = fs::copy(src, dest)?;
    let metadata = fs::metadata(src)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    let atime = FileTime::from_last_access_time(&metadata);
    filetime::set_file_times(dest, atime, mtime)?;

    Ok(bytes)
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Remove a file, then delete the ancestors it leaves empty
///
/// Pruning walks upward from the file's directory and stops at the first
/// non-empty directory or at `root`, which is never removed. A file that is
/// already absent is reported as [`Removal::NotFound`] rather than an error;
/// any other failure is returned.
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::{remove_and_prune, Removal};
///
/// // mirror/docs/old/a.txt is the only file under mirror/docs
/// let outcome = remove_and_prune(&mirror.join("docs/old/a.txt"), &mirror)?;
/// assert_eq!(outcome, Removal::Removed);
/// assert!(!mirror.join("docs").exists());
/// assert!(mirror.exists());
/// ```
pub fn remove_and_prune(path: &Path, root: &Path) -> Result<Removal> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Removal::NotFound),
        Err(e) => return Err(e.into()),
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if !remove_dir_if_empty(current)? {
            break;
        }
        dir = current.parent();
    }

    Ok(Removal::Removed)
}

/// Lexically normalize a path
///
/// Drops `.` components, resolves `..` against the preceding component and
/// removes trailing separators. The filesystem is not consulted, so symbolic
/// links are kept as written.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Make a path absolute (against the current directory) and normalize it
pub fn absolute_normalized(path: &Path) -> Result<PathBuf> {
    Ok(normalize_path(&std::path::absolute(path)?))
}

/// Make a path absolute against `base` and normalize it
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

/// Convert a path to the string key used in state files
pub fn path_key(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| DabbakError::PathConversion(path.as_os_str().to_os_string()))
}

/// Parse a size argument: `N`, `Nk`, `Nm` or `Ng` (binary multiples, any case)
pub fn parse_size(input: &str) -> Result<u64> {
    let lower = input.trim().to_ascii_lowercase();
    let (digits, multiplier) = match lower.chars().last() {
        Some('k') => (&lower[..lower.len() - 1], 1024u64),
        Some('m') => (&lower[..lower.len() - 1], 1024 * 1024),
        Some('g') => (&lower[..lower.len() - 1], 1024 * 1024 * 1024),
        _ => (lower.as_str(), 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|n| *n > 0)
        .ok_or_else(|| DabbakError::InvalidSize(input.to_string()))
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based). Values below 1 KB are shown as whole
/// numbers, larger values with two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The target is either the previous content or the new content, never a
/// partial write. The temporary file sits next to the target so the rename
/// stays on one filesystem.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;

    Ok(())
}
