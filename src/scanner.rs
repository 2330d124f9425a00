//! Source tree scanning
//!
//! [`TreeScanner`] yields the regular files under a root as a lazy,
//! depth-first sequence with directory children visited in sorted name
//! order, so two scans of an unchanged tree produce identical run logs.
//!
//! ## Rules
//!
//! - Symbolic links (and, on Windows, junctions and other reparse points)
//!   are never followed and never yielded. This keeps the walk acyclic and on
//!   the volume the user configured.
//! - A path listed in the exclude set is skipped; if it is a directory the
//!   walk does not descend into it. Matching is exact path equality, so an
//!   excluded `/data/tmp` says nothing about `/data/tmp2` or about
//!   `/data/x/tmp`.
//! - A root that is a plain file is yielded itself (unless excluded).
//! - Directories that cannot be read show up as `Err` items; the walk
//!   carries on with the rest of the tree.
//!
//! Wildcard roots (`dir/*`) are expanded by the caller before scanning, see
//! [`SourceSpec::expand`](crate::config::SourceSpec::expand).
//!
//! ## Example
//!
//! ```rust,no_run
//! use dabbak::scanner::TreeScanner;
//! use std::collections::HashSet;
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let excludes: HashSet<PathBuf> = [PathBuf::from("/data/docs/tmp")].into();
//! let scanner = TreeScanner::new(Path::new("/data/docs"), &excludes);
//! for file in scanner.scan() {
//!     println!("{}", file?.display());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::{DirEntry, WalkDir};

/// Scanner over one source root
///
/// Cheap to construct; every call to [`scan`](Self::scan) starts a fresh
/// walk, so the sequence can be restarted at will.
#[derive(Debug, Clone)]
pub struct TreeScanner<'a> {
    root: PathBuf,
    excludes: &'a HashSet<PathBuf>,
}

impl<'a> TreeScanner<'a> {
    /// Create a scanner for `root` honouring `excludes`
    pub fn new(root: &Path, excludes: &'a HashSet<PathBuf>) -> Self {
        Self {
            root: root.to_path_buf(),
            excludes,
        }
    }

    /// Root being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new walk
    pub fn scan(&self) -> Scan<'a> {
        let inner = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Scan {
            inner,
            excludes: self.excludes,
        }
    }
}

/// Lazy sequence of file paths produced by [`TreeScanner::scan`]
pub struct Scan<'a> {
    inner: walkdir::IntoIter,
    excludes: &'a HashSet<PathBuf>,
}

impl Iterator for Scan<'_> {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            let file_type = entry.file_type();

            if self.excludes.contains(entry.path()) {
                trace!("Excluded {:?}", entry.path());
                if file_type.is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if file_type.is_symlink() || is_reparse_point(&entry) {
                trace!("Skipping link {:?}", entry.path());
                if file_type.is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if file_type.is_file() {
                return Some(Ok(entry.into_path()));
            }
            // Directories are descended into; sockets, fifos and devices are ignored
        }
    }
}

#[cfg(windows)]
fn is_reparse_point(entry: &DirEntry) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    entry
        .metadata()
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_reparse_point(_entry: &DirEntry) -> bool {
    false
}
