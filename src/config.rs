//! Configuration loading and source-root resolution
//!
//! The configuration is a JSON file:
//!
//! ```json
//! {
//!   "source": {
//!     "directories": ["/data/docs", "/data/projects/*"],
//!     "excludes": ["/data/docs/tmp"]
//!   },
//!   "destination": {
//!     "directory_full": "/backup/full",
//!     "directory_partial": "/backup/partial"
//!   },
//!   "full_state_file": "state.json",
//!   "packaging_state_file": "packaging-state.json"
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the config
//! file, and every path is made absolute and lexically normalized once, at
//! load time. Everything downstream compares paths exactly.
//!
//! ## Source roots and relative paths
//!
//! A source entry is either a plain root or `dir/*`, which stands for one
//! root per immediate child of `dir`. The *prefix* of a root is its parent
//! directory, so `dir/*` gives prefix `dir` for every child, exactly as if
//! each child had been listed on its own. A file's relative path (the key
//! shared by the source tree, the full mirror and every day directory) is
//! its absolute path with the prefix stripped.
//!
//! [`SourceSet::relative_path`] maps any recorded path back to that key by
//! the longest component-wise match against the configured entries. Backup,
//! restore, packaging and refresh-state all go through it.

use crate::error::{DabbakError, Result};
use crate::utils::{self, normalize_path, resolve_against};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "DABBAK_CONFIG";

/// Config file name looked up beside the executable
pub const DEFAULT_CONFIG_FILE: &str = "backup-config.json";

/// Effective configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// What to back up
    pub source: SourceConfig,
    /// Where the full mirror and day directories live
    pub destination: DestinationConfig,
    /// Full state of the mirror
    pub full_state_file: PathBuf,
    /// Last packaging cutoff
    #[serde(default = "default_packaging_state_file")]
    pub packaging_state_file: PathBuf,
    /// Append-only log of every backup run
    #[serde(default = "default_full_log_file")]
    pub full_log_file: PathBuf,
}

/// Source section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Roots to back up; a trailing `*` means "each immediate child"
    pub directories: Vec<String>,
    /// Literal paths to skip
    #[serde(default)]
    pub excludes: Vec<PathBuf>,
}

/// Destination section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Full mirror root
    pub directory_full: PathBuf,
    /// Root holding one directory per day
    pub directory_partial: PathBuf,
}

fn default_packaging_state_file() -> PathBuf {
    PathBuf::from("packaging-state.json")
}

fn default_full_log_file() -> PathBuf {
    PathBuf::from("backup-full.log")
}

impl Config {
    /// Find the config file to use
    ///
    /// An explicit path wins, then the `DABBAK_CONFIG` environment variable,
    /// then `backup-config.json` beside the running executable.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Some(from_env) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(from_env);
        }
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        exe_dir.join(DEFAULT_CONFIG_FILE)
    }

    /// Load and resolve a config file
    pub fn load(path: &Path) -> Result<Self> {
        let path = utils::absolute_normalized(path)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DabbakError::ConfigNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        let base = path.parent().unwrap_or(Path::new("/"));
        let config = Self::from_json(&text, base)?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse a config document, resolving relative paths against `base`
    pub fn from_json(text: &str, base: &Path) -> Result<Self> {
        let raw: Config = serde_json::from_str(text)?;
        raw.resolved(base)
    }

    fn resolved(self, base: &Path) -> Result<Self> {
        if self.source.directories.is_empty() {
            return Err(DabbakError::config("source.directories is empty"));
        }

        let directories = self
            .source
            .directories
            .iter()
            .map(|entry| match entry.strip_suffix('*') {
                Some(dir) => {
                    let dir = resolve_against(base, Path::new(dir));
                    dir.join("*").display().to_string()
                }
                None => resolve_against(base, Path::new(entry)).display().to_string(),
            })
            .collect();

        let config = Self {
            source: SourceConfig {
                directories,
                excludes: self
                    .source
                    .excludes
                    .iter()
                    .map(|p| resolve_against(base, p))
                    .collect(),
            },
            destination: DestinationConfig {
                directory_full: resolve_against(base, &self.destination.directory_full),
                directory_partial: resolve_against(base, &self.destination.directory_partial),
            },
            full_state_file: resolve_against(base, &self.full_state_file),
            packaging_state_file: resolve_against(base, &self.packaging_state_file),
            full_log_file: resolve_against(base, &self.full_log_file),
        };

        if config.destination.directory_full == config.destination.directory_partial {
            return Err(DabbakError::config(
                "destination.directory_full and destination.directory_partial must differ",
            ));
        }

        Ok(config)
    }

    /// Source entries and excludes, ready for scanning and prefix resolution
    pub fn sources(&self) -> SourceSet {
        SourceSet {
            specs: self
                .source
                .directories
                .iter()
                .map(|entry| SourceSpec::parse(entry))
                .collect(),
            excludes: self.source.excludes.iter().cloned().collect(),
        }
    }

    /// Pretty JSON of the effective configuration
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One configured source entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A single root (directory or file)
    Root(PathBuf),
    /// `dir/*`: each immediate child of `dir` is a root
    Children(PathBuf),
}

impl SourceSpec {
    /// Parse a (resolved) config entry
    pub fn parse(entry: &str) -> Self {
        match entry.strip_suffix('*') {
            Some(dir) => SourceSpec::Children(normalize_path(Path::new(dir))),
            None => SourceSpec::Root(normalize_path(Path::new(entry))),
        }
    }

    /// Path under which every file of this entry lives
    pub fn covers(&self) -> &Path {
        match self {
            SourceSpec::Root(root) => root,
            SourceSpec::Children(dir) => dir,
        }
    }

    /// Prefix stripped from absolute paths to form relative paths
    pub fn prefix(&self) -> &Path {
        match self {
            SourceSpec::Root(root) => root.parent().unwrap_or(root),
            SourceSpec::Children(dir) => dir,
        }
    }

    /// Expand into concrete roots
    ///
    /// Wildcard children are listed in sorted order. Children that are
    /// symbolic links are skipped, as they would be inside a scan.
    pub fn expand(&self) -> Result<Vec<SourceRoot>> {
        match self {
            SourceSpec::Root(root) => Ok(vec![SourceRoot {
                root: root.clone(),
                prefix: self.prefix().to_path_buf(),
            }]),
            SourceSpec::Children(dir) => {
                let mut children = Vec::new();
                for entry in fs::read_dir(dir)? {
                    let entry = entry?;
                    if entry.file_type()?.is_symlink() {
                        debug!("Skipping symlinked source child {:?}", entry.path());
                        continue;
                    }
                    children.push(entry.path());
                }
                children.sort();
                Ok(children
                    .into_iter()
                    .map(|root| SourceRoot {
                        root,
                        prefix: dir.clone(),
                    })
                    .collect())
            }
        }
    }
}

/// A concrete root to scan, with the prefix its relative paths are cut at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    /// Absolute root path
    pub root: PathBuf,
    /// Parent used to compute relative paths
    pub prefix: PathBuf,
}

impl SourceRoot {
    /// Relative path of a file beneath this root
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.prefix).ok().map(Path::to_path_buf)
    }
}

/// Configured source entries plus the exclude set
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    /// Entries in config order
    pub specs: Vec<SourceSpec>,
    /// Literal paths to skip
    pub excludes: HashSet<PathBuf>,
}

impl SourceSet {
    /// Expand every entry into concrete roots
    ///
    /// A wildcard directory that cannot be listed is returned in the second
    /// vector together with its error so the caller can decide what to do.
    pub fn expand_roots(&self) -> (Vec<SourceRoot>, Vec<(PathBuf, DabbakError)>) {
        let mut roots = Vec::new();
        let mut failures = Vec::new();
        for spec in &self.specs {
            match spec.expand() {
                Ok(expanded) => roots.extend(expanded),
                Err(e) => {
                    warn!("Failed to expand source {:?}: {}", spec.covers(), e);
                    failures.push((spec.covers().to_path_buf(), e));
                }
            }
        }
        (roots, failures)
    }

    /// The entry a recorded path belongs to (longest covering match)
    pub fn spec_for(&self, path: &Path) -> Option<&SourceSpec> {
        self.specs
            .iter()
            .filter(|spec| path.starts_with(spec.covers()))
            .max_by_key(|spec| spec.covers().components().count())
    }

    /// Relative path (the mirror and history join key) of a recorded path
    pub fn relative_path(&self, path: &Path) -> Result<PathBuf> {
        self.spec_for(path)
            .and_then(|spec| path.strip_prefix(spec.prefix()).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .ok_or_else(|| DabbakError::UnresolvedPrefix(path.to_path_buf()))
    }
}
