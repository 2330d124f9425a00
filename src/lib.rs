//! # Dabbak - Incremental mirror and day-snapshot backups
//!
//! A backup library that keeps a set of source trees mirrored into a "full"
//! directory and records every day's changes in a dated "partial" snapshot,
//! so that any past day can be reconstructed or exported.
//!
//! ## Overview
//!
//! Dabbak lets you:
//! - Mirror source directories incrementally, copying only files whose size
//!   or modification time changed
//! - Keep one snapshot directory per day holding that day's changed files
//! - Restore the sources as they were on any backed-up day
//! - Export the history into size-capped bundles, incrementally
//! - Rebuild the persisted state from the mirror after manual edits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dabbak::{BackupEngine, Config, Restorer, SnapshotDay};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(Path::new("/etc/dabbak/backup-config.json"))?;
//!
//! // Mirror the sources and record today's changes
//! let report = BackupEngine::new(&config).run()?;
//! println!("{} new, {} changed", report.files_new, report.files_changed);
//!
//! // Rebuild the sources as of a past day
//! let day: SnapshotDay = "2024-01-03".parse()?;
//! let result = Restorer::new(&config).restore(Path::new("/tmp/restore"), day)?;
//! println!("Restored {} files", result.files_restored);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout on disk
//!
//! ```text
//! <directory_full>/docs/a.txt                  current copy of /data/docs/a.txt
//! <directory_partial>/2024-01-03/docs/a.txt    copy made on 2024-01-03
//! <directory_partial>/2024-01-03/__state.json       paths changed that day
//! <directory_partial>/2024-01-03/__state_full.json  full state at end of day
//! <directory_partial>/backup-partial-2024-01-03.log
//! ```
//!
//! Every stored copy lives at its *relative path*: the source path with the
//! parent of its configured root stripped (see [`config`]).
//!
//! ## Error Handling
//!
//! Operations return `Result<T, DabbakError>`. Only preconditions (an
//! existing destination), configuration problems and failures to persist
//! state abort an operation. Problems with individual files are collected
//! as [`FileIssue`]s in the returned report and the operation carries on.
//!
//! ## Module Organization
//!
//! - [`backup`]: the backup engine
//! - [`restore`]: point-in-time restore
//! - [`package`]: export into size-capped bundles
//! - [`refresh`]: rebuilding the full state from the mirror
//! - [`config`]: configuration and source-root resolution
//! - [`state`]: persisted fingerprint state
//! - [`history`]: the day directories
//! - [`scanner`]: source tree walking
//! - [`run_log`]: history logs written by backup runs
//! - [`types`]: common types and reports
//! - [`error`]: error types

pub mod backup;
pub mod config;
pub mod error;
pub mod history;
pub mod package;
pub mod refresh;
pub mod restore;
pub mod run_log;
pub mod scanner;
pub mod state;
pub mod types;
pub mod utils;

pub use backup::BackupEngine;
pub use config::{Config, SourceSet, SourceSpec};
pub use error::{DabbakError, Result};
pub use history::SnapshotHistory;
pub use package::{BundleAssigner, Packager};
pub use refresh::refresh_state;
pub use restore::Restorer;
pub use run_log::RunLog;
pub use types::*;
