//! Integration tests for dabbak
//!
//! Multi-day scenarios run against real temporary directories. Day
//! directories are chosen explicitly and modification times are pinned
//! with `filetime`, so every run is deterministic.

use ::dabbak::state;
use ::dabbak::*;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test harness: one source tree `<tmp>/data/docs`, destinations under `<tmp>`
pub struct BackupHarness {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub config: Config,
}

impl BackupHarness {
    pub fn new() -> Self {
        Self::with_sources(&["data/docs"], &[])
    }

    /// Harness with the given source entries and excludes (relative to the temp dir)
    pub fn with_sources(directories: &[&str], excludes: &[&str]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        for dir in directories {
            fs::create_dir_all(temp_dir.path().join(dir.trim_end_matches('*'))).unwrap();
        }
        let text = serde_json::json!({
            "source": { "directories": directories, "excludes": excludes },
            "destination": {
                "directory_full": "backup/full",
                "directory_partial": "backup/partial"
            },
            "full_state_file": "backup/state.json",
            "packaging_state_file": "backup/packaging.json"
        })
        .to_string();
        let config_path = temp_dir.path().join("backup-config.json");
        fs::write(&config_path, text).unwrap();
        let config = Config::load(&config_path).unwrap();

        let source = config.sources().specs[0].covers().to_path_buf();
        Self {
            temp_dir,
            source,
            config,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join(rel)
    }

    pub fn day(&self, day: &str) -> SnapshotDay {
        day.parse().unwrap()
    }

    /// Write `content` at `rel` under the first source with a fixed mtime
    pub fn write(&self, rel: &str, content: &str, mtime: i64) {
        write_pinned(&self.source.join(rel), content, mtime);
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.source.join(rel)).unwrap();
    }

    pub fn backup(&self, day: &str) -> BackupReport {
        BackupEngine::new(&self.config)
            .with_day(self.day(day))
            .run()
            .unwrap()
    }

    pub fn state(&self) -> state::FingerprintMap {
        state::load(&self.config.full_state_file).unwrap()
    }

    /// Mirror copy of a file of the default `docs` source
    pub fn mirror(&self, rel: &str) -> PathBuf {
        self.config.destination.directory_full.join("docs").join(rel)
    }

    /// Day copy of a file of the default `docs` source
    pub fn day_copy(&self, day: &str, rel: &str) -> PathBuf {
        self.config
            .destination
            .directory_partial
            .join(day)
            .join("docs")
            .join(rel)
    }
}

impl Default for BackupHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn write_pinned(path: &Path, content: &str, mtime: i64) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

/// All files under `root`, relative, sorted
pub fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod backup_tests {
    use super::*;

    #[test]
    fn test_second_run_is_idempotent() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "alpha", 1_000);
        harness.write("sub/b.txt", "beta", 1_000);

        let first = harness.backup("2024-01-01");
        assert_eq!(first.files_new, 2);
        let state_after_first = harness.state();

        let second = harness.backup("2024-01-02");
        assert_eq!(second.files_copied(), 0);
        assert_eq!(second.files_deleted, 0);
        assert_eq!(second.files_unchanged, 2);
        assert_eq!(harness.state(), state_after_first);
        assert!(tree(&harness.config.destination.directory_partial.join("2024-01-02"))
            .iter()
            .all(|f| f.starts_with("__state")));
    }

    #[test]
    fn test_size_or_mtime_change_detected() {
        let harness = BackupHarness::new();
        harness.write("size.txt", "short", 1_000);
        harness.write("time.txt", "same", 1_000);
        harness.write("still.txt", "same", 1_000);
        harness.backup("2024-01-01");

        harness.write("size.txt", "much longer", 1_000);
        harness.write("time.txt", "same", 2_000);
        let report = harness.backup("2024-01-02");

        assert_eq!(report.files_changed, 2);
        assert_eq!(report.files_unchanged, 1);
        assert_eq!(fs::read_to_string(harness.mirror("size.txt")).unwrap(), "much longer");
        assert!(harness.day_copy("2024-01-02", "size.txt").exists());
        assert!(harness.day_copy("2024-01-02", "time.txt").exists());
        assert!(!harness.day_copy("2024-01-02", "still.txt").exists());
    }

    #[test]
    fn test_mirror_keeps_source_mtime() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "alpha", 1_234_567);
        harness.backup("2024-01-01");

        let fp = Fingerprint::of_path(&harness.mirror("a.txt")).unwrap();
        assert_eq!(fp, Fingerprint::new(5, 1_234_567));
    }

    #[test]
    fn test_deleted_file_pruned_up_to_mirror_root() {
        let harness = BackupHarness::new();
        harness.write("x/y/z/only.txt", "o", 1_000);
        harness.backup("2024-01-01");
        assert!(harness.mirror("x/y/z/only.txt").exists());

        harness.remove("x/y/z/only.txt");
        let report = harness.backup("2024-01-02");
        assert_eq!(report.files_deleted, 1);

        let full = &harness.config.destination.directory_full;
        assert!(full.exists());
        assert!(!full.join("docs/x").exists());
        assert!(harness.state().is_empty());
        // History keeps the old copy
        assert!(harness.day_copy("2024-01-01", "x/y/z/only.txt").exists());
    }

    #[test]
    fn test_same_day_sticky_and_deletion() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "v1", 1_000);
        harness.write("b.txt", "v1", 1_000);
        harness.backup("2024-01-01");

        harness.write("a.txt", "v2", 2_000);
        harness.write("b.txt", "v2", 2_000);
        harness.backup("2024-01-02");

        // Later the same day: a unchanged, b deleted
        harness.remove("b.txt");
        let report = harness.backup("2024-01-02");
        assert_eq!(report.files_carried, 1);
        assert_eq!(report.files_deleted, 1);
        assert!(harness.day_copy("2024-01-02", "a.txt").exists());
        assert!(!harness.day_copy("2024-01-02", "b.txt").exists());

        let partial = state::load(
            &harness
                .config
                .destination
                .directory_partial
                .join("2024-01-02")
                .join(state::DAY_PARTIAL_STATE_FILE),
        )
        .unwrap();
        assert_eq!(partial.len(), 1);
    }

    #[test]
    fn test_excluded_directory_not_copied() {
        let harness = BackupHarness::with_sources(&["data/docs"], &["data/docs/tmp"]);
        harness.write("tmp/scratch.txt", "s", 1_000);
        harness.write("tmp2/kept.txt", "k", 1_000);
        harness.write("inner/tmp/kept.txt", "k", 1_000);

        let report = harness.backup("2024-01-01");
        assert_eq!(report.files_new, 2);
        assert_eq!(
            tree(&harness.config.destination.directory_full),
            vec!["docs/inner/tmp/kept.txt", "docs/tmp2/kept.txt"]
        );
    }

    #[test]
    fn test_newly_excluded_path_is_deleted_from_mirror() {
        let harness = BackupHarness::new();
        harness.write("cache/blob.bin", "b", 1_000);
        harness.backup("2024-01-01");

        let mut config = harness.config.clone();
        config.source.excludes.push(harness.source.join("cache"));
        let report = BackupEngine::new(&config)
            .with_day(harness.day("2024-01-02"))
            .run()
            .unwrap();
        assert_eq!(report.files_deleted, 1);
        assert!(!harness.mirror("cache").exists());
    }

    #[test]
    fn test_wildcard_roots() {
        let harness = BackupHarness::with_sources(&["data/projects/*"], &[]);
        let projects = harness.path("data/projects");
        write_pinned(&projects.join("alpha/main.rs"), "fn main() {}", 1_000);
        write_pinned(&projects.join("beta/lib.rs"), "pub fn b() {}", 1_000);
        write_pinned(&projects.join("notes.txt"), "n", 1_000);

        let report = harness.backup("2024-01-01");
        assert_eq!(report.files_new, 3);
        assert_eq!(
            tree(&harness.config.destination.directory_full),
            vec!["alpha/main.rs", "beta/lib.rs", "notes.txt"]
        );

        // A removed child is a deletion like any other
        fs::remove_dir_all(projects.join("beta")).unwrap();
        let report = harness.backup("2024-01-02");
        assert_eq!(report.files_deleted, 1);
        assert!(!harness.config.destination.directory_full.join("beta").exists());

        let dest = harness.path("restored");
        let result = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-01"))
            .unwrap();
        assert_eq!(result.files_restored, 3);
        assert_eq!(tree(&dest), vec!["alpha/main.rs", "beta/lib.rs", "notes.txt"]);
    }

    #[test]
    fn test_logs_record_run() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "v1", 1_000);
        harness.backup("2024-01-01");
        harness.remove("a.txt");
        harness.backup("2024-01-02");

        let full_log = fs::read_to_string(&harness.config.full_log_file).unwrap();
        assert!(full_log.contains(&format!("++ {}", harness.source.join("a.txt").display())));
        assert!(full_log.contains("(full)"));

        let day_one = fs::read_to_string(RunLog::partial_log_path(
            &harness.config.destination.directory_partial,
            harness.day("2024-01-01"),
        ))
        .unwrap();
        assert!(day_one.contains("++ "));
        assert!(!day_one.contains("-- "));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_not_treated_as_deleted() {
        use std::os::unix::fs::PermissionsExt;

        let harness = BackupHarness::new();
        harness.write("locked/secret.txt", "s", 1_000);
        harness.write("open.txt", "o", 1_000);
        harness.backup("2024-01-01");

        let locked = harness.source.join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users can read it anyway; nothing to check then
        let readable = fs::read_dir(&locked).is_ok();
        let report = harness.backup("2024-01-02");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if !readable {
            assert_eq!(report.files_deleted, 0);
            assert!(report.issues.iter().any(|i| i.kind == IssueKind::Walk));
            assert!(harness.mirror("locked/secret.txt").exists());
            assert_eq!(harness.state().len(), 2);
        }
    }
}

#[cfg(test)]
mod restore_tests {
    use super::*;

    #[test]
    fn test_restore_picks_newest_copy_per_file() {
        let harness = BackupHarness::new();
        harness.write("a", "a-v1", 1_000);
        harness.backup("2024-01-01");

        harness.write("a", "a-v2", 2_000);
        harness.write("b", "b-v1", 2_000);
        harness.backup("2024-01-03");

        let dest = harness.path("restore-03");
        let result = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-03"))
            .unwrap();
        assert_eq!(result.files_restored, 2);
        assert_eq!(fs::read_to_string(dest.join("docs/a")).unwrap(), "a-v2");
        assert_eq!(fs::read_to_string(dest.join("docs/b")).unwrap(), "b-v1");

        // A day between the two snapshots sees the older state
        let dest = harness.path("restore-02");
        let result = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-02"))
            .unwrap();
        assert_eq!(result.anchor, Some(harness.day("2024-01-01")));
        assert_eq!(fs::read_to_string(dest.join("docs/a")).unwrap(), "a-v1");
        assert!(!dest.join("docs/b").exists());
    }

    #[test]
    fn test_restore_finds_unchanged_file_in_older_day() {
        let harness = BackupHarness::new();
        harness.write("old.txt", "from day one", 1_000);
        harness.backup("2024-01-01");
        harness.write("new.txt", "from day five", 5_000);
        harness.backup("2024-01-05");

        let dest = harness.path("restored");
        Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-05"))
            .unwrap();
        assert_eq!(fs::read_to_string(dest.join("docs/old.txt")).unwrap(), "from day one");
        let fp = Fingerprint::of_path(&dest.join("docs/old.txt")).unwrap();
        assert_eq!(fp.mtime_seconds, 1_000);
    }

    #[test]
    fn test_restore_refuses_existing_destination() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "v1", 1_000);
        harness.backup("2024-01-01");

        let dest = harness.path("existing");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("mine.txt"), "keep me").unwrap();

        let err = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-01"))
            .unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(tree(&dest), vec!["mine.txt"]);
    }

    #[test]
    fn test_restore_reports_missing_copy_and_continues() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "a", 1_000);
        harness.write("b.txt", "b", 1_000);
        harness.backup("2024-01-01");
        fs::remove_file(harness.day_copy("2024-01-01", "a.txt")).unwrap();

        let dest = harness.path("restored");
        let result = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-01"))
            .unwrap();
        assert_eq!(result.files_restored, 1);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].kind, IssueKind::NotFoundInBackup);
        assert!(result.issues[0].kind.is_inconsistency());
    }
}

#[cfg(test)]
mod package_tests {
    use super::*;
    use ::dabbak::package::list_bundles;

    fn harness_with_history() -> BackupHarness {
        let harness = BackupHarness::new();
        harness.write("a.bin", &"a".repeat(400), 1_000);
        harness.write("b.bin", &"b".repeat(400), 1_000);
        harness.write("c.bin", &"c".repeat(400), 1_000);
        harness.backup("2024-01-01");
        harness.write("b.bin", &"B".repeat(400), 2_000);
        harness.write("d.bin", &"d".repeat(2_000), 2_000);
        harness.backup("2024-01-02");
        harness
    }

    #[test]
    fn test_full_package_splits_by_size() {
        let harness = harness_with_history();
        let dest = harness.path("export");

        let result = Packager::new(&harness.config, 1_000)
            .full(true)
            .package(&dest, harness.day("2024-01-02"))
            .unwrap();

        // a+b fit in 1000, c opens part 2, d is oversize and alone in part 3
        assert_eq!(result.files_packaged, 4);
        assert_eq!(result.bundles.len(), 3);
        assert!(result.cutoff_written);
        assert_eq!(list_bundles(&dest).unwrap(), result.bundles);

        let part1 = dest.join(Packager::bundle_name(harness.day("2024-01-02"), 1));
        assert_eq!(tree(&part1), vec!["docs/a.bin", "docs/b.bin"]);
        assert_eq!(
            fs::read_to_string(part1.join("docs/b.bin")).unwrap(),
            "B".repeat(400)
        );
        let part3 = dest.join(Packager::bundle_name(harness.day("2024-01-02"), 3));
        assert_eq!(tree(&part3), vec!["docs/d.bin"]);
    }

    #[test]
    fn test_existing_destination_needs_force() {
        let harness = harness_with_history();
        let dest = harness.path("export");
        fs::create_dir_all(&dest).unwrap();

        let err = Packager::new(&harness.config, 1_000)
            .package(&dest, harness.day("2024-01-02"))
            .unwrap_err();
        assert!(err.is_precondition());

        let result = Packager::new(&harness.config, 1_000)
            .force(true)
            .package(&dest, harness.day("2024-01-02"))
            .unwrap();
        assert_eq!(result.files_packaged, 4);
    }

    #[test]
    fn test_rerun_skips_existing_and_keeps_layout() {
        let harness = harness_with_history();
        let dest = harness.path("export");
        let packager = Packager::new(&harness.config, 1_000).full(true);
        let first = packager.package(&dest, harness.day("2024-01-02")).unwrap();

        let second = packager
            .clone()
            .force(true)
            .package(&dest, harness.day("2024-01-02"))
            .unwrap();
        assert_eq!(second.files_packaged, 0);
        assert_eq!(second.files_skipped_existing, 4);
        assert_eq!(second.bundles, first.bundles);
    }

    #[test]
    fn test_incremental_package_after_cutoff() {
        let harness = harness_with_history();
        Packager::new(&harness.config, 10_000)
            .full(true)
            .package(&harness.path("export-1"), harness.day("2024-01-02"))
            .unwrap();

        harness.write("a.bin", &"A".repeat(400), 3_000);
        harness.backup("2024-01-03");

        let dest = harness.path("export-2");
        let result = Packager::new(&harness.config, 10_000)
            .package(&dest, harness.day("2024-01-03"))
            .unwrap();
        assert!(result.issues.is_empty());
        assert!(!result.cutoff_written);
        assert_eq!(result.files_packaged, 1);
        let part1 = dest.join(Packager::bundle_name(harness.day("2024-01-03"), 1));
        assert_eq!(tree(&part1), vec!["docs/a.bin"]);
    }

    #[test]
    fn test_empty_window_packages_nothing() {
        let harness = BackupHarness::new();
        let dest = harness.path("export");
        let result = Packager::new(&harness.config, 1_000)
            .package(&dest, harness.day("2024-01-01"))
            .unwrap();
        assert!(result.bundles.is_empty());
        assert_eq!(result.files_packaged, 0);
    }
}

#[cfg(test)]
mod refresh_tests {
    use super::*;

    #[test]
    fn test_refresh_after_manual_mirror_edit() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "a", 1_000);
        harness.write("b.txt", "b", 1_000);
        harness.backup("2024-01-01");

        // Someone deletes a mirror copy by hand
        fs::remove_file(harness.mirror("a.txt")).unwrap();
        let result = refresh_state(&harness.config, harness.day("2024-01-02")).unwrap();
        assert_eq!(result.files, 1);
        assert!(result.issues.is_empty());
        assert!(harness
            .config
            .destination
            .directory_partial
            .join("2024-01-02")
            .join(state::DAY_FULL_STATE_FILE)
            .exists());

        // The next backup sees the file as new and restores the mirror copy
        let report = harness.backup("2024-01-02");
        assert_eq!(report.files_new, 1);
        assert_eq!(report.files_unchanged, 1);
        assert!(harness.mirror("a.txt").exists());
    }
}
