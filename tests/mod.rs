//! Main test module for dabbak
//!
//! This module includes all test suites:
//! - Integration tests for multi-day backup, restore and packaging scenarios
//! - Property-based tests for invariants
//! - Edge cases

pub mod integration;

#[cfg(test)]
mod edge_cases {
    use crate::integration::BackupHarness;
    use ::dabbak::*;
    use std::fs;

    #[test]
    fn test_empty_source() {
        let harness = BackupHarness::new();

        let report = harness.backup("2024-01-01");
        assert_eq!(report.files_new, 0);
        assert!(report.is_clean());
        assert!(harness.state().is_empty());

        // The day still has a snapshot, so it can be restored (to nothing)
        let dest = harness.path("restored");
        let result = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-01"))
            .unwrap();
        assert_eq!(result.files_restored, 0);
    }

    #[test]
    fn test_special_filenames() {
        let harness = BackupHarness::new();
        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file@with#special$chars.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
        ];
        let mut written = 0;
        for name in &special_names {
            if fs::write(harness.source.join(name), format!("Content of {}", name)).is_ok() {
                written += 1;
            }
        }

        let report = harness.backup("2024-01-01");
        assert_eq!(report.files_new, written);

        let dest = harness.path("restored");
        let result = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-01"))
            .unwrap();
        assert_eq!(result.files_restored, written);
        for name in &special_names {
            if harness.source.join(name).exists() {
                assert_eq!(
                    fs::read_to_string(dest.join("docs").join(name)).unwrap(),
                    format!("Content of {}", name)
                );
            }
        }
    }

    #[test]
    fn test_empty_file() {
        let harness = BackupHarness::new();
        harness.write("empty.txt", "", 1_000);
        harness.backup("2024-01-01");

        assert!(harness.mirror("empty.txt").exists());
        assert_eq!(fs::metadata(harness.mirror("empty.txt")).unwrap().len(), 0);
    }

    #[test]
    fn test_future_timestamp_uses_latest_snapshot() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "v1", 1_000);
        harness.backup("2024-01-01");

        let dest = harness.path("restored");
        let result = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2030-12-31"))
            .unwrap();
        assert_eq!(result.anchor, Some(harness.day("2024-01-01")));
        assert_eq!(result.files_restored, 1);
    }

    #[test]
    fn test_restore_before_first_snapshot_fails() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "v1", 1_000);
        harness.backup("2024-01-05");

        let dest = harness.path("restored");
        let err = Restorer::new(&harness.config)
            .restore(&dest, harness.day("2024-01-04"))
            .unwrap_err();
        assert!(matches!(err, DabbakError::NoSnapshot(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_stray_entries_in_partial_root_ignored() {
        let harness = BackupHarness::new();
        harness.write("a.txt", "v1", 1_000);
        harness.backup("2024-01-01");
        fs::create_dir_all(harness.config.destination.directory_partial.join("not-a-day")).unwrap();
        fs::write(
            harness.config.destination.directory_partial.join("2024-01-02"),
            "a file named like a day",
        )
        .unwrap();

        let history = SnapshotHistory::load(&harness.config.destination.directory_partial).unwrap();
        assert_eq!(history.days(), &[harness.day("2024-01-01")]);
    }
}
