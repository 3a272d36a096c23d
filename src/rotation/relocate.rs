// backup-rotator/src/rotation/relocate.rs
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

use super::logic::RunReport;
use super::{list_entry_names, remove_path};
use crate::errors::{RotationError, Stage};
use crate::events::{Event, Outcome, RotationLog};

/// `(category, unit)` pairs moved into staging during the current run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingSet {
    units: BTreeSet<(String, String)>,
}

impl PendingSet {
    pub fn insert(&mut self, category: &str, unit: &str) {
        self.units.insert((category.to_string(), unit.to_string()));
    }

    pub fn contains(&self, category: &str, unit: &str) -> bool {
        self.units.contains(&(category.to_string(), unit.to_string()))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Moves every entry of `<producer_root>/<category>` into `<staging_root>/<category>`.
///
/// Categories are handled in the given order. A category whose producer directory is
/// missing is reported and skipped; whatever was moved before stays moved.
pub fn relocate_all(
    categories: &[String],
    producer_root: &Path,
    staging_root: &Path,
    log: &dyn RotationLog,
    report: &mut RunReport,
) -> PendingSet {
    let mut pending = PendingSet::default();

    for category in categories {
        let source_dir = producer_root.join(category);
        let target_dir = staging_root.join(category);

        if let Err(e) = fs::create_dir_all(&target_dir) {
            let cause = RotationError::filesystem(&target_dir, e);
            report.record_failure(log, Stage::Relocate, category, None, cause);
            continue;
        }

        let names = match list_entry_names(&source_dir) {
            Ok(listing) => listing.into_names(Stage::Relocate, category, log, report),
            Err(e) => {
                let cause = RotationError::filesystem(&source_dir, e);
                report.record_failure(log, Stage::Relocate, category, None, cause);
                continue;
            }
        };

        for name in names {
            let from = source_dir.join(&name);
            let to = target_dir.join(&name);
            let unit = Some(name.as_str());
            match move_entry(&from, &to) {
                Ok(moved) => {
                    log.record(Event::new(Stage::Relocate, category, unit, Outcome::Moved));
                    pending.insert(category, &name);
                    report.relocated += 1;
                    if let Moved::SourceLeftBehind(e) = moved {
                        let cause = RotationError::filesystem(&from, e);
                        report.record_failure(log, Stage::Relocate, category, unit, cause);
                    }
                }
                Err(e) => {
                    let cause = RotationError::filesystem(&from, e);
                    report.record_failure(log, Stage::Relocate, category, unit, cause);
                }
            }
        }
    }

    pending
}

#[derive(Debug)]
enum Moved {
    Clean,
    /// The staging copy is complete but the producer copy could not be deleted.
    SourceLeftBehind(io::Error),
}

/// Renames `from` to `to`, copying and deleting instead when they live on different
/// filesystems. Refuses to replace an existing `to`.
fn move_entry(from: &Path, to: &Path) -> io::Result<Moved> {
    if fs::symlink_metadata(to).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists in staging", to.display()),
        ));
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(Moved::Clean),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_across(from, to, remove_path),
        Err(e) => Err(e),
    }
}

/// Copies `from` to `to`, then deletes `from` with `remove_source`.
///
/// A failed copy is rolled back and leaves the source untouched. Once the copy is
/// complete it is kept even if deleting the source fails, since the source may already
/// be partly gone; the unit then counts as moved.
fn copy_across(
    from: &Path,
    to: &Path,
    remove_source: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<Moved> {
    if let Err(copy_err) = copy_recursively(from, to) {
        let _ = remove_path(to);
        return Err(copy_err);
    }
    match remove_source(from) {
        Ok(()) => Ok(Moved::Clean),
        Err(e) => {
            tracing::warn!(
                source = %from.display(),
                error = %e,
                "unit copied to staging but its producer copy could not be removed"
            );
            Ok(Moved::SourceLeftBehind(e))
        }
    }
}

fn copy_recursively(from: &Path, to: &Path) -> io::Result<()> {
    if !fs::symlink_metadata(from)?.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from).map_err(io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::MemoryLog;

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_units_are_moved_and_recorded() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let producer = dir.path().join("producer");
        let staging = dir.path().join("staging");
        fs::create_dir_all(producer.join("daily/2024-01-01/sub"))?;
        fs::write(producer.join("daily/2024-01-01/sub/db.fmp12"), b"data")?;
        fs::create_dir_all(producer.join("daily/2024-01-02"))?;
        fs::create_dir_all(producer.join("weekly/2024-W01"))?;

        let log = MemoryLog::default();
        let mut report = RunReport::default();
        let daily_weekly = categories(&["daily", "weekly"]);
        let pending = relocate_all(&daily_weekly, &producer, &staging, &log, &mut report);

        assert_eq!(pending.len(), 3);
        assert!(pending.contains("daily", "2024-01-01"));
        assert!(pending.contains("daily", "2024-01-02"));
        assert!(pending.contains("weekly", "2024-W01"));
        assert!(!pending.contains("weekly", "2024-01-01"));
        assert_eq!(report.relocated, 3);
        assert!(report.is_clean());

        assert_eq!(fs::read(staging.join("daily/2024-01-01/sub/db.fmp12"))?, b"data");
        assert_eq!(fs::read_dir(producer.join("daily"))?.count(), 0);
        assert_eq!(fs::read_dir(producer.join("weekly"))?.count(), 0);
        assert_eq!(log.count(Stage::Relocate, "moved"), 3);
        Ok(())
    }

    #[test]
    fn test_missing_producer_category_fails_only_that_category() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let producer = dir.path().join("producer");
        let staging = dir.path().join("staging");
        fs::create_dir_all(producer.join("weekly/2024-W01"))?;

        let log = MemoryLog::default();
        let mut report = RunReport::default();
        let daily_weekly = categories(&["daily", "weekly"]);
        let pending = relocate_all(&daily_weekly, &producer, &staging, &log, &mut report);

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.stage, Stage::Relocate);
        assert_eq!(failure.category, "daily");
        assert!(failure.unit.is_none());

        assert!(pending.contains("weekly", "2024-W01"));
        assert!(staging.join("daily").is_dir());
        assert!(staging.join("weekly/2024-W01").is_dir());
        Ok(())
    }

    #[test]
    fn test_name_clash_in_staging_keeps_unit_in_producer() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let producer = dir.path().join("producer");
        let staging = dir.path().join("staging");
        fs::create_dir_all(producer.join("daily/2024-01-01"))?;
        fs::write(producer.join("daily/2024-01-01/new.bin"), b"new")?;
        fs::create_dir_all(producer.join("daily/2024-01-02"))?;
        fs::create_dir_all(staging.join("daily/2024-01-01"))?;

        let log = MemoryLog::default();
        let mut report = RunReport::default();
        let pending = relocate_all(&categories(&["daily"]), &producer, &staging, &log, &mut report);

        assert!(!pending.contains("daily", "2024-01-01"));
        assert!(pending.contains("daily", "2024-01-02"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit.as_deref(), Some("2024-01-01"));
        assert!(producer.join("daily/2024-01-01/new.bin").is_file());
        Ok(())
    }

    #[test]
    fn test_second_pass_relocates_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let producer = dir.path().join("producer");
        let staging = dir.path().join("staging");
        fs::create_dir_all(producer.join("daily/2024-01-01"))?;

        let log = MemoryLog::default();
        let mut report = RunReport::default();
        relocate_all(&categories(&["daily"]), &producer, &staging, &log, &mut report);
        let pending = relocate_all(&categories(&["daily"]), &producer, &staging, &log, &mut report);

        assert!(pending.is_empty());
        assert_eq!(report.relocated, 1);
        Ok(())
    }

    #[test]
    fn test_copy_recursively_copies_tree() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let from = dir.path().join("from");
        fs::create_dir_all(from.join("a/b"))?;
        fs::write(from.join("a/b/c.txt"), b"c")?;
        fs::write(from.join("top.txt"), b"t")?;

        let to = dir.path().join("to");
        copy_recursively(&from, &to)?;
        assert_eq!(fs::read(to.join("a/b/c.txt"))?, b"c");
        assert_eq!(fs::read(to.join("top.txt"))?, b"t");
        Ok(())
    }

    #[test]
    fn test_copy_across_keeps_complete_copy_when_source_removal_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let from = dir.path().join("2024-01-01");
        fs::create_dir_all(from.join("sub"))?;
        fs::write(from.join("sub/db.fmp12"), b"data")?;
        let to = dir.path().join("staged");

        let moved = copy_across(&from, &to, |_| {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        })?;

        match moved {
            Moved::SourceLeftBehind(e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            Moved::Clean => panic!("source removal failure was not reported"),
        }
        assert_eq!(fs::read(to.join("sub/db.fmp12"))?, b"data");
        assert!(from.join("sub/db.fmp12").is_file());
        Ok(())
    }

    #[test]
    fn test_copy_across_rolls_back_failed_copy() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let from = dir.path().join("absent");
        let to = dir.path().join("staged");

        let err = copy_across(&from, &to, remove_path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!to.exists());
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreadable_name_fails_alone() -> anyhow::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir()?;
        let producer = dir.path().join("producer");
        let staging = dir.path().join("staging");
        fs::create_dir_all(producer.join("daily/2024-01-01"))?;
        fs::create_dir_all(producer.join("daily").join(OsStr::from_bytes(b"odd\xfe")))?;
        fs::create_dir_all(producer.join("daily/2024-01-02"))?;

        let log = MemoryLog::default();
        let mut report = RunReport::default();
        let pending = relocate_all(&categories(&["daily"]), &producer, &staging, &log, &mut report);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Relocate);
        assert_eq!(pending.len(), 2);
        assert!(staging.join("daily/2024-01-01").is_dir());
        assert!(staging.join("daily/2024-01-02").is_dir());
        Ok(())
    }
}
