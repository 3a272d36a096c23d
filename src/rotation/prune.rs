// backup-rotator/src/rotation/prune.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::archive::is_archive_name;
use super::Unreadable;
use super::logic::RunReport;
use crate::errors::{RotationError, Stage};
use crate::events::{Event, Outcome, RotationLog};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub path: PathBuf,
    pub created: SystemTime,
}

/// Keeps the `keep` newest archives of every category that is not uploaded.
///
/// Upload categories are skipped; their archives are deleted right after upload.
pub fn prune_all(
    categories: &[String],
    staging_root: &Path,
    upload_categories: &[String],
    keep: usize,
    log: &dyn RotationLog,
    report: &mut RunReport,
) {
    for category in categories {
        if upload_categories.iter().any(|c| c == category) {
            continue;
        }
        let category_dir = staging_root.join(category);
        let archives = match list_archives(&category_dir) {
            Ok((archives, unreadable)) => {
                for bad in unreadable {
                    let cause = RotationError::filesystem(bad.path, bad.error);
                    report.record_failure(log, Stage::Prune, category, bad.unit.as_deref(), cause);
                }
                archives
            }
            Err(e) => {
                let cause = RotationError::filesystem(&category_dir, e);
                report.record_failure(log, Stage::Prune, category, None, cause);
                continue;
            }
        };
        tracing::debug!(
            category = %category,
            archives = archives.len(),
            keep,
            "applying retention"
        );

        for entry in select_for_removal(archives, keep) {
            let unit = Some(entry.name.as_str());
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    let pruned = Outcome::Pruned(entry.created);
                    log.record(Event::new(Stage::Prune, category, unit, pruned));
                    report.pruned += 1;
                }
                Err(e) => {
                    let cause = RotationError::filesystem(&entry.path, e);
                    report.record_failure(log, Stage::Prune, category, unit, cause);
                }
            }
        }
    }
}

/// Orders archives newest first and returns everything past the first `keep`.
/// Equal timestamps fall back to name order, so the choice is repeatable.
pub fn select_for_removal(mut archives: Vec<ArchiveEntry>, keep: usize) -> Vec<ArchiveEntry> {
    archives.sort_by(|a, b| a.name.cmp(&b.name));
    archives.sort_by(|a, b| b.created.cmp(&a.created));
    archives.into_iter().skip(keep).collect()
}

/// Regular `*.tar.gz` files directly under `dir`. Raw unit directories are left out so a
/// unit whose compression failed is never pruned before it is retried.
///
/// An entry that cannot be inspected is returned separately and does not stop the rest.
fn list_archives(dir: &Path) -> io::Result<(Vec<ArchiveEntry>, Vec<Unreadable>)> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), Vec::new())),
        Err(e) => return Err(e),
    };

    let mut archives = Vec::new();
    let mut unreadable = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                unreadable.push(Unreadable {
                    path: dir.to_path_buf(),
                    unit: None,
                    error,
                });
                continue;
            }
        };
        // Names that are not UTF-8 cannot be archives written by this tool.
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_archive_name(&name) {
            continue;
        }
        match archive_entry(&entry, name.clone()) {
            Ok(Some(archive)) => archives.push(archive),
            Ok(None) => {}
            Err(error) => unreadable.push(Unreadable {
                path: entry.path(),
                unit: Some(name),
                error,
            }),
        }
    }
    Ok((archives, unreadable))
}

fn archive_entry(entry: &fs::DirEntry, name: String) -> io::Result<Option<ArchiveEntry>> {
    if !entry.file_type()?.is_file() {
        return Ok(None);
    }
    let metadata = entry.metadata()?;
    // Not every filesystem records a birth time.
    let created = metadata.created().or_else(|_| metadata.modified())?;
    Ok(Some(ArchiveEntry {
        name,
        path: entry.path(),
        created,
    }))
}
