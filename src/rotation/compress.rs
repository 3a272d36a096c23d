// backup-rotator/src/rotation/compress.rs
use std::fs;
use std::io;
use std::path::Path;

use super::archive::{archive_path_for, create_tar_gz_archive, is_archive_name};
use super::logic::RunReport;
use super::relocate::PendingSet;
use super::{list_entry_names, remove_path};
use crate::errors::{RotationError, Stage, TransferError};
use crate::events::{Event, Outcome, RotationLog};
use crate::storage::RemoteStore;

/// Archives every unit relocated in this run and ships archives of upload categories.
///
/// For each pending unit:
/// 1. Compress `<staging>/<category>/<unit>` into `<unit>.tar.gz` next to it.
/// 2. Upload categories: upload, then delete the local archive. A failed upload keeps
///    the archive for the next attempt.
/// 3. Delete the raw unit.
///
/// If compression fails the raw unit is left untouched. A later run picks it up again:
/// a staging directory without a `<unit>.tar.gz` beside it can only be such a leftover,
/// because every successful pass deletes the raw directory. Existing archives and
/// anything else not relocated in this run are never touched here.
pub fn process_all(
    categories: &[String],
    staging_root: &Path,
    upload_categories: &[String],
    pending: &PendingSet,
    mut store: Option<&mut (dyn RemoteStore + '_)>,
    log: &dyn RotationLog,
    report: &mut RunReport,
) {
    for category in categories {
        let category_dir = staging_root.join(category);
        let names = match list_entry_names(&category_dir) {
            Ok(listing) => listing.into_names(Stage::Archive, category, log, report),
            // relocation already reported why the directory is missing
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                let cause = RotationError::filesystem(&category_dir, e);
                report.record_failure(log, Stage::Archive, category, None, cause);
                continue;
            }
        };
        let upload = upload_categories.iter().any(|c| c == category);

        for name in names {
            let path = category_dir.join(&name);
            if !pending.contains(category, &name) {
                if !awaits_retry(&path, &name) {
                    let unit = Some(name.as_str());
                    log.record(Event::new(Stage::Archive, category, unit, Outcome::Skipped));
                    continue;
                }
                tracing::info!(
                    category = %category,
                    unit = %name,
                    "retrying unit left behind by an earlier failed compression"
                );
            }
            let unit = Unit {
                category,
                name: &name,
                path: &path,
            };
            process_unit(&unit, upload, store.as_deref_mut(), log, report);
        }
    }
}

/// A raw unit directory with no archive next to it.
fn awaits_retry(path: &Path, name: &str) -> bool {
    if is_archive_name(name) {
        return false;
    }
    let is_dir = fs::symlink_metadata(path).is_ok_and(|m| m.is_dir());
    is_dir && fs::symlink_metadata(archive_path_for(path)).is_err()
}

struct Unit<'a> {
    category: &'a str,
    name: &'a str,
    path: &'a Path,
}

fn process_unit(
    unit: &Unit<'_>,
    upload: bool,
    store: Option<&mut (dyn RemoteStore + '_)>,
    log: &dyn RotationLog,
    report: &mut RunReport,
) {
    let archive_path = archive_path_for(unit.path);
    let event = |outcome| Event::new(Stage::Archive, unit.category, Some(unit.name), outcome);

    match create_tar_gz_archive(unit.path, &archive_path) {
        Ok(bytes) => {
            log.record(event(Outcome::Compressed(bytes)));
            report.archived += 1;
        }
        Err(e) => {
            // A partial archive is useless; the raw unit stays for the next run.
            if archive_path.is_file() {
                let _ = fs::remove_file(&archive_path);
            }
            let cause = RotationError::compression(unit.path, e);
            report.record_failure(log, Stage::Archive, unit.category, Some(unit.name), cause);
            return;
        }
    }

    if upload {
        let uploaded = match store {
            Some(store) => store.upload_file(&archive_path, unit.category),
            None => Err(TransferError::NotConnected),
        };
        match uploaded {
            Ok(()) => {
                log.record(event(Outcome::Uploaded));
                report.uploaded += 1;
                remove_quietly(&archive_path, unit, log, report);
            }
            Err(e) => {
                let cause = e.into();
                report.record_failure(log, Stage::Archive, unit.category, Some(unit.name), cause);
            }
        }
    } else {
        log.record(event(Outcome::Kept));
    }

    remove_quietly(unit.path, unit, log, report);
}

/// Deletes `path`; a path that is already gone counts as deleted.
fn remove_quietly(path: &Path, unit: &Unit<'_>, log: &dyn RotationLog, report: &mut RunReport) {
    match remove_path(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            let cause = RotationError::filesystem(path, e);
            report.record_failure(log, Stage::Archive, unit.category, Some(unit.name), cause);
        }
    }
}
