pub(crate) mod archive;  // tar.gz creation
pub(crate) mod compress; // archive + upload stage
pub(crate) mod logic;    // stage sequencing and run report
pub(crate) mod prune;    // retention for local-only categories
pub(crate) mod relocate; // producer -> staging moves

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::RotationConfig;
use crate::errors::{ConnectionError, RotationError, Stage};
use crate::events::RotationLog;
use crate::storage::{FtpsStore, RemoteStore};

pub use logic::{Orchestrator, RunReport};

/// Public entry point for one rotation run.
///
/// Opens the remote session when any category is uploaded, runs the pipeline and
/// closes the session again before returning. A connection failure aborts the run
/// before anything is touched on disk.
pub fn run_rotation_flow(
    config: &RotationConfig,
    log: &dyn RotationLog,
) -> Result<RunReport, ConnectionError> {
    let mut store = match &config.remote {
        Some(remote) => Some(FtpsStore::connect(remote, &config.branch)?),
        None => {
            tracing::info!("no upload categories configured, running without remote session");
            None
        }
    };
    Ok(run_with_session(
        config,
        log,
        store.as_mut().map(|s| s as &mut dyn RemoteStore),
    ))
}

/// Runs the pipeline and always releases the session afterwards.
pub(crate) fn run_with_session(
    config: &RotationConfig,
    log: &dyn RotationLog,
    mut store: Option<&mut (dyn RemoteStore + '_)>,
) -> RunReport {
    let report = Orchestrator::new(config, log).run(store.as_deref_mut());
    if let Some(store) = store {
        if let Err(e) = store.close() {
            tracing::warn!(error = %e, "failed to close remote session");
        }
    }
    report
}

/// Entries directly under a directory: readable names sorted, plus the ones that could
/// not be read. A bad entry never hides its siblings.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    pub names: Vec<String>,
    pub unreadable: Vec<Unreadable>,
}

#[derive(Debug)]
pub(crate) struct Unreadable {
    pub path: PathBuf,
    /// Lossy entry name, when the entry itself could be read.
    pub unit: Option<String>,
    pub error: io::Error,
}

impl Listing {
    /// Reports every unreadable entry as a failure of `stage` and hands back the names.
    pub(crate) fn into_names(
        self,
        stage: Stage,
        category: &str,
        log: &dyn RotationLog,
        report: &mut RunReport,
    ) -> Vec<String> {
        for bad in self.unreadable {
            report.record_failure(
                log,
                stage,
                category,
                bad.unit.as_deref(),
                RotationError::filesystem(bad.path, bad.error),
            );
        }
        self.names
    }
}

/// Lists `dir`. Only failing to open the directory itself is an error.
pub(crate) fn list_entry_names(dir: &Path) -> io::Result<Listing> {
    let mut listing = Listing::default();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                listing.unreadable.push(Unreadable {
                    path: dir.to_path_buf(),
                    unit: None,
                    error,
                });
                continue;
            }
        };
        match entry.file_name().into_string() {
            Ok(name) => listing.names.push(name),
            Err(name) => listing.unreadable.push(Unreadable {
                path: entry.path(),
                unit: Some(name.to_string_lossy().into_owned()),
                error: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entry name {:?} is not valid UTF-8", name),
                ),
            }),
        }
    }
    listing.names.sort();
    Ok(listing)
}

/// Removes a file, symlink or whole directory tree.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
