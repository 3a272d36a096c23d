// backup-rotator/src/rotation/logic.rs
use crate::config::RotationConfig;
use crate::errors::{RotationError, RunError, Stage};
use crate::events::{Event, Outcome, RotationLog};
use crate::storage::RemoteStore;

use super::{compress, prune, relocate};

/// What one run did, and everything that went wrong along the way.
#[derive(Debug, Default)]
pub struct RunReport {
    pub relocated: usize,
    pub archived: usize,
    pub uploaded: usize,
    pub pruned: usize,
    pub failures: Vec<RunError>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Emits a failure event and keeps the error for the final report.
    pub(crate) fn record_failure(
        &mut self,
        log: &dyn RotationLog,
        stage: Stage,
        category: &str,
        unit: Option<&str>,
        cause: RotationError,
    ) {
        log.record(Event::new(stage, category, unit, Outcome::Failed(&cause)));
        self.failures.push(RunError {
            stage,
            category: category.to_string(),
            unit: unit.map(str::to_string),
            cause,
        });
    }
}

/// Sequences relocate -> archive -> prune for every configured category.
pub struct Orchestrator<'a> {
    config: &'a RotationConfig,
    log: &'a dyn RotationLog,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a RotationConfig, log: &'a dyn RotationLog) -> Self {
        Orchestrator { config, log }
    }

    /// Runs all three stages in order. Failures are collected rather than returned
    /// early, so later stages still see every category that was not affected.
    pub fn run(&self, store: Option<&mut (dyn RemoteStore + '_)>) -> RunReport {
        let config = self.config;
        let mut report = RunReport::default();

        let pending = relocate::relocate_all(
            &config.backup_types,
            &config.producer_root,
            &config.staging_root,
            self.log,
            &mut report,
        );
        tracing::debug!(pending = pending.len(), "relocation finished");

        compress::process_all(
            &config.backup_types,
            &config.staging_root,
            &config.upload_backup_types,
            &pending,
            store,
            self.log,
            &mut report,
        );

        prune::prune_all(
            &config.backup_types,
            &config.staging_root,
            &config.upload_backup_types,
            config.keep_not_uploaded_items,
            self.log,
            &mut report,
        );

        tracing::info!(
            relocated = report.relocated,
            archived = report.archived,
            uploaded = report.uploaded,
            pruned = report.pruned,
            failures = report.failures.len(),
            "rotation run finished"
        );
        report
    }
}
