//! Structured run events and the logging capability the pipeline stages write to.

use chrono::{DateTime, Local};
use std::time::SystemTime;

use crate::errors::{RotationError, Stage};

#[derive(Debug)]
pub enum Outcome<'a> {
    /// Unit moved from the producer directory into staging.
    Moved,
    /// Archive written; carries its size in bytes.
    Compressed(u64),
    Uploaded,
    /// Archive kept locally (not an upload category).
    Kept,
    /// Entry left alone because it was not relocated in this run.
    Skipped,
    /// Archive removed by the retention policy.
    Pruned(SystemTime),
    Failed(&'a RotationError),
}

impl Outcome<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Moved => "moved",
            Outcome::Compressed(_) => "compressed",
            Outcome::Uploaded => "uploaded",
            Outcome::Kept => "kept",
            Outcome::Skipped => "skipped",
            Outcome::Pruned(_) => "pruned",
            Outcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct Event<'a> {
    pub stage: Stage,
    pub category: &'a str,
    pub unit: Option<&'a str>,
    pub outcome: Outcome<'a>,
}

impl<'a> Event<'a> {
    pub fn new(
        stage: Stage,
        category: &'a str,
        unit: Option<&'a str>,
        outcome: Outcome<'a>,
    ) -> Self {
        Event { stage, category, unit, outcome }
    }
}

/// Sink for pipeline events, handed to every stage by the caller.
pub trait RotationLog {
    fn record(&self, event: Event<'_>);
}

/// Forwards events to the process-wide `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl RotationLog for TracingLog {
    fn record(&self, event: Event<'_>) {
        let stage = event.stage;
        let category = event.category;
        let unit = event.unit.unwrap_or("-");
        match event.outcome {
            Outcome::Failed(error) => {
                tracing::warn!(%stage, category, unit, %error, "step failed");
            }
            Outcome::Compressed(bytes) => {
                tracing::info!(%stage, category, unit, bytes, "archive created");
            }
            Outcome::Pruned(created) => {
                let created: DateTime<Local> = created.into();
                tracing::info!(
                    %stage,
                    category,
                    unit,
                    created = %created.format("%Y-%m-%d %H:%M:%S"),
                    "old archive removed"
                );
            }
            Outcome::Skipped => {
                tracing::debug!(%stage, category, unit, "not pending in this run, skipped");
            }
            outcome => {
                tracing::info!(%stage, category, unit, outcome = outcome.label());
            }
        }
    }
}
