//! Process-wide tracing setup for the rotator binary.

use anyhow::{Context, Result};
use std::env;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt};

pub const LOG_FILE_ENV: &str = "BACKUP_ROTATOR_LOG_FILE";
pub const DEFAULT_LOG_FILE: &str = "backups.log";

/// Logs to stdout and appends the same events, without colours, to the log file.
pub fn init_tracing_subscriber() -> Result<()> {
    // Use INFO level by default.
    let directive = format!(
        "info,{}",
        env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default()
    );
    let log_path = env::var(LOG_FILE_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path))?;

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(EnvFilter::new(directive))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    tracing::debug!(log_file = %log_path, "initialized global tracing subscriber");
    Ok(())
}
