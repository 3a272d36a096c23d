//! Backup rotation tool
//!
//! Moves fresh backups out of the producer's directory, archives them, uploads the
//! configured categories over FTPS and prunes old local archives.

// backup-rotator/src/main.rs
mod config;
mod errors;
mod events;
mod rotation;
mod storage;
mod utils;

use anyhow::{Context, Result};
use config::{RawJsonConfig, RotationConfig};
use events::TracingLog;
use rotation::RunReport;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

const CONFIG_PATH_ENV: &str = "BACKUP_ROTATOR_CONFIG";
const PASSWORD_ENV: &str = "BACKUP_ROTATOR_REMOTE_PASSWORD";
const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Main entry point for the rotation tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    if let Err(e) = utils::logging::init_tracing_subscriber() {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app().await {
        Ok(report) if report.is_clean() => {
            tracing::info!("✅ Rotation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            for failure in &report.failures {
                tracing::error!(%failure, "rotation step failed");
            }
            tracing::error!(
                failures = report.failures.len(),
                "❌ Rotation finished with failures; affected units are left for the next run."
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<RunReport> {
    // First argument wins, then the environment, then ./config.json.
    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_PATH_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let raw_config = RawJsonConfig::load_from_json(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?
        .with_password_override(env::var(PASSWORD_ENV).ok());
    let config = RotationConfig::from_raw(raw_config)
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        branch = %config.branch,
        categories = ?config.backup_types,
        uploads = ?config.upload_backup_types,
        keep = config.keep_not_uploaded_items,
        "🚀 Starting backup rotation"
    );

    // The FTP client and filesystem work are blocking; keep them off the async workers.
    let report = tokio::task::spawn_blocking(move || {
        rotation::run_rotation_flow(&config, &TracingLog)
    })
    .await
    .context("Rotation task panicked")?
    .context("Failed to open remote session")?;
    Ok(report)
}
