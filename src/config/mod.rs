// backup-rotator/src/config/mod.rs
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

pub const DEFAULT_FTP_PORT: u16 = 21;

// Struct for deserializing config.json. Every field is optional so that validation
// can report all problems at once instead of stopping at the first missing key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    #[serde(alias = "fpt_server")]
    pub remote_address: Option<String>,
    #[serde(alias = "fpt_username")]
    pub remote_username: Option<String>,
    #[serde(alias = "fpt_password")]
    pub remote_password: Option<String>,
    pub remote_accept_invalid_certs: Option<bool>,
    #[serde(alias = "filemaker_path")]
    pub producer_root: Option<PathBuf>,
    #[serde(alias = "backups_path")]
    pub staging_root: Option<PathBuf>,
    pub branch: Option<String>,
    pub backup_types: Option<Vec<String>>,
    pub upload_backup_types: Option<Vec<String>>,
    pub keep_not_uploaded_items: Option<i64>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub accept_invalid_certs: bool,
}

impl RemoteConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// `None` when no category is uploaded; no session is opened then.
    pub remote: Option<RemoteConfig>,
    pub producer_root: PathBuf,
    pub staging_root: PathBuf,
    pub branch: String,
    pub backup_types: Vec<String>,
    pub upload_backup_types: Vec<String>,
    pub keep_not_uploaded_items: usize,
}

impl RotationConfig {
    pub fn from_raw(raw: RawJsonConfig) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();

        let backup_types = raw.backup_types.unwrap_or_default();
        if backup_types.is_empty() {
            problems.push("backup_types must list at least one category".to_string());
        }
        let mut seen = HashSet::new();
        for name in &backup_types {
            if let Some(problem) = invalid_name_problem("backup_types entry", name) {
                problems.push(problem);
            }
            if !seen.insert(name.as_str()) {
                problems.push(format!("backup_types lists '{}' more than once", name));
            }
        }

        let upload_backup_types = raw.upload_backup_types.unwrap_or_default();
        for name in &upload_backup_types {
            if !seen.contains(name.as_str()) {
                problems.push(format!(
                    "upload_backup_types entry '{}' is not one of backup_types",
                    name
                ));
            }
        }

        let branch = raw.branch.unwrap_or_default();
        if let Some(problem) = invalid_name_problem("branch", &branch) {
            problems.push(problem);
        }

        let producer_root = required_path("producer_root", raw.producer_root, &mut problems);
        let staging_root = required_path("staging_root", raw.staging_root, &mut problems);
        if !producer_root.as_os_str().is_empty() && producer_root == staging_root {
            problems.push(
                "producer_root and staging_root must be different directories".to_string(),
            );
        }

        let keep_not_uploaded_items = match raw.keep_not_uploaded_items {
            Some(count) if count < 0 => {
                problems.push(format!("keep_not_uploaded_items must be >= 0, got {}", count));
                0
            }
            Some(count) => usize::try_from(count).unwrap_or_else(|_| {
                problems.push(format!(
                    "keep_not_uploaded_items {} does not fit this platform's usize",
                    count
                ));
                0
            }),
            None => {
                problems.push("keep_not_uploaded_items must be set".to_string());
                0
            }
        };

        // Remote credentials only matter when something is uploaded.
        let remote = if upload_backup_types.is_empty() {
            None
        } else {
            let address = required_text("remote_address", raw.remote_address, &mut problems);
            let username = required_text("remote_username", raw.remote_username, &mut problems);
            let password = raw.remote_password;
            if password.is_none() {
                problems.push(
                    "remote_password must be set when uploads are configured".to_string(),
                );
            }
            match split_address(&address) {
                Ok((host, port)) => Some(RemoteConfig {
                    host,
                    port,
                    username,
                    password: password.unwrap_or_default(),
                    accept_invalid_certs: raw.remote_accept_invalid_certs.unwrap_or(false),
                }),
                Err(problem) => {
                    if !address.is_empty() {
                        problems.push(problem);
                    }
                    None
                }
            }
        };

        if !problems.is_empty() {
            return Err(ConfigError::Invalid { problems });
        }

        Ok(RotationConfig {
            remote,
            producer_root,
            staging_root,
            branch,
            backup_types,
            upload_backup_types,
            keep_not_uploaded_items,
        })
    }
}

impl RawJsonConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self, ConfigError> {
        let config_content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&config_content).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Replaces the password from the file, typically with one taken from the environment.
    pub fn with_password_override(mut self, password: Option<String>) -> Self {
        if let Some(password) = password {
            self.remote_password = Some(password);
        }
        self
    }
}

fn required_text(field: &str, value: Option<String>, problems: &mut Vec<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => {
            problems.push(format!("{} must be set and non-empty", field));
            String::new()
        }
    }
}

fn required_path(field: &str, value: Option<PathBuf>, problems: &mut Vec<String>) -> PathBuf {
    match value {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => {
            problems.push(format!("{} must be set and non-empty", field));
            PathBuf::new()
        }
    }
}

// Category and branch names become single path components, locally and remotely.
fn invalid_name_problem(field: &str, name: &str) -> Option<String> {
    if name.trim().is_empty() {
        Some(format!("{} must be non-empty", field))
    } else if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        Some(format!("{} '{}' must be a single directory name", field, name))
    } else {
        None
    }
}

/// Splits `host` or `host:port` into its parts, defaulting to the FTP control port.
pub fn split_address(address: &str) -> Result<(String, u16), String> {
    let address = address.trim();
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("remote_address '{}' has an invalid port", address))?;
            if host.is_empty() {
                return Err(format!("remote_address '{}' has no host", address));
            }
            Ok((host.to_string(), port))
        }
        None if address.is_empty() => Err("remote_address must be set and non-empty".to_string()),
        None => Ok((address.to_string(), DEFAULT_FTP_PORT)),
    }
}
