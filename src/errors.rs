use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Every problem found while validating `config.json`, reported together.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON from config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: suppaftp::FtpError,
    },

    #[error("Failed to build TLS connector: {0}")]
    Tls(#[from] suppaftp::native_tls::Error),

    #[error("TLS handshake with {host} failed: {source}")]
    Secure {
        host: String,
        #[source]
        source: suppaftp::FtpError,
    },

    #[error("Login as {username} failed: {source}")]
    Login {
        username: String,
        #[source]
        source: suppaftp::FtpError,
    },
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to read local file {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote filesystem operation on {path} failed: {source}")]
    RemoteFilesystem {
        path: String,
        #[source]
        source: suppaftp::FtpError,
    },

    #[error("Upload to {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: suppaftp::FtpError,
    },

    #[error("No remote session is open")]
    NotConnected,
}

/// Failure of a single unit or category inside a run.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to compress {path}: {source}")]
    Compression {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl RotationError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RotationError::Filesystem { path: path.into(), source }
    }

    pub fn compression(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RotationError::Compression { path: path.into(), source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Relocate,
    Archive,
    Prune,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Relocate => "relocate",
            Stage::Archive => "archive",
            Stage::Prune => "prune",
        };
        f.write_str(name)
    }
}

/// A failure recorded during a run, tagged with where it happened.
#[derive(Debug)]
pub struct RunError {
    pub stage: Stage,
    pub category: String,
    pub unit: Option<String>,
    pub cause: RotationError,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.category)?;
        if let Some(unit) = &self.unit {
            write!(f, "/{}", unit)?;
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
