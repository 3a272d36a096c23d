// backup-rotator/src/storage/ftps.rs
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream};

use super::{RemoteStore, remote_path};
use crate::config::RemoteConfig;
use crate::errors::{ConnectionError, TransferError};

/// The FTP commands an upload needs: NLST, MKD and STOR.
pub(crate) trait FtpSession {
    /// Bare names of the entries in `directory`.
    fn list_names(&mut self, directory: &str) -> Result<Vec<String>, FtpError>;
    fn make_directory(&mut self, path: &str) -> Result<(), FtpError>;
    /// Stores `reader` at `path`, replacing any existing file. Returns bytes written.
    fn store_file(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64, FtpError>;
}

impl FtpSession for NativeTlsFtpStream {
    fn list_names(&mut self, directory: &str) -> Result<Vec<String>, FtpError> {
        let entries = self.nlst(Some(directory))?;
        Ok(entries.iter().map(|entry| entry_name(entry).to_string()).collect())
    }

    fn make_directory(&mut self, path: &str) -> Result<(), FtpError> {
        self.mkdir(path)
    }

    fn store_file(&mut self, path: &str, mut reader: &mut dyn Read) -> Result<u64, FtpError> {
        self.put_file(path, &mut reader)
    }
}

/// One FTPS session bound to a branch directory at the server root.
pub struct FtpsStore {
    stream: Option<NativeTlsFtpStream>,
    branch: String,
}

impl FtpsStore {
    /// Opens the control connection, upgrades it with `AUTH TLS`, logs in and switches
    /// to binary transfers.
    pub fn connect(remote: &RemoteConfig, branch: &str) -> Result<Self, ConnectionError> {
        tracing::info!(address = %remote.address(), branch, "connecting to remote storage");

        let plain = NativeTlsFtpStream::connect((remote.host.as_str(), remote.port)).map_err(
            |source| ConnectionError::Connect {
                address: remote.address(),
                source,
            },
        )?;

        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(remote.accept_invalid_certs)
            .build()?;
        let mut stream = plain
            .into_secure(NativeTlsConnector::from(connector), &remote.host)
            .map_err(|source| ConnectionError::Secure {
                host: remote.host.clone(),
                source,
            })?;

        stream
            .login(remote.username.as_str(), remote.password.as_str())
            .map_err(|source| ConnectionError::Login {
                username: remote.username.clone(),
                source,
            })?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|source| ConnectionError::Connect {
                address: remote.address(),
                source,
            })?;

        tracing::info!(address = %remote.address(), "✓ remote session established");
        Ok(FtpsStore {
            stream: Some(stream),
            branch: branch.to_string(),
        })
    }
}

impl RemoteStore for FtpsStore {
    fn upload_file(&mut self, local_file: &Path, category: &str) -> Result<(), TransferError> {
        let FtpsStore { stream, branch } = self;
        let stream = stream.as_mut().ok_or(TransferError::NotConnected)?;
        upload_to_branch(stream, branch, local_file, category)
    }

    fn close(&mut self) -> Result<(), TransferError> {
        match self.stream.take() {
            Some(mut stream) => stream.quit().map_err(|source| TransferError::RemoteFilesystem {
                path: "/".to_string(),
                source,
            }),
            None => Ok(()),
        }
    }
}

impl Drop for FtpsStore {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.quit() {
                tracing::warn!(error = %e, "failed to close remote session");
            }
        }
    }
}

/// Uploads `local_file` to `/<branch>/<category>/<file name>`, creating the branch and
/// category directories when they are missing.
pub(crate) fn upload_to_branch(
    session: &mut dyn FtpSession,
    branch: &str,
    local_file: &Path,
    category: &str,
) -> Result<(), TransferError> {
    let file_name = local_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| TransferError::LocalFile {
            path: local_file.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        })?;

    ensure_directory(session, "/", branch)?;
    ensure_directory(session, &remote_path(&[branch]), category)?;

    let target = remote_path(&[branch, category, file_name.as_str()]);
    let file = File::open(local_file).map_err(|source| TransferError::LocalFile {
        path: local_file.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    tracing::info!(file = %local_file.display(), remote = %target, "uploading archive");
    let bytes = session
        .store_file(&target, &mut reader)
        .map_err(|source| TransferError::Upload {
            path: target.clone(),
            source,
        })?;
    tracing::info!(remote = %target, bytes, "✓ upload finished");
    Ok(())
}

fn directory_exists(session: &mut dyn FtpSession, parent: &str, name: &str) -> bool {
    match session.list_names(parent) {
        Ok(names) => names.iter().any(|n| n == name),
        Err(e) => {
            // Some servers answer NLST on an empty or missing directory with an error.
            tracing::debug!(directory = parent, error = %e, "listing failed, assuming absent");
            false
        }
    }
}

/// Creates `<parent>/<name>` unless it is already there. A failed MKD is accepted
/// when the directory shows up afterwards (created concurrently by another client).
fn ensure_directory(
    session: &mut dyn FtpSession,
    parent: &str,
    name: &str,
) -> Result<(), TransferError> {
    if directory_exists(session, parent, name) {
        return Ok(());
    }
    let path = if parent == "/" {
        remote_path(&[name])
    } else {
        format!("{}/{}", parent, name)
    };
    tracing::debug!(path = %path, "creating remote directory");
    match session.make_directory(&path) {
        Ok(()) => Ok(()),
        Err(_) if directory_exists(session, parent, name) => Ok(()),
        Err(source) => Err(TransferError::RemoteFilesystem { path, source }),
    }
}

/// NLST may answer with bare names or with paths; keep the last component.
fn entry_name(entry: &str) -> &str {
    let trimmed = entry.trim().trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet, HashSet};
    use std::io;

    /// In-memory FTP server that records every command it receives.
    #[derive(Default)]
    struct FakeSession {
        directories: BTreeSet<String>,
        files: BTreeMap<String, Vec<u8>>,
        commands: Vec<String>,
        /// MKD fails, but the directory appears anyway (another client won the race).
        created_elsewhere: HashSet<String>,
        /// MKD fails and nothing is created.
        refused: HashSet<String>,
    }

    impl FakeSession {
        fn with_directories(directories: &[&str]) -> Self {
            FakeSession {
                directories: directories.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            }
        }

        fn rejected(message: &str) -> FtpError {
            FtpError::ConnectionError(io::Error::other(message.to_string()))
        }
    }

    fn split_parent(path: &str) -> (&str, &str) {
        match path.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((parent, name)) => (parent, name),
            None => ("/", path),
        }
    }

    impl FtpSession for FakeSession {
        fn list_names(&mut self, directory: &str) -> Result<Vec<String>, FtpError> {
            self.commands.push(format!("NLST {}", directory));
            if directory != "/" && !self.directories.contains(directory) {
                return Err(Self::rejected("550 no such directory"));
            }
            Ok(self
                .directories
                .iter()
                .chain(self.files.keys())
                .map(|path| split_parent(path))
                .filter(|(parent, _)| *parent == directory)
                .map(|(_, name)| name.to_string())
                .collect())
        }

        fn make_directory(&mut self, path: &str) -> Result<(), FtpError> {
            self.commands.push(format!("MKD {}", path));
            if self.created_elsewhere.contains(path) {
                self.directories.insert(path.to_string());
                return Err(Self::rejected("550 file exists"));
            }
            if self.refused.contains(path) || self.directories.contains(path) {
                return Err(Self::rejected("550 permission denied"));
            }
            self.directories.insert(path.to_string());
            Ok(())
        }

        fn store_file(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64, FtpError> {
            self.commands.push(format!("STOR {}", path));
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).map_err(FtpError::ConnectionError)?;
            let len = bytes.len() as u64;
            self.files.insert(path.to_string(), bytes);
            Ok(len)
        }
    }

    fn archive(dir: &Path) -> anyhow::Result<std::path::PathBuf> {
        let path = dir.join("2024-01-01.tar.gz");
        std::fs::write(&path, b"archive bytes")?;
        Ok(path)
    }

    #[test]
    fn test_entry_name_strips_directories() {
        assert_eq!(entry_name("daily"), "daily");
        assert_eq!(entry_name("/prague/daily"), "daily");
        assert_eq!(entry_name("prague/daily/\r\n"), "daily");
        assert_eq!(entry_name("  weekly  "), "weekly");
    }

    #[test]
    fn test_missing_branch_is_created_before_category() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let local = archive(dir.path())?;
        let mut session = FakeSession::default();

        upload_to_branch(&mut session, "prague", &local, "daily")?;

        assert_eq!(
            session.commands,
            vec![
                "NLST /",
                "MKD /prague",
                "NLST /prague",
                "MKD /prague/daily",
                "STOR /prague/daily/2024-01-01.tar.gz",
            ]
        );
        assert_eq!(
            session.files.get("/prague/daily/2024-01-01.tar.gz").map(Vec::as_slice),
            Some(&b"archive bytes"[..])
        );
        Ok(())
    }

    #[test]
    fn test_missing_category_is_created_under_existing_branch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let local = archive(dir.path())?;
        let mut session = FakeSession::with_directories(&["/prague", "/prague/weekly"]);

        upload_to_branch(&mut session, "prague", &local, "daily")?;

        assert_eq!(
            session.commands,
            vec![
                "NLST /",
                "NLST /prague",
                "MKD /prague/daily",
                "STOR /prague/daily/2024-01-01.tar.gz",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_existing_directories_go_straight_to_upload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let local = archive(dir.path())?;
        let mut session = FakeSession::with_directories(&["/prague", "/prague/daily"]);
        session
            .files
            .insert("/prague/daily/2024-01-01.tar.gz".to_string(), b"stale".to_vec());

        upload_to_branch(&mut session, "prague", &local, "daily")?;

        assert_eq!(
            session.commands,
            vec!["NLST /", "NLST /prague", "STOR /prague/daily/2024-01-01.tar.gz"]
        );
        assert_eq!(
            session.files.get("/prague/daily/2024-01-01.tar.gz").map(Vec::as_slice),
            Some(&b"archive bytes"[..])
        );
        Ok(())
    }

    #[test]
    fn test_mkdir_lost_to_another_client_is_accepted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let local = archive(dir.path())?;
        let mut session = FakeSession::default();
        session.created_elsewhere.insert("/prague".to_string());

        upload_to_branch(&mut session, "prague", &local, "daily")?;

        assert_eq!(
            session.commands,
            vec![
                "NLST /",
                "MKD /prague",
                "NLST /",
                "NLST /prague",
                "MKD /prague/daily",
                "STOR /prague/daily/2024-01-01.tar.gz",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_refused_mkdir_fails_the_upload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let local = archive(dir.path())?;
        let mut session = FakeSession::with_directories(&["/prague"]);
        session.refused.insert("/prague/daily".to_string());

        let err = upload_to_branch(&mut session, "prague", &local, "daily").unwrap_err();

        match err {
            TransferError::RemoteFilesystem { path, .. } => assert_eq!(path, "/prague/daily"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(session.files.is_empty());
        assert!(!session.commands.iter().any(|c| c.starts_with("STOR")));
        Ok(())
    }
}
