pub(crate) mod ftps; // FTP over explicit TLS session

use std::path::Path;

use crate::errors::TransferError;

pub use ftps::FtpsStore;

/// A remote file store that archives are delivered to, one session per run.
pub trait RemoteStore {
    /// Uploads `local_file` to `/<branch>/<category>/<file name>`, creating the
    /// directories first when they are missing. Existing remote files are overwritten.
    fn upload_file(&mut self, local_file: &Path, category: &str) -> Result<(), TransferError>;

    /// Ends the session. Calling it again after a successful close is a no-op.
    fn close(&mut self) -> Result<(), TransferError>;
}

/// Joins remote path components under the root, e.g. `/branch/daily/x.tar.gz`.
pub fn remote_path(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        path.push('/');
        path.push_str(part.trim_matches('/'));
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}
