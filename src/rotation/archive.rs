// backup-rotator/src/rotation/archive.rs
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// `<parent>/<unit>` becomes `<parent>/<unit>.tar.gz`.
pub fn archive_path_for(unit_path: &Path) -> PathBuf {
    let mut name = unit_path.file_name().unwrap_or_default().to_os_string();
    name.push(ARCHIVE_SUFFIX);
    unit_path.with_file_name(name)
}

pub fn is_archive_name(name: &str) -> bool {
    name.len() > ARCHIVE_SUFFIX.len() && name.ends_with(ARCHIVE_SUFFIX)
}

/// Creates a GZipped TAR archive from a backup unit.
///
/// Entries are rooted at the unit's own name, so unpacking the archive next to it
/// recreates `<unit>/...` exactly. Directory contents are added in file-name order and
/// symlinks are stored as links.
///
/// # Arguments
/// * `source` - The unit directory (or single file) to archive.
/// * `archive_dest_path` - The full path where the `.tar.gz` archive will be created.
///
/// # Returns
/// Size of the finished archive in bytes.
pub fn create_tar_gz_archive(source: &Path, archive_dest_path: &Path) -> io::Result<u64> {
    let root_name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Source for archival has no file name: {}", source.display()),
        )
    })?;
    let source_metadata = fs::symlink_metadata(source)?;

    let archive_file = File::create(archive_dest_path)?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);
    tar_builder.follow_symlinks(false);

    if source_metadata.is_dir() {
        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry?;
            let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
            let name = if relative.as_os_str().is_empty() {
                PathBuf::from(root_name)
            } else {
                Path::new(root_name).join(relative)
            };

            if entry.file_type().is_dir() {
                tar_builder.append_dir(&name, entry.path())?;
            } else {
                tar_builder.append_path_with_name(entry.path(), &name)?;
            }
        }
    } else {
        tar_builder.append_path_with_name(source, root_name)?;
    }

    let encoder = tar_builder.into_inner()?;
    let archive_file = encoder.finish()?;
    archive_file.sync_all()?;
    Ok(archive_file.metadata()?.len())
}
