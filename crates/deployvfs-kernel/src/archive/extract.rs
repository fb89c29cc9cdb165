//! Archive extraction with nested-archive flattening.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Component, Path};

use filetime::FileTime;
use walkdir::WalkDir;
use zip::ZipArchive;

use super::NestedArchives;
use super::format::{clean_entry_name, from_zip_datetime, has_archive_signature, read_entry};
use crate::vfs::{VfsError, VfsResult};

/// Unpacks archives into real directories.
///
/// Entries whose names match the nested-archive set are not written as
/// files; they are unpacked into a directory of the same name, at any
/// depth. Extraction is synchronous. Independent targets may be extracted
/// concurrently; two extractions into one target may not.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    nested: NestedArchives,
}

impl ArchiveExtractor {
    pub fn new(nested: NestedArchives) -> Self {
        Self { nested }
    }

    /// The nested-archive set in use.
    pub fn nested(&self) -> &NestedArchives {
        &self.nested
    }

    /// Extract `source` into `target`.
    ///
    /// `source` is an archive file or a directory to copy. `target` is
    /// created if missing and must be a writable directory.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn extract(&self, source: &Path, target: &Path) -> VfsResult<()> {
        let meta = fs::metadata(source).map_err(|e| {
            VfsError::invalid_argument(format!("source {}: {}", source.display(), e))
        })?;
        prepare_target(target)?;

        if meta.is_dir() {
            self.extract_directory(source, target)
        } else {
            let file = File::open(source)?;
            self.extract_from(file, target)
        }
    }

    /// Extract an archive from any seekable reader into `target`.
    pub fn extract_from<R: Read + Seek>(&self, reader: R, target: &Path) -> VfsResult<()> {
        prepare_target(target)?;
        let mut archive = ZipArchive::new(reader)?;
        self.extract_archive(&mut archive, target)
    }

    fn extract_archive<R: Read + Seek>(&self, archive: &mut ZipArchive<R>, target: &Path) -> VfsResult<()> {
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let raw_name = entry.name().to_string();
            let Some(name) = clean_entry_name(&raw_name) else {
                tracing::warn!("skipping unsafe archive entry {:?}", raw_name);
                continue;
            };
            if name.is_empty() {
                continue;
            }

            let path = target.join(&name);
            if entry.is_dir() {
                fs::create_dir_all(&path)?;
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mtime = entry.last_modified().and_then(from_zip_datetime);

            if self.nested.matches(&name) {
                let declared = entry.size();
                let buffer = read_entry(&mut entry, &name, declared)?;
                drop(entry);
                self.extract_nested(buffer, &path, &name)?;
                continue;
            }

            let mut out = File::create(&path)?;
            io::copy(&mut entry, &mut out).map_err(|e| VfsError::entry_read(&name, e))?;
            drop(out);
            if let Some(mtime) = mtime {
                filetime::set_file_mtime(&path, FileTime::from_system_time(mtime))?;
            }
        }
        Ok(())
    }

    /// Unpack a buffered nested archive into a directory at `path`.
    ///
    /// Content without a ZIP signature is written as a plain file.
    fn extract_nested(&self, buffer: Vec<u8>, path: &Path, name: &str) -> VfsResult<()> {
        if !has_archive_signature(&buffer) {
            tracing::warn!("{} is not an archive; writing it as a file", name);
            fs::write(path, &buffer)?;
            return Ok(());
        }
        tracing::debug!("flattening nested archive {}", name);
        fs::create_dir_all(path)?;
        let mut nested = ZipArchive::new(Cursor::new(buffer))?;
        self.extract_archive(&mut nested, path)
    }

    fn extract_directory(&self, source: &Path, target: &Path) -> VfsResult<()> {
        for entry in WalkDir::new(source).min_depth(1).follow_links(true) {
            let entry = entry.map_err(io::Error::from)?;
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                tracing::warn!("skipping unsafe path {}", entry.path().display());
                continue;
            }

            let dest = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if self.nested.matches(&relative.to_string_lossy()) {
                if starts_like_archive(entry.path())? {
                    tracing::debug!("flattening nested archive {}", entry.path().display());
                    self.extract_from(File::open(entry.path())?, &dest)?;
                    continue;
                }
                tracing::warn!("{} is not an archive; copying it as a file", entry.path().display());
            }
            fs::copy(entry.path(), &dest)?;
            let mtime = FileTime::from_last_modification_time(&entry.metadata().map_err(io::Error::from)?);
            filetime::set_file_mtime(&dest, mtime)?;
        }
        Ok(())
    }
}

/// Check the leading bytes of a file for a ZIP signature.
fn starts_like_archive(path: &Path) -> io::Result<bool> {
    let mut head = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut head)?;
    Ok(has_archive_signature(&head))
}

/// Make sure `target` is a writable directory, creating it if missing.
///
/// Writability is tested by creating an unnamed file inside it, so ownership
/// and ACLs count, not just mode bits.
fn prepare_target(target: &Path) -> VfsResult<()> {
    match fs::metadata(target) {
        Ok(meta) if !meta.is_dir() => Err(VfsError::not_a_directory(target.display().to_string())),
        Ok(_) => match tempfile::tempfile_in(target) {
            Ok(_) => Ok(()),
            Err(e) => Err(VfsError::not_writable(format!("{}: {}", target.display(), e))),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(target)
            .map_err(|e| VfsError::not_writable(format!("{}: {}", target.display(), e))),
        Err(e) => Err(e.into()),
    }
}
