//! Local filesystem backend.
//!
//! Exposes a real directory, with path security to prevent escaping the
//! root directory.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/deploy/app`, then `read("WEB-INF/web.xml")` reads
/// `/srv/deploy/app/WEB-INF/web.xml`.
///
/// Path security is enforced: attempts to escape via `..` or symlinks are
/// blocked.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    case_sensitive: bool,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            case_sensitive: false,
        }
    }

    /// Require lookups to match on-disk names exactly, even on filesystems
    /// that ignore case.
    pub fn case_sensitive(mut self, force: bool) -> Self {
        self.case_sensitive = force;
        self
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let path = path.strip_prefix("/").unwrap_or(path);
        if path.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(path);
        let canonical = if full.exists() {
            dunce::canonicalize(&full)?
        } else {
            // Reject lexical escapes even for paths that do not exist.
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(VfsError::path_escapes_root(path.display().to_string()));
            }
            return Err(VfsError::not_found(path.display().to_string()));
        };

        if !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }

        if self.case_sensitive {
            self.check_case(path)?;
        }
        Ok(canonical)
    }

    /// Verify every component of `path` exists with exactly this spelling.
    fn check_case(&self, path: &Path) -> VfsResult<()> {
        let mut dir = self.root.clone();
        for component in path.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let found = std::fs::read_dir(&dir)?
                .filter_map(Result::ok)
                .any(|entry| entry.file_name() == name);
            if !found {
                return Err(VfsError::not_found(path.display().to_string()));
            }
            dir.push(name);
        }
        Ok(())
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        };

        FileAttr {
            size: if meta.is_dir() { 0 } else { meta.len() },
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        }
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        if !fs::metadata(&full_path).await?.is_dir() {
            return Err(VfsError::not_a_directory(path.display().to_string()));
        }
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                FileType::Directory
            } else if file_type.is_symlink() {
                FileType::Symlink
            } else {
                FileType::File
            };

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await?;
        if meta.is_dir() {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }
        let mut file = fs::File::open(&full_path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity((size as u64).min(meta.len().saturating_sub(offset)) as usize);
        (&mut file).take(size as u64).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    fn force_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    async fn real_path(&self, path: &Path) -> VfsResult<Option<PathBuf>> {
        self.resolve(path).map(Some)
    }

    fn source(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}
