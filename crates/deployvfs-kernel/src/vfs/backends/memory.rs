//! In-memory filesystem backend.
//!
//! Backs the implicit root of the namespace and serves as a scratch
//! provider in tests. All data is ephemeral.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }

    fn kind(&self) -> FileType {
        match self {
            Entry::File { .. } => FileType::File,
            Entry::Directory { .. } => FileType::Directory,
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. Content is populated with
/// [`insert_file`](MemoryBackend::insert_file) and
/// [`insert_dir`](MemoryBackend::insert_dir); the `VfsOps` surface is
/// read-only.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<PathBuf, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            PathBuf::new(),
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        result
    }

    /// Add or replace a file, creating missing parent directories.
    pub fn insert_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> VfsResult<()> {
        self.insert_file_with_mtime(path, data, SystemTime::now())
    }

    /// Add or replace a file with an explicit modification time.
    pub fn insert_file_with_mtime(
        &self,
        path: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        mtime: SystemTime,
    ) -> VfsResult<()> {
        let normalized = Self::normalize(path.as_ref());
        if normalized.as_os_str().is_empty() {
            return Err(VfsError::is_a_directory("/"));
        }
        let data = data.into();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        Self::ensure_parents(&mut entries, &normalized)?;
        if let Some(Entry::Directory { .. }) = entries.get(&normalized) {
            return Err(VfsError::is_a_directory(normalized.display().to_string()));
        }
        let attr = FileAttr::file(data.len() as u64, 0o644).with_mtime(mtime);
        entries.insert(normalized, Entry::File { data, attr });
        Ok(())
    }

    /// Add a directory (and its parents). Existing directories are kept.
    pub fn insert_dir(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        let normalized = Self::normalize(path.as_ref());
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        Self::ensure_parents(&mut entries, &normalized)?;
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(VfsError::not_a_directory(normalized.display().to_string())),
            None => {
                entries.insert(
                    normalized,
                    Entry::Directory {
                        attr: FileAttr::directory(0o755),
                    },
                );
                Ok(())
            }
        }
    }

    /// Ensure all parent directories exist.
    fn ensure_parents(entries: &mut HashMap<PathBuf, Entry>, path: &Path) -> VfsResult<()> {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                let entry = entries.entry(current.clone()).or_insert(Entry::Directory {
                    attr: FileAttr::directory(0o755),
                });
                if let Entry::File { .. } = entry {
                    return Err(VfsError::not_a_directory(current.display().to_string()));
                }
            }
        }
        Ok(())
    }

    /// Get the path string for error messages.
    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        entries
            .get(&normalized)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(Self::path_str(&normalized)))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let normalized = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(Self::path_str(&normalized))),
            None => return Err(VfsError::not_found(Self::path_str(&normalized))),
        }

        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(entry_path, _)| {
                entry_path.parent() == Some(normalized.as_path()) && **entry_path != normalized
            })
            .filter_map(|(entry_path, entry)| {
                entry_path
                    .file_name()
                    .map(|name| DirEntry::new(name.to_string_lossy(), entry.kind()))
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let normalized = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => {
                Err(VfsError::is_a_directory(Self::path_str(&normalized)))
            }
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }
}
