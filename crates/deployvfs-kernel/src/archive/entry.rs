//! Archive entries backed by a provider.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::vfs::{VfsError, VfsOps, VfsResult};

const CHUNK: u32 = 64 * 1024;

/// One entry of an archive view: a name plus a way to read the content.
#[derive(Clone)]
pub struct ArchiveEntry {
    name: String,
    is_directory: bool,
    size: u64,
    modified: SystemTime,
    provider: Arc<dyn VfsOps>,
    path: PathBuf,
}

impl fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("is_directory", &self.is_directory)
            .field("size", &self.size)
            .finish()
    }
}

impl ArchiveEntry {
    pub(crate) fn new(
        name: String,
        is_directory: bool,
        size: u64,
        modified: SystemTime,
        provider: Arc<dyn VfsOps>,
        path: PathBuf,
    ) -> Self {
        Self {
            name,
            is_directory,
            size,
            modified,
            provider,
            path,
        }
    }

    /// Posix-style path inside the archive, without a trailing `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Size reported by the provider when the entry was listed.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Provider path the content is read from.
    pub fn source_path(&self) -> &Path {
        &self.path
    }

    /// Read up to `size` bytes at `offset`.
    pub async fn read_at(&self, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        if self.is_directory {
            return Err(VfsError::is_a_directory(self.name.clone()));
        }
        self.provider.read(&self.path, offset, size).await
    }

    /// Whole content.
    pub async fn read_all(&self) -> VfsResult<Vec<u8>> {
        if self.is_directory {
            return Err(VfsError::is_a_directory(self.name.clone()));
        }
        self.provider.read_all(&self.path).await
    }

    /// CRC-32 and length of the current content, read in chunks.
    pub async fn checksum(&self) -> VfsResult<(u32, u64)> {
        if self.is_directory {
            return Ok((0, 0));
        }
        let mut hasher = crc32fast::Hasher::new();
        let mut length = 0u64;
        loop {
            let chunk = self.provider.read(&self.path, length, CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            hasher.update(&chunk);
            length += chunk.len() as u64;
        }
        Ok((hasher.finalize(), length))
    }
}
