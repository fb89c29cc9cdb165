//! Backing-provider trait.
//!
//! Every mount binds a namespace location to one `VfsOps` implementation.
//! The contract is read-oriented: resolve a path to metadata, enumerate
//! children, read bytes, and report matching rules. Writes go through the
//! provider's own API (or its real directory) rather than the namespace.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::VfsResult;
use super::types::{DirEntry, FileAttr};

/// Read chunk used by [`VfsOps::read_all`].
const READ_CHUNK: u32 = 64 * 1024;
/// Upper bound on the buffer reserved from a reported file size.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// Core provider trait.
///
/// Paths are always relative to the provider's root, using `/` separators;
/// the empty path is the root itself. The mount table handles routing and
/// path translation.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached, and an empty buffer at or
    /// beyond EOF.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Whether lookups must match the exact case of on-disk names.
    fn force_case_sensitive(&self) -> bool {
        false
    }

    /// Physical path backing `path`, if the provider has one.
    async fn real_path(&self, _path: &Path) -> VfsResult<Option<PathBuf>> {
        Ok(None)
    }

    /// Physical source of the whole provider (archive file or directory).
    fn source(&self) -> Option<PathBuf> {
        None
    }

    /// Release provider resources. Called once when its mount closes.
    fn close(&self) -> VfsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        if attr.is_dir() {
            return Err(super::VfsError::is_a_directory(path.display().to_string()));
        }
        let mut data = Vec::with_capacity(attr.size.min(PREALLOC_LIMIT) as usize);
        loop {
            let chunk = self.read(path, data.len() as u64, READ_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}
