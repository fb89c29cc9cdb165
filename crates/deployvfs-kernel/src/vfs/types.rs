//! Core VFS types.
//!
//! Providers describe their contents with these types; the mount table and
//! the archive view pass them through unchanged.

use std::time::SystemTime;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o644).
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
}

impl FileAttr {
    /// Attributes for a file of `size` bytes modified now.
    pub fn file(size: u64, perm: u32) -> Self {
        Self {
            size,
            kind: FileType::File,
            perm,
            mtime: SystemTime::now(),
        }
    }

    /// Attributes for a directory modified now.
    pub fn directory(perm: u32) -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            perm,
            mtime: SystemTime::now(),
        }
    }

    /// Replace the modification time.
    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = mtime;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}
