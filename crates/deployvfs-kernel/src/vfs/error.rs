//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Null, blank or malformed input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A mount is already active at the mount point.
    #[error("filesystem already mounted at {0}")]
    AlreadyMounted(String),

    /// Target directory cannot be written.
    #[error("not writable: {0}")]
    NotWritable(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Truncated or corrupt archive data.
    #[error("malformed archive: {0}")]
    ArchiveMalformed(String),

    /// The provider, stream or handle has been closed.
    #[error("closed: {0}")]
    ProviderClosed(String),

    /// A bounded retry loop gave up.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an AlreadyMounted error.
    pub fn already_mounted(path: impl Into<String>) -> Self {
        Self::AlreadyMounted(path.into())
    }

    /// Create a NotWritable error.
    pub fn not_writable(path: impl Into<String>) -> Self {
        Self::NotWritable(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an ArchiveMalformed error.
    pub fn archive_malformed(msg: impl Into<String>) -> Self {
        Self::ArchiveMalformed(msg.into())
    }

    /// Classify an I/O error raised while decompressing an archive entry.
    ///
    /// Bad checksums and short streams mean the archive is corrupt.
    pub fn entry_read(name: &str, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Self::ArchiveMalformed(format!("{}: {}", name, e))
            }
            _ => Self::Io(e),
        }
    }

    /// Create a ProviderClosed error.
    pub fn provider_closed(what: impl Into<String>) -> Self {
        Self::ProviderClosed(what.into())
    }

    /// Create a ResourceExhausted error.
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true for `NotFound`, including I/O errors of that kind.
    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound(_) => true,
            VfsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<zip::result::ZipError> for VfsError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(e) => VfsError::Io(e),
            zip::result::ZipError::FileNotFound => VfsError::not_found("archive entry"),
            other => VfsError::ArchiveMalformed(other.to_string()),
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::AlreadyMounted(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::NotWritable(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::ArchiveMalformed(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            VfsError::ProviderClosed(msg) => io::Error::other(format!("closed: {}", msg)),
            VfsError::ResourceExhausted(msg) => io::Error::other(msg),
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::PathEscapesRoot(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::Io(e) => e,
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
