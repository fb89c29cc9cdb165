//! # deployvfs-kernel
//!
//! A mountable virtual namespace for deployment content.
//!
//! - [`vfs`] owns the namespace: paths, the mount table, providers and the
//!   [`Vfs`] facade.
//! - [`temp`] manages the process temp root, per-consumer temp providers and
//!   background deletion.
//! - [`archive`] extracts archives (flattening nested ones), walks virtual
//!   directories as archive entries and frames them as ZIP bytes.
//! - [`config`] loads [`VfsConfig`] from TOML.

pub mod archive;
pub mod config;
pub mod temp;
pub mod vfs;

#[cfg(test)]
mod testutil;

pub use archive::{ArchiveByteStream, ArchiveExtractor, NestedArchives, VirtualArchiveStream};
pub use config::VfsConfig;
pub use temp::{TempDir, TempFileProvider, TempRoot};
pub use vfs::{
    MountHandle, MountTable, Vfs, VfsError, VfsOps, VfsResult, VirtualPath,
    backends::{LocalBackend, MemoryBackend, ZipBackend},
};
