//! Virtual filesystem namespace.
//!
//! Key components:
//!
//! - [`VfsOps`] - Contract every backing provider implements
//! - [`MountTable`] - Copy-on-write table binding namespace paths to providers
//! - [`Vfs`] - Facade combining the table, temp storage and archive mounting
//! - [`canonicalize`] - Lexical `.`/`..` resolution for `/`-separated paths
//! - [`LeakRegistry`] - Debug tracking of handles that were never closed
//!
//! ## Design Decisions
//!
//! - **Path-based**: Providers see paths relative to their own root.
//! - **Nearest mount wins**: A path is served by the mount at the path itself
//!   or at its closest mounted ancestor, falling back to the root.
//! - **Lock-free readers**: Lookups read immutable row snapshots; writers
//!   swap whole rows and retry on conflict.

pub mod backends;
mod error;
mod facade;
mod leak;
mod mount;
mod ops;
mod path;
mod types;

pub use backends::{LocalBackend, MemoryBackend, ZipBackend};
pub use error::{VfsError, VfsResult};
pub use facade::Vfs;
pub use leak::{LeakRegistry, LeakToken, OpenHandle};
pub use mount::{Mount, MountHandle, MountInfo, MountTable};
pub use ops::VfsOps;
pub use path::{VirtualPath, canonicalize, canonicalize_path};
pub use types::{DirEntry, FileAttr, FileType};
