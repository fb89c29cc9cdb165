//! Archive mounting support.
//!
//! - [`ArchiveExtractor`] unpacks archives (or copies directories) into a
//!   real directory, flattening nested archives into subdirectories.
//! - [`VirtualArchiveStream`] walks a virtual directory as a sequence of
//!   [`ArchiveEntry`] values.
//! - [`ArchiveByteStream`] frames that sequence as ZIP bytes.
//! - [`manifest`] parses `META-INF/MANIFEST.MF`.

mod entry;
mod extract;
pub mod format;
pub mod manifest;
mod stream;

pub use entry::ArchiveEntry;
pub use extract::ArchiveExtractor;
pub use manifest::{MANIFEST_PATH, Manifest, read_manifest};
pub use stream::{ArchiveByteStream, StreamState, VirtualArchiveStream};

use std::collections::BTreeSet;

/// File extensions treated as nested archives during extraction.
///
/// Matching is case-insensitive on the last path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedArchives {
    extensions: BTreeSet<String>,
}

impl Default for NestedArchives {
    /// Web, service and resource-adapter archives.
    fn default() -> Self {
        Self::new(["war", "sar", "rar"])
    }
}

impl NestedArchives {
    /// Build a set from extensions, with or without the leading dot.
    pub fn new<'a>(extensions: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Flatten nothing.
    pub fn none() -> Self {
        Self {
            extensions: BTreeSet::new(),
        }
    }

    /// Default set plus OSGi web bundles (`.wab`).
    pub fn osgi() -> Self {
        Self::default().with("wab")
    }

    /// Every archive kind, including plain `.jar` libraries.
    pub fn all() -> Self {
        Self::osgi().with("jar")
    }

    /// Add one extension.
    pub fn with(mut self, extension: &str) -> Self {
        let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() {
            self.extensions.insert(ext);
        }
        self
    }

    /// Extensions in the set, sorted, without dots.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    /// Whether `name` (a path or file name) has a nested-archive extension.
    pub fn matches(&self, name: &str) -> bool {
        let file_name = name.trim_end_matches('/').rsplit('/').next().unwrap_or(name);
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                self.extensions.contains(&ext.to_ascii_lowercase())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_defaults() {
        let nested = NestedArchives::default();
        assert!(nested.matches("inner.war"));
        assert!(nested.matches("lib/ADAPTER.RAR"));
        assert!(nested.matches("deploy/x.sar"));
        assert!(!nested.matches("lib/util.jar"));
        assert!(!nested.matches("bundle.wab"));
        assert!(!nested.matches(".war"));
        assert!(!nested.matches("war"));
    }

    #[test]
    fn test_nested_modes() {
        assert!(NestedArchives::osgi().matches("bundle.wab"));
        assert!(!NestedArchives::osgi().matches("util.jar"));
        assert!(NestedArchives::all().matches("util.jar"));
        assert!(!NestedArchives::none().matches("inner.war"));
        assert!(NestedArchives::new([".EAR"]).matches("app.ear"));
        let all = NestedArchives::all();
        let exts: Vec<&str> = all.extensions().collect();
        assert_eq!(exts, vec!["jar", "rar", "sar", "wab", "war"]);
    }
}
