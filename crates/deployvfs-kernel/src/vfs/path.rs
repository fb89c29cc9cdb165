//! Path canonicalization and namespace locations.
//!
//! [`canonicalize`] is a pure string normalizer: it removes `.` segments,
//! cancels `..` against the preceding normal segment and collapses repeated
//! separators. A `..` with nothing left to cancel is kept as written.
//!
//! [`VirtualPath`] is a location in the mounted namespace. It is always
//! absolute and canonical, so two values naming the same location compare
//! equal regardless of how they were spelled.

use std::fmt;
use std::sync::Arc;

use super::error::{VfsError, VfsResult};

/// Classifier for the segment currently being scanned (right to left).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Normal,
    Dot,
    DotDot,
}

/// Canonicalize a `/`-separated path, dropping any trailing slash.
///
/// ```
/// use deployvfs_kernel::vfs::canonicalize;
///
/// assert_eq!(canonicalize("/a/b/../c"), "/a/c");
/// assert_eq!(canonicalize("/../a"), "/../a");
/// ```
pub fn canonicalize(path: &str) -> String {
    canonicalize_path(path, false)
}

/// Canonicalize a `/`-separated path.
///
/// When `directory` is set and the input ends with `/`, the result keeps a
/// trailing `/`. Runs in a single backward pass: accepted segments are
/// copied into the right end of the output buffer, and every `..` seen
/// bumps the count of preceding normal segments to drop.
pub fn canonicalize_path(path: &str, directory: bool) -> String {
    let src = path.as_bytes();
    let len = src.len();
    if len == 0 {
        return String::new();
    }

    // Output never outgrows the input: every byte written maps to a distinct
    // input byte (kept segments and the separators preceding them).
    let mut out = vec![0u8; len];
    let mut at = len;
    let mut skip = 0usize;

    let mut end = len;
    let mut tail = Tail::Normal;
    let mut i = len;
    while i > 0 {
        i -= 1;
        let c = src[i];
        if c == b'/' {
            accept(&src[i + 1..end], tail, &mut skip, &mut out, &mut at);
            end = i;
            continue;
        }
        tail = if i + 1 == end {
            if c == b'.' { Tail::Dot } else { Tail::Normal }
        } else {
            match (tail, c) {
                (Tail::Dot, b'.') => Tail::DotDot,
                _ => Tail::Normal,
            }
        };
    }
    accept(&src[..end], tail, &mut skip, &mut out, &mut at);

    // Unresolvable ascent stays in front of whatever survived.
    for _ in 0..skip {
        emit(b"..", &mut out, &mut at);
    }
    if src[0] == b'/' {
        at -= 1;
        out[at] = b'/';
    }

    // Segments are split on ASCII '/', so UTF-8 boundaries are intact.
    let mut result = String::from_utf8_lossy(&out[at..]).into_owned();
    if directory && src[len - 1] == b'/' && !result.is_empty() && !result.ends_with('/') {
        result.push('/');
    }
    result
}

fn accept(segment: &[u8], tail: Tail, skip: &mut usize, out: &mut [u8], at: &mut usize) {
    if segment.is_empty() {
        return;
    }
    match tail {
        Tail::Dot => {}
        Tail::DotDot => *skip += 1,
        Tail::Normal => {
            if *skip > 0 {
                *skip -= 1;
            } else {
                emit(segment, out, at);
            }
        }
    }
}

fn emit(segment: &[u8], out: &mut [u8], at: &mut usize) {
    if *at < out.len() {
        *at -= 1;
        out[*at] = b'/';
    }
    *at -= segment.len();
    out[*at..*at + segment.len()].copy_from_slice(segment);
}

/// An absolute, canonical location in the virtual namespace.
///
/// Cheap to clone. Equality and hashing use the canonical string, so
/// `/a/./b` and `/a/b` are the same node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath {
    path: Arc<str>,
}

impl VirtualPath {
    /// The namespace root `/`.
    pub fn root() -> Self {
        Self { path: Arc::from("/") }
    }

    /// Parse a path. Relative paths are taken relative to the root.
    ///
    /// Fails with `InvalidArgument` if the path ascends above the root.
    pub fn new(path: &str) -> VfsResult<Self> {
        let canonical = if path.starts_with('/') {
            canonicalize(path)
        } else {
            canonicalize(&format!("/{}", path))
        };
        if canonical == "/.." || canonical.starts_with("/../") {
            return Err(VfsError::invalid_argument(format!(
                "path ascends above the root: {}",
                path
            )));
        }
        if canonical.is_empty() || canonical == "/" {
            return Ok(Self::root());
        }
        Ok(Self {
            path: Arc::from(canonical),
        })
    }

    /// Canonical string form, always starting with `/`.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Whether this is the namespace root.
    pub fn is_root(&self) -> bool {
        &*self.path == "/"
    }

    /// Last segment, or the empty string for the root.
    pub fn name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => "",
        }
    }

    /// Enclosing location, or `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        match self.path.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self {
                path: Arc::from(&self.path[..idx]),
            }),
            None => None,
        }
    }

    /// Resolve `child` (which may contain `.`/`..`) below this location.
    pub fn join(&self, child: &str) -> VfsResult<VirtualPath> {
        if self.is_root() {
            Self::new(child)
        } else {
            Self::new(&format!("{}/{}", self.path, child))
        }
    }

    /// Path of `self` relative to `ancestor` (empty when equal), or `None`
    /// if `ancestor` does not contain `self`.
    pub fn relative_to(&self, ancestor: &VirtualPath) -> Option<&str> {
        if ancestor.is_root() {
            return Some(&self.path[1..]);
        }
        let rest = self.path.strip_prefix(ancestor.as_str())?;
        if rest.is_empty() {
            Some("")
        } else {
            rest.strip_prefix('/')
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Debug for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPath({})", self.path)
    }
}
