//! Mount table.
//!
//! Binds namespace locations to providers. The table is keyed by parent
//! location; each row is an immutable `name -> Mount` map that is replaced
//! wholesale on every change. Writers read a row, build the new row and
//! swap it in only if the row is still the one they read, retrying
//! otherwise. Readers take a snapshot of a row and never retry.
//!
//! The root `/` is always mounted and can neither be mounted over nor
//! closed.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::leak::{LeakRegistry, LeakToken};
use super::ops::VfsOps;
use super::path::VirtualPath;
use super::{VfsError, VfsResult};
use crate::temp::TempDir;

type Row = Arc<HashMap<String, Arc<Mount>>>;

struct Table {
    rows: DashMap<VirtualPath, Row>,
    root: Arc<Mount>,
    leaks: Arc<LeakRegistry>,
}

impl Table {
    fn row(&self, parent: &VirtualPath) -> Option<Row> {
        self.rows.get(parent).map(|r| Arc::clone(r.value()))
    }

    /// Replace the row at `parent` if it is still `expected`.
    ///
    /// `None` stands for "no row". Returns false on conflict.
    fn swap_row(&self, parent: &VirtualPath, expected: Option<&Row>, new: Option<Row>) -> bool {
        match self.rows.entry(parent.clone()) {
            Entry::Occupied(mut occupied) => {
                let Some(expected) = expected else {
                    return false;
                };
                if !Arc::ptr_eq(occupied.get(), expected) {
                    return false;
                }
                match new {
                    Some(row) => {
                        occupied.insert(row);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                true
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return false;
                }
                if let Some(row) = new {
                    vacant.insert(row);
                }
                true
            }
        }
    }
}

/// An active binding of a provider to a mount point.
pub struct Mount {
    provider: Arc<dyn VfsOps>,
    point: VirtualPath,
    closed: AtomicBool,
    table: Weak<Table>,
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("point", &self.point)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Mount {
    /// The backing provider.
    pub fn provider(&self) -> &Arc<dyn VfsOps> {
        &self.provider
    }

    /// Where this mount is attached.
    pub fn point(&self) -> &VirtualPath {
        &self.point
    }

    /// Whether [`close`](Mount::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Path of `path` relative to this mount's root, or `None` if `path` is
    /// not under this mount point.
    pub fn relative<'a>(&self, path: &'a VirtualPath) -> Option<&'a str> {
        path.relative_to(&self.point)
    }

    /// Detach from the table.
    ///
    /// Returns true if this call performed the unmount. Idempotent. If the
    /// table no longer holds this exact mount at its point (it was removed
    /// and replaced), nothing is touched. The root mount never closes.
    pub fn close(&self) -> bool {
        let Some(parent) = self.point.parent() else {
            return false;
        };
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(table) = self.table.upgrade() else {
            return true;
        };
        let name = self.point.name();
        loop {
            let Some(current) = table.row(&parent) else {
                return true;
            };
            match current.get(name) {
                Some(mounted) if std::ptr::eq(Arc::as_ptr(mounted), self) => {}
                _ => return true,
            }

            let new = match current.len() {
                1 => None,
                2 => current
                    .iter()
                    .find(|(n, _)| n.as_str() != name)
                    .map(|(n, m)| Arc::new(HashMap::from([(n.clone(), Arc::clone(m))]))),
                _ => {
                    let mut row = (*current).clone();
                    row.remove(name);
                    Some(Arc::new(row))
                }
            };

            if table.swap_row(&parent, Some(&current), new) {
                tracing::trace!("unmounted {}", self.point);
                return true;
            }
            tracing::trace!("unmount of {} raced, retrying", self.point);
        }
    }
}

/// Description of an active mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Mount point.
    pub point: VirtualPath,
    /// Physical source reported by the provider.
    pub source: Option<PathBuf>,
}

/// Concurrent mount table. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MountTable {
    table: Arc<Table>,
}

impl fmt::Debug for MountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.list_mounts())
            .finish()
    }
}

impl MountTable {
    /// Create a table whose implicit root mount is `root_provider`.
    pub fn new(root_provider: Arc<dyn VfsOps>) -> Self {
        Self::with_leak_registry(root_provider, Arc::new(LeakRegistry::default()))
    }

    /// Create a table reporting unclosed handles to `leaks`.
    pub fn with_leak_registry(root_provider: Arc<dyn VfsOps>, leaks: Arc<LeakRegistry>) -> Self {
        let table = Arc::new_cyclic(|weak: &Weak<Table>| Table {
            rows: DashMap::new(),
            root: Arc::new(Mount {
                provider: root_provider,
                point: VirtualPath::root(),
                closed: AtomicBool::new(false),
                table: weak.clone(),
            }),
            leaks,
        });
        Self { table }
    }

    /// The open-handle registry.
    pub fn leaks(&self) -> &Arc<LeakRegistry> {
        &self.table.leaks
    }

    /// The implicit root mount.
    pub fn root_mount(&self) -> &Arc<Mount> {
        &self.table.root
    }

    /// Attach `provider` at `point`.
    ///
    /// Fails with `InvalidArgument` for the root and `AlreadyMounted` if an
    /// active mount occupies `point`.
    #[tracing::instrument(level = "debug", skip(self, provider))]
    pub fn mount(&self, point: &VirtualPath, provider: Arc<dyn VfsOps>) -> VfsResult<MountHandle> {
        let Some(parent) = point.parent() else {
            return Err(VfsError::invalid_argument("cannot mount over the root"));
        };
        let name = point.name().to_string();
        let mount = Arc::new(Mount {
            provider,
            point: point.clone(),
            closed: AtomicBool::new(false),
            table: Arc::downgrade(&self.table),
        });

        loop {
            let current = self.table.row(&parent);
            let new = match &current {
                Some(row) => {
                    if row.contains_key(&name) {
                        return Err(VfsError::already_mounted(point.to_string()));
                    }
                    let mut row = (**row).clone();
                    row.insert(name.clone(), Arc::clone(&mount));
                    row
                }
                None => HashMap::from([(name.clone(), Arc::clone(&mount))]),
            };
            if self.table.swap_row(&parent, current.as_ref(), Some(Arc::new(new))) {
                break;
            }
            tracing::trace!("mount at {} raced, retrying", point);
        }

        tracing::trace!("mounted {}", point);
        let token = self.table.leaks.register("mount", point.to_string());
        Ok(MountHandle {
            mount,
            leaks: Arc::clone(&self.table.leaks),
            token,
            resources: Vec::new(),
            source: None,
            closed: false,
        })
    }

    /// The mount governing `path`: the mount at `path` itself, else that of
    /// its nearest mounted ancestor, else the root mount.
    pub fn resolve(&self, path: &VirtualPath) -> Arc<Mount> {
        let mut current = path.clone();
        while let Some(parent) = current.parent() {
            if let Some(row) = self.table.row(&parent) {
                if let Some(mount) = row.get(current.name()) {
                    return Arc::clone(mount);
                }
            }
            current = parent;
        }
        Arc::clone(&self.table.root)
    }

    /// Names of the mounts directly below `path`.
    pub fn submounts(&self, path: &VirtualPath) -> BTreeSet<String> {
        self.table
            .row(path)
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every active mount except the root, ordered by mount point.
    pub fn list_mounts(&self) -> Vec<MountInfo> {
        let mut mounts: Vec<MountInfo> = self
            .table
            .rows
            .iter()
            .flat_map(|row| {
                row.value()
                    .values()
                    .map(|m| MountInfo {
                        point: m.point.clone(),
                        source: m.provider.source(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        mounts.sort_by(|a, b| a.point.cmp(&b.point));
        mounts
    }
}

/// Owner of one active mount and the resources created for it.
///
/// Closing the handle unmounts, closes the provider, then deletes the
/// attached temp directories. A handle dropped without
/// [`close`](MountHandle::close) is reported as a leak and closed anyway.
pub struct MountHandle {
    mount: Arc<Mount>,
    leaks: Arc<LeakRegistry>,
    token: Option<LeakToken>,
    resources: Vec<TempDir>,
    source: Option<PathBuf>,
    closed: bool,
}

impl fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountHandle")
            .field("point", &self.mount.point)
            .field("source", &self.mount_source())
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl MountHandle {
    /// The mount point.
    pub fn point(&self) -> &VirtualPath {
        &self.mount.point
    }

    /// The underlying mount.
    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    /// Physical source of the mount (archive file or real directory).
    pub fn mount_source(&self) -> Option<PathBuf> {
        self.source.clone().or_else(|| self.mount.provider.source())
    }

    /// Temp directories that live as long as this mount.
    pub fn resources(&self) -> &[TempDir] {
        &self.resources
    }

    pub(crate) fn attach(mut self, dir: TempDir) -> Self {
        self.resources.push(dir);
        self
    }

    pub(crate) fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }

    /// Unmount and release everything. Errors are logged, not returned.
    pub fn close(mut self) {
        self.leaks.release(self.token.take());
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.mount.close();
        if let Err(e) = self.mount.provider.close() {
            tracing::warn!("error closing provider at {}: {}", self.mount.point, e);
        }
        for dir in self.resources.drain(..) {
            dir.close();
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let description = self.mount.point.to_string();
        self.leaks.report(self.token.take(), "mount", &description);
        self.shutdown();
    }
}
