//! The namespace facade.
//!
//! [`Vfs`] owns a [`MountTable`], the process temp root and an
//! [`ArchiveExtractor`]. It offers one mount call per provider kind and
//! implements [`VfsOps`] over the whole namespace, routing every request to
//! the governing mount with the mount-relative path.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::backends::{LocalBackend, MemoryBackend, ZipBackend};
use super::leak::LeakRegistry;
use super::mount::{Mount, MountHandle, MountInfo, MountTable};
use super::ops::VfsOps;
use super::path::VirtualPath;
use super::types::{DirEntry, FileAttr};
use super::{VfsError, VfsResult};
use crate::archive::{ArchiveByteStream, ArchiveExtractor, MANIFEST_PATH, Manifest, read_manifest};
use crate::config::VfsConfig;
use crate::temp::{TempFileProvider, TempRoot};

/// Label of temp directories backing `mount_temp`.
const TMPFS_LABEL: &str = "tmpfs";

/// A virtual namespace with its temp storage.
pub struct Vfs {
    table: MountTable,
    temp_root: Arc<TempRoot>,
    temp: TempFileProvider,
    extractor: ArchiveExtractor,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("temp_root", &self.temp_root.path())
            .field("mounts", &self.table.list_mounts())
            .finish()
    }
}

impl Vfs {
    /// Prepare the temp root and an empty namespace.
    pub fn new(config: &VfsConfig) -> VfsResult<Self> {
        let temp_root = TempRoot::init(config)?;
        let temp = temp_root.provider("vfs")?;
        let leaks = Arc::new(LeakRegistry::new(config.track_leaks));
        let table = MountTable::with_leak_registry(Arc::new(MemoryBackend::new()), leaks);
        Ok(Self {
            table,
            temp_root,
            temp,
            extractor: ArchiveExtractor::new(config.nested()),
        })
    }

    pub fn table(&self) -> &MountTable {
        &self.table
    }

    /// Provider the facade creates mount resources in.
    pub fn temp_provider(&self) -> &TempFileProvider {
        &self.temp
    }

    pub fn temp_root(&self) -> &Arc<TempRoot> {
        &self.temp_root
    }

    pub fn extractor(&self) -> &ArchiveExtractor {
        &self.extractor
    }

    pub fn leaks(&self) -> &Arc<LeakRegistry> {
        self.table.leaks()
    }

    pub fn list_mounts(&self) -> Vec<MountInfo> {
        self.table.list_mounts()
    }

    // ========================================================================
    // Mounting
    // ========================================================================

    /// Attach any provider at `point`.
    pub fn mount(&self, point: &str, provider: Arc<dyn VfsOps>) -> VfsResult<MountHandle> {
        self.table.mount(&VirtualPath::new(point)?, provider)
    }

    /// Expose the real directory `dir` at `point`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn mount_real(&self, dir: &Path, point: &str) -> VfsResult<MountHandle> {
        let point = VirtualPath::new(point)?;
        let meta = std::fs::metadata(dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::not_found(dir.display().to_string()),
            _ => VfsError::Io(e),
        })?;
        if !meta.is_dir() {
            return Err(VfsError::not_a_directory(dir.display().to_string()));
        }
        self.table.mount(&point, Arc::new(LocalBackend::new(dir)))
    }

    /// Mount a fresh scratch directory at `point`. It is deleted when the
    /// handle closes.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn mount_temp(&self, point: &str) -> VfsResult<MountHandle> {
        let point = VirtualPath::new(point)?;
        let dir = self.temp.create_temp_dir(TMPFS_LABEL)?;
        let backend = LocalBackend::new(dir.root());
        let handle = self.table.mount(&point, Arc::new(backend))?;
        Ok(handle.attach(dir))
    }

    /// Mount the archive file `archive` at `point`, reading entries in place.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn mount_zip(&self, archive: &Path, point: &str) -> VfsResult<MountHandle> {
        let point = VirtualPath::new(point)?;
        let dir = self.temp.create_temp_dir(&archive_label(archive))?;
        let backend = ZipBackend::open(archive)?.with_extract_dir(dir.root());
        let source = backend.archive_path().to_path_buf();
        let handle = self.table.mount(&point, Arc::new(backend))?;
        Ok(handle.attach(dir).with_source(source))
    }

    /// Extract `archive` (flattening nested archives) into a temp directory
    /// and mount that directory at `point`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn mount_zip_expanded(&self, archive: &Path, point: &str) -> VfsResult<MountHandle> {
        let point = VirtualPath::new(point)?;
        let dir = self.temp.create_temp_dir(&archive_label(archive))?;

        let extractor = self.extractor.clone();
        let source = archive.to_path_buf();
        let target = dir.root().to_path_buf();
        tokio::task::spawn_blocking(move || extractor.extract(&source, &target))
            .await
            .map_err(|e| VfsError::other(format!("extraction task failed: {}", e)))??;

        let handle = self.table.mount(&point, Arc::new(LocalBackend::new(dir.root())))?;
        Ok(handle.attach(dir).with_source(archive.to_path_buf()))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// The mount governing `path`.
    pub fn resolve(&self, path: &str) -> VfsResult<Arc<Mount>> {
        Ok(self.table.resolve(&VirtualPath::new(path)?))
    }

    /// Names of the mounts directly below `path`.
    pub fn submounts(&self, path: &str) -> VfsResult<BTreeSet<String>> {
        Ok(self.table.submounts(&VirtualPath::new(path)?))
    }

    /// First segments of every mount strictly below `path`.
    fn mounted_children(&self, path: &VirtualPath) -> BTreeSet<String> {
        let mut names = self.table.submounts(path);
        for info in self.table.list_mounts() {
            if let Some(rest) = info.point.relative_to(path) {
                if let Some(first) = rest.split('/').next().filter(|s| !s.is_empty()) {
                    names.insert(first.to_string());
                }
            }
        }
        names
    }

    fn route(&self, path: &Path) -> VfsResult<(VirtualPath, Arc<Mount>, PathBuf)> {
        let raw = path
            .to_str()
            .ok_or_else(|| VfsError::invalid_argument(format!("path is not UTF-8: {}", path.display())))?;
        let point = VirtualPath::new(raw)?;
        let mount = self.table.resolve(&point);
        let relative = mount
            .relative(&point)
            .map(PathBuf::from)
            .ok_or_else(|| VfsError::not_found(point.to_string()))?;
        Ok((point, mount, relative))
    }

    /// Parse `<dir>/META-INF/MANIFEST.MF`, or `None` if there is none.
    pub async fn manifest(&self, dir: &str) -> VfsResult<Option<Manifest>> {
        let path = VirtualPath::new(dir)?.join(MANIFEST_PATH)?;
        match self.read_all(Path::new(path.as_str())).await {
            Ok(bytes) => read_manifest(&bytes).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// ZIP bytes for `path`: a directory is framed, an archive file is
    /// passed through.
    pub async fn pack(self: &Arc<Self>, path: &str) -> VfsResult<ArchiveByteStream> {
        let point = VirtualPath::new(path)?;
        let namespace: Arc<dyn VfsOps> = Arc::clone(self) as Arc<dyn VfsOps>;
        ArchiveByteStream::for_path(namespace, point.as_str()).await
    }

    /// Close the temp provider and delete the temp root. Idempotent.
    ///
    /// Mount handles still open keep their providers but lose their temp
    /// directories.
    pub fn shutdown(&self) {
        self.temp.close();
        self.temp_root.shutdown();
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn archive_label(archive: &Path) -> String {
    archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "archive".to_string())
}

#[async_trait]
impl VfsOps for Vfs {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let (point, mount, relative) = self.route(path)?;
        match mount.provider().getattr(&relative).await {
            Err(e) if e.is_not_found() && !self.mounted_children(&point).is_empty() => {
                Ok(FileAttr::directory(0o755))
            }
            other => other,
        }
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let (point, mount, relative) = self.route(path)?;
        let mounted = self.mounted_children(&point);
        let mut entries = match mount.provider().readdir(&relative).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() && !mounted.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };
        if mounted.is_empty() {
            return Ok(entries);
        }
        entries.retain(|e| !mounted.contains(&e.name));
        entries.extend(mounted.into_iter().map(DirEntry::directory));
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let (_, mount, relative) = self.route(path)?;
        mount.provider().read(&relative, offset, size).await
    }

    async fn real_path(&self, path: &Path) -> VfsResult<Option<PathBuf>> {
        let (_, mount, relative) = self.route(path)?;
        mount.provider().real_path(&relative).await
    }

    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let (_, mount, relative) = self.route(path)?;
        mount.provider().read_all(&relative).await
    }
}
