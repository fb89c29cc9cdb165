//! Archive-backed backend.
//!
//! Serves the entries of a ZIP file straight from the archive. The entry
//! table is indexed once when the archive is opened; content is decompressed
//! on demand. Directories the archive only implies (a file `a/b/c.txt`
//! without entries for `a/` or `a/b/`) are synthesized.
//!
//! When given an extraction directory, [`real_path`](VfsOps::real_path)
//! materializes entries there on first request.
//!
//! Partial reads go through a spill: the entry being read is decompressed
//! once into an unnamed temp file and later chunks are served from it, so a
//! reader walking an entry in order pays for one decompression.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use filetime::FileTime;
use parking_lot::Mutex;
use zip::ZipArchive;

use crate::archive::format::{clean_entry_name, from_zip_datetime, read_entry};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

#[derive(Debug)]
struct Node {
    kind: FileType,
    size: u64,
    mtime: SystemTime,
    /// Archive index for real file entries.
    entry: Option<usize>,
    children: BTreeMap<String, FileType>,
}

impl Node {
    fn directory(mtime: SystemTime) -> Self {
        Self {
            kind: FileType::Directory,
            size: 0,
            mtime,
            entry: None,
            children: BTreeMap::new(),
        }
    }
}

/// Decompressed copy of one entry.
struct Spill {
    index: usize,
    file: File,
}

/// Read-only view of a ZIP archive.
pub struct ZipBackend {
    source: PathBuf,
    nodes: HashMap<String, Node>,
    archive: Mutex<Option<ZipArchive<File>>>,
    /// Locked before `archive` when both are held.
    spill: Mutex<Option<Spill>>,
    spills_created: AtomicUsize,
    extract_root: Option<PathBuf>,
}

impl std::fmt::Debug for ZipBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipBackend")
            .field("source", &self.source)
            .field("entries", &self.nodes.len())
            .field("extract_root", &self.extract_root)
            .finish()
    }
}

impl ZipBackend {
    /// Open and index an archive file.
    #[tracing::instrument(level = "debug")]
    pub fn open(path: &Path) -> VfsResult<Self> {
        let source = dunce::canonicalize(path)?;
        let file = File::open(&source)?;
        let archive_mtime = file
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut archive = ZipArchive::new(file)?;

        let mut nodes = HashMap::new();
        nodes.insert(String::new(), Node::directory(archive_mtime));

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            let raw_name = entry.name().to_string();
            let Some(name) = clean_entry_name(&raw_name) else {
                tracing::warn!("skipping archive entry {:?} in {}", raw_name, source.display());
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let mtime = entry
                .last_modified()
                .and_then(from_zip_datetime)
                .unwrap_or(archive_mtime);
            let node = if entry.is_dir() {
                Node::directory(mtime)
            } else {
                Node {
                    kind: FileType::File,
                    size: entry.size(),
                    mtime,
                    entry: Some(index),
                    children: BTreeMap::new(),
                }
            };
            drop(entry);
            Self::insert(&mut nodes, name, node, archive_mtime);
        }

        tracing::debug!("indexed {} nodes from {}", nodes.len(), source.display());
        Ok(Self {
            source,
            nodes,
            archive: Mutex::new(Some(archive)),
            spill: Mutex::new(None),
            spills_created: AtomicUsize::new(0),
            extract_root: None,
        })
    }

    /// Materialize entries below `dir` when their real path is requested.
    pub fn with_extract_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extract_root = Some(dir.into());
        self
    }

    fn insert(nodes: &mut HashMap<String, Node>, name: String, node: Node, implied_mtime: SystemTime) {
        // Link into the parent chain, synthesizing missing directories.
        // A name that is both a file and a directory stays a directory.
        let mut child = name.clone();
        let mut kind = node.kind;
        loop {
            let (parent, base) = match child.rfind('/') {
                Some(idx) => (child[..idx].to_string(), child[idx + 1..].to_string()),
                None => (String::new(), child.clone()),
            };
            let parent_node = nodes
                .entry(parent.clone())
                .or_insert_with(|| Node::directory(implied_mtime));
            let mut promoted = false;
            if !parent_node.kind.is_dir() {
                tracing::warn!("archive entry {} is both a file and a directory", parent);
                let mtime = parent_node.mtime;
                *parent_node = Node::directory(mtime);
                promoted = true;
            }
            let known = match parent_node.children.get_mut(&base) {
                Some(recorded) => {
                    if kind.is_dir() {
                        *recorded = FileType::Directory;
                    }
                    true
                }
                None => {
                    parent_node.children.insert(base, kind);
                    false
                }
            };
            if (known && !promoted) || parent.is_empty() {
                break;
            }
            child = parent;
            kind = FileType::Directory;
        }

        match nodes.get_mut(&name) {
            // An explicit directory entry after files below it: keep children.
            Some(existing) if existing.kind.is_dir() && node.kind.is_dir() => {
                existing.mtime = node.mtime;
            }
            Some(existing) if existing.kind.is_dir() => {
                tracing::warn!("archive entry {} is both a file and a directory", name);
            }
            _ => {
                nodes.insert(name, node);
            }
        }
    }

    /// Archive file backing this view.
    pub fn archive_path(&self) -> &Path {
        &self.source
    }

    fn key(path: &Path) -> VfsResult<String> {
        let raw = path.to_string_lossy();
        let key = crate::vfs::canonicalize(raw.trim_start_matches('/'));
        if key == ".." || key.starts_with("../") {
            return Err(VfsError::path_escapes_root(raw.into_owned()));
        }
        Ok(key)
    }

    fn lookup(&self, path: &Path) -> VfsResult<(String, &Node)> {
        let key = Self::key(path)?;
        match self.nodes.get(&key) {
            Some(node) => Ok((key, node)),
            None => Err(VfsError::not_found(path.display().to_string())),
        }
    }

    fn closed(&self) -> VfsError {
        VfsError::provider_closed(format!("archive {}", self.source.display()))
    }

    /// Decompress one entry into `target`, restoring its mtime.
    fn extract_entry(archive: &mut ZipArchive<File>, index: usize, target: &Path, mtime: SystemTime) -> VfsResult<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let mut out = File::create(target)?;
        io::copy(&mut entry, &mut out).map_err(|e| VfsError::entry_read(&name, e))?;
        drop(out);
        filetime::set_file_mtime(target, FileTime::from_system_time(mtime))?;
        Ok(())
    }

    /// Decompress entry `index` into a fresh unnamed temp file.
    fn fill_spill(&self, archive: &mut ZipArchive<File>, index: usize) -> VfsResult<Spill> {
        let mut file = match &self.extract_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                tempfile::tempfile_in(root)?
            }
            None => tempfile::tempfile()?,
        };
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        io::copy(&mut entry, &mut file).map_err(|e| VfsError::entry_read(&name, e))?;
        self.spills_created.fetch_add(1, Ordering::Relaxed);
        Ok(Spill { index, file })
    }
}

#[async_trait]
impl VfsOps for ZipBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let (_, node) = self.lookup(path)?;
        let attr = match node.kind {
            FileType::Directory => FileAttr::directory(0o755),
            _ => FileAttr::file(node.size, 0o644),
        };
        Ok(attr.with_mtime(node.mtime))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let (_, node) = self.lookup(path)?;
        if !node.kind.is_dir() {
            return Err(VfsError::not_a_directory(path.display().to_string()));
        }
        Ok(node
            .children
            .iter()
            .map(|(name, kind)| DirEntry::new(name.clone(), *kind))
            .collect())
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let (_, node) = self.lookup(path)?;
        let Some(index) = node.entry else {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        };
        if offset >= node.size {
            return Ok(Vec::new());
        }

        // One read covering the whole entry needs no spill.
        if offset == 0 && size as u64 >= node.size {
            let mut guard = self.archive.lock();
            let archive = guard.as_mut().ok_or_else(|| self.closed())?;
            let mut entry = archive.by_index(index)?;
            return read_entry(&mut (&mut entry).take(size as u64), &path.to_string_lossy(), node.size);
        }

        let mut slot = self.spill.lock();
        {
            let mut guard = self.archive.lock();
            let archive = guard.as_mut().ok_or_else(|| self.closed())?;
            if slot.as_ref().map(|s| s.index) != Some(index) {
                *slot = None;
                *slot = Some(self.fill_spill(archive, index)?);
            }
        }
        let Some(spill) = slot.as_mut() else {
            return Err(self.closed());
        };
        spill.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = Vec::new();
        (&mut spill.file).take(size as u64).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let (_, node) = self.lookup(path)?;
        let Some(index) = node.entry else {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        };
        let mut guard = self.archive.lock();
        let archive = guard.as_mut().ok_or_else(|| self.closed())?;
        let mut entry = archive.by_index(index)?;
        read_entry(&mut entry, &path.to_string_lossy(), node.size)
    }

    async fn real_path(&self, path: &Path) -> VfsResult<Option<PathBuf>> {
        let Some(root) = &self.extract_root else {
            return Ok(None);
        };
        let (key, node) = self.lookup(path)?;
        let target = if key.is_empty() { root.clone() } else { root.join(&key) };

        let mut guard = self.archive.lock();
        let archive = guard.as_mut().ok_or_else(|| self.closed())?;

        if let Some(index) = node.entry {
            if !target.exists() {
                tracing::debug!("extracting {} to {}", key, target.display());
                Self::extract_entry(archive, index, &target, node.mtime)?;
            }
            return Ok(Some(target));
        }

        // Directory: materialize the whole subtree so the path is usable.
        std::fs::create_dir_all(&target)?;
        let prefix = if key.is_empty() { String::new() } else { format!("{}/", key) };
        for (name, child) in self.nodes.iter().filter(|(name, _)| name.starts_with(&prefix)) {
            let child_target = root.join(name);
            match child.entry {
                Some(index) if !child_target.exists() => {
                    Self::extract_entry(archive, index, &child_target, child.mtime)?;
                }
                None if !name.is_empty() => std::fs::create_dir_all(&child_target)?,
                _ => {}
            }
        }
        Ok(Some(target))
    }

    fn source(&self) -> Option<PathBuf> {
        Some(self.source.clone())
    }

    fn close(&self) -> VfsResult<()> {
        if self.archive.lock().take().is_some() {
            tracing::debug!("closed archive {}", self.source.display());
        }
        self.spill.lock().take();
        Ok(())
    }
}
