//! Streaming archive view over a virtual directory.
//!
//! [`VirtualArchiveStream`] walks a directory depth-first, one entry at a
//! time, without listing the whole tree up front. [`ArchiveByteStream`]
//! turns that walk into ZIP bytes, so a directory can be handed to any ZIP
//! reader as if it were an archive file.
//!
//! Entry state machine:
//!
//! ```text
//! NotStarted --next_entry--> InEntry | Exhausted
//! InEntry --read--> InEntry, then BetweenEntries at end of entry data
//! InEntry | BetweenEntries --next_entry--> InEntry | Exhausted
//! any --close--> Closed
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ArchiveEntry;
use super::format::{LOCAL_HEADER_SIGNATURE, ZipEncoder};
use crate::vfs::{DirEntry, VfsError, VfsOps, VfsResult};

const META_INF: &str = "META-INF";
const MANIFEST_NAME: &str = "MANIFEST.MF";

/// Position of a [`VirtualArchiveStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No entry requested yet.
    NotStarted,
    /// Positioned on an entry whose data has not been fully read.
    InEntry,
    /// The current entry's data is exhausted.
    BetweenEntries,
    /// No entries remain.
    Exhausted,
    /// Closed; reads fail.
    Closed,
}

struct Pending {
    name: String,
    path: PathBuf,
}

/// Forward-only, non-restartable sequence of archive entries.
///
/// Single consumer; not meant to be shared between tasks.
pub struct VirtualArchiveStream {
    provider: Arc<dyn VfsOps>,
    root: PathBuf,
    state: StreamState,
    stack: Vec<Pending>,
    current: Option<ArchiveEntry>,
    position: u64,
}

impl VirtualArchiveStream {
    /// Stream the directory `root` of `provider`.
    pub fn new(provider: Arc<dyn VfsOps>, root: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            root: root.into(),
            state: StreamState::NotStarted,
            stack: Vec::new(),
            current: None,
            position: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The entry last returned by [`next_entry`](Self::next_entry).
    pub fn current(&self) -> Option<&ArchiveEntry> {
        self.current.as_ref()
    }

    fn closed_error(&self) -> VfsError {
        VfsError::provider_closed(format!("archive stream over {}", self.root.display()))
    }

    /// Queue the children of `path`, so they pop in listing order.
    ///
    /// `META-INF` leads the top level and `MANIFEST.MF` leads `META-INF`.
    async fn push_children(&mut self, path: &Path, prefix: &str) -> VfsResult<()> {
        let mut children: Vec<DirEntry> = self.provider.readdir(path).await?;
        let first = match prefix {
            "" => Some(META_INF),
            META_INF => Some(MANIFEST_NAME),
            _ => None,
        };
        if let Some(first) = first {
            if let Some(idx) = children.iter().position(|c| c.name == first) {
                let entry = children.remove(idx);
                children.insert(0, entry);
            }
        }

        for child in children.into_iter().rev() {
            let name = if prefix.is_empty() {
                child.name.clone()
            } else {
                format!("{}/{}", prefix, child.name)
            };
            self.stack.push(Pending {
                name,
                path: path.join(&child.name),
            });
        }
        Ok(())
    }

    /// Advance to the next entry. Returns `None` once the walk is done.
    pub async fn next_entry(&mut self) -> VfsResult<Option<ArchiveEntry>> {
        match self.state {
            StreamState::Closed => return Err(self.closed_error()),
            StreamState::Exhausted => return Ok(None),
            StreamState::NotStarted => {
                let root = self.root.clone();
                self.push_children(&root, "").await?;
            }
            StreamState::InEntry | StreamState::BetweenEntries => {}
        }

        let Some(next) = self.stack.pop() else {
            self.state = StreamState::Exhausted;
            self.current = None;
            return Ok(None);
        };

        let attr = self.provider.getattr(&next.path).await?;
        if attr.is_dir() {
            self.push_children(&next.path, &next.name).await?;
        }
        let entry = ArchiveEntry::new(
            next.name,
            attr.is_dir(),
            if attr.is_dir() { 0 } else { attr.size },
            attr.mtime,
            Arc::clone(&self.provider),
            next.path,
        );
        self.current = Some(entry.clone());
        self.position = 0;
        self.state = StreamState::InEntry;
        Ok(Some(entry))
    }

    /// Read the current entry's data.
    ///
    /// Returns 0 at the end of the entry, before the first
    /// [`next_entry`](Self::next_entry) and after the walk is exhausted.
    /// Fails once closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        match self.state {
            StreamState::Closed => return Err(self.closed_error()),
            StreamState::NotStarted | StreamState::BetweenEntries | StreamState::Exhausted => {
                return Ok(0);
            }
            StreamState::InEntry => {}
        }
        let Some(entry) = self.current.as_ref() else {
            self.state = StreamState::BetweenEntries;
            return Ok(0);
        };
        if entry.is_directory() {
            self.state = StreamState::BetweenEntries;
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let want = buf.len().min(u32::MAX as usize) as u32;
        let chunk = entry.read_at(self.position, want).await?;
        if chunk.is_empty() {
            self.state = StreamState::BetweenEntries;
            return Ok(0);
        }
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.position += n as u64;
        Ok(n)
    }

    /// Stop the walk. Idempotent.
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
        self.stack.clear();
        self.current = None;
    }
}

enum Source {
    Framed {
        entries: VirtualArchiveStream,
        encoder: Option<ZipEncoder>,
        remaining: u64,
    },
    Passthrough {
        provider: Arc<dyn VfsOps>,
        path: PathBuf,
        offset: u64,
    },
}

/// ZIP-framed bytes of a virtual directory (or of an archive file).
///
/// Each entry's content is read twice: once to compute its CRC for the
/// local header, then again while streaming. Only headers and the final
/// directory index are held in memory.
pub struct ArchiveByteStream {
    source: Source,
    pending: Vec<u8>,
    pending_pos: usize,
}

impl ArchiveByteStream {
    /// Frame the directory `root` of `provider`.
    pub fn new(provider: Arc<dyn VfsOps>, root: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::Framed {
                entries: VirtualArchiveStream::new(provider, root),
                encoder: Some(ZipEncoder::new()),
                remaining: 0,
            },
            pending: Vec::new(),
            pending_pos: 0,
        }
    }

    /// Archive bytes for `path`: a directory is framed, a ZIP file is
    /// passed through unchanged, anything else is `ArchiveMalformed`.
    pub async fn for_path(provider: Arc<dyn VfsOps>, path: impl Into<PathBuf>) -> VfsResult<Self> {
        let path = path.into();
        let attr = provider.getattr(&path).await?;
        if attr.is_dir() {
            return Ok(Self::new(provider, path));
        }
        let head = provider.read(&path, 0, LOCAL_HEADER_SIGNATURE.len() as u32).await?;
        if head != LOCAL_HEADER_SIGNATURE {
            return Err(VfsError::archive_malformed(format!(
                "{} is not a ZIP archive",
                path.display()
            )));
        }
        Ok(Self {
            source: Source::Passthrough {
                provider,
                path,
                offset: 0,
            },
            pending: Vec::new(),
            pending_pos: 0,
        })
    }

    /// Read the next bytes. Returns 0 at end of archive.
    pub async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pending_pos < self.pending.len() {
                let n = (self.pending.len() - self.pending_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                return Ok(n);
            }

            match &mut self.source {
                Source::Passthrough {
                    provider,
                    path,
                    offset,
                } => {
                    let want = buf.len().min(u32::MAX as usize) as u32;
                    let chunk = provider.read(path, *offset, want).await?;
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    *offset += n as u64;
                    return Ok(n);
                }
                Source::Framed {
                    entries,
                    encoder,
                    remaining,
                } => {
                    if *remaining > 0 {
                        let want = (buf.len() as u64).min(*remaining) as usize;
                        let n = entries.read(&mut buf[..want]).await?;
                        if n == 0 {
                            let name = entries.current().map(|e| e.name().to_string()).unwrap_or_default();
                            return Err(VfsError::archive_malformed(format!(
                                "{} shrank while being streamed",
                                name
                            )));
                        }
                        *remaining -= n as u64;
                        return Ok(n);
                    }

                    let Some(active) = encoder.as_mut() else {
                        return Ok(0);
                    };
                    let header = match entries.next_entry().await? {
                        Some(entry) => {
                            let (crc, size) = entry.checksum().await?;
                            *remaining = size;
                            active.local_header(entry.name(), entry.is_directory(), size, crc, entry.modified())?
                        }
                        None => {
                            entries.close();
                            match encoder.take() {
                                Some(done) => done.finish()?,
                                None => Vec::new(),
                            }
                        }
                    };
                    self.pending = header;
                    self.pending_pos = 0;
                }
            }
        }
    }

    /// Read everything into memory.
    pub async fn read_to_end(&mut self) -> VfsResult<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_to(&mut out).await?;
        Ok(out)
    }

    /// Copy everything into `out`, returning the byte count.
    pub async fn copy_to<W: std::io::Write + Send>(&mut self, out: &mut W) -> VfsResult<u64> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.write_all(&buf[..n])?;
            total += n as u64;
        }
    }
}
