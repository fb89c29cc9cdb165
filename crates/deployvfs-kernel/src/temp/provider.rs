//! Temp directory providers.
//!
//! A [`TempFileProvider`] owns one directory below the temp root and hands
//! out uniquely named [`TempDir`]s inside it. Closing the provider deletes
//! its whole directory; closing a `TempDir` deletes just that directory.
//! Deletions that fail are handed to the [`DeleteScheduler`] and retried in
//! the background.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::reaper::{DeleteScheduler, recursive_delete};
use crate::vfs::{VfsError, VfsResult};

/// Default bound on name-collision retries.
pub const DEFAULT_CREATE_ATTEMPTS: u32 = 16;

/// Generates a candidate directory name from a label.
pub type NameGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default name generator: `label-<counter><random>`.
///
/// The counter part never repeats within a process, so a name is never
/// reissued even after the directory carrying it has been deleted.
pub fn unique_name(label: &str) -> String {
    let n = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:x}{:08x}", label, n, rand::random::<u32>())
}

/// Create a fresh directory named by `namer` below `parent`, retrying on
/// collisions up to `attempts` times.
pub(crate) fn create_unique_dir(
    parent: &Path,
    label: &str,
    attempts: u32,
    namer: &NameGenerator,
) -> VfsResult<PathBuf> {
    fs::create_dir_all(parent)?;
    for attempt in 1..=attempts {
        let candidate = parent.join(namer(label));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::trace!("temp name collision on {} (attempt {})", candidate.display(), attempt);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(VfsError::resource_exhausted(format!(
        "could not allocate a directory for '{}' under {} after {} attempts",
        label,
        parent.display(),
        attempts
    )))
}

/// Turn a caller label into something usable as a file name prefix.
fn sanitize_label(label: &str) -> VfsResult<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(VfsError::invalid_argument("temp dir label is blank"));
    }
    Ok(trimmed.replace(['/', '\\'], "_"))
}

/// Delete now, or hand the tree to the scheduler if that fails.
fn delete_or_schedule(path: &Path, scheduler: &DeleteScheduler) {
    if let Err(e) = recursive_delete(path) {
        tracing::warn!(
            "failed to delete {}: {}; scheduling background deletion",
            path.display(),
            e
        );
        scheduler.schedule(path.to_path_buf());
    }
}

struct ProviderInner {
    root: PathBuf,
    open: AtomicBool,
    attempts: u32,
    namer: NameGenerator,
    scheduler: Arc<DeleteScheduler>,
}

impl ProviderInner {
    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!("closing temp provider {}", self.root.display());
            delete_or_schedule(&self.root, &self.scheduler);
        }
    }
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Issues and reclaims ephemeral directories below one root.
///
/// Cloning is cheap; clones share the open flag. The provider closes itself
/// when the last clone (including those held by live `TempDir`s) drops.
#[derive(Clone)]
pub struct TempFileProvider {
    inner: Arc<ProviderInner>,
}

impl fmt::Debug for TempFileProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempFileProvider")
            .field("root", &self.inner.root)
            .field("open", &self.is_open())
            .finish()
    }
}

impl TempFileProvider {
    /// Create a provider rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>, scheduler: Arc<DeleteScheduler>, attempts: u32) -> Self {
        Self::with_name_generator(root, scheduler, attempts, Arc::new(unique_name))
    }

    /// Create a provider with a custom name generator.
    pub fn with_name_generator(
        root: impl Into<PathBuf>,
        scheduler: Arc<DeleteScheduler>,
        attempts: u32,
        namer: NameGenerator,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                root: root.into(),
                open: AtomicBool::new(true),
                attempts,
                namer,
                scheduler,
            }),
        }
    }

    /// Directory holding this provider's temp dirs.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Whether the provider still issues directories.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Scheduler used for deferred deletions.
    pub fn scheduler(&self) -> &Arc<DeleteScheduler> {
        &self.inner.scheduler
    }

    /// Create a new, empty, uniquely named directory.
    #[tracing::instrument(level = "debug", skip(self), fields(root = %self.inner.root.display()))]
    pub fn create_temp_dir(&self, label: &str) -> VfsResult<TempDir> {
        if !self.is_open() {
            return Err(VfsError::provider_closed(format!(
                "temp provider {}",
                self.inner.root.display()
            )));
        }
        let label = sanitize_label(label)?;
        let path = create_unique_dir(&self.inner.root, &label, self.inner.attempts, &self.inner.namer)?;
        tracing::debug!("created temp dir {}", path.display());
        Ok(TempDir {
            provider: self.clone(),
            root: path,
            open: AtomicBool::new(true),
        })
    }

    /// Stop issuing directories and delete the provider root. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

/// An ephemeral directory. Deleted on [`close`](TempDir::close) or drop.
pub struct TempDir {
    provider: TempFileProvider,
    root: PathBuf,
    open: AtomicBool,
}

impl fmt::Debug for TempDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempDir")
            .field("root", &self.root)
            .field("open", &self.is_open())
            .finish()
    }
}

impl TempDir {
    /// The physical directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the directory has not been closed yet.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Provider that issued this directory.
    pub fn provider(&self) -> &TempFileProvider {
        &self.provider
    }

    /// Physical path of `name` inside this directory.
    ///
    /// `name` is a relative `/`-separated path; it may not leave the
    /// directory.
    pub fn file(&self, name: &str) -> VfsResult<PathBuf> {
        if !self.is_open() {
            return Err(VfsError::provider_closed(format!("temp dir {}", self.root.display())));
        }
        let canonical = crate::vfs::canonicalize(name.trim_start_matches('/'));
        if canonical == ".." || canonical.starts_with("../") {
            return Err(VfsError::path_escapes_root(name));
        }
        if canonical.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(canonical))
    }

    /// Write `reader` to `name` inside this directory, creating parents.
    pub fn create_file(&self, name: &str, reader: &mut impl Read) -> VfsResult<PathBuf> {
        let path = self.file(name)?;
        if path == self.root {
            return Err(VfsError::is_a_directory(name));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&path)?;
        io::copy(reader, &mut out)?;
        Ok(path)
    }

    /// Delete the directory. Idempotent; failures are retried in the
    /// background rather than reported.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!("closing temp dir {}", self.root.display());
            delete_or_schedule(&self.root, self.provider.scheduler());
        }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        self.close();
    }
}
