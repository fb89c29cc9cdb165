//! Temp resource management.
//!
//! [`TempRoot`] is the process-wide temp service. It is constructed
//! explicitly with [`TempRoot::init`] and torn down with
//! [`TempRoot::shutdown`]:
//!
//! 1. A root left behind by an earlier process is renamed out of the way and
//!    queued for background deletion; a fresh, empty root is created at once.
//! 2. Each consumer gets a [`TempFileProvider`] in its own subdirectory.
//! 3. Deletions that fail are retried by the [`DeleteScheduler`] worker.

mod provider;
mod reaper;

pub use provider::{
    DEFAULT_CREATE_ATTEMPTS, NameGenerator, TempDir, TempFileProvider, unique_name,
};
pub use reaper::{DeleteScheduler, recursive_delete};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::VfsConfig;
use crate::vfs::{VfsError, VfsResult};

/// How long [`TempRoot::shutdown`] waits for outstanding deletions.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The process-wide temp root.
#[derive(Debug)]
pub struct TempRoot {
    root: PathBuf,
    attempts: u32,
    scheduler: Arc<DeleteScheduler>,
    open: AtomicBool,
}

impl TempRoot {
    /// Start the deletion worker and prepare a fresh root.
    #[tracing::instrument(level = "debug", skip(config))]
    pub fn init(config: &VfsConfig) -> VfsResult<Arc<Self>> {
        let root = config.temp_root()?;
        let scheduler = DeleteScheduler::spawn(config.delete_retry_delay())?;

        if fs::symlink_metadata(&root).is_ok() {
            let stale = stale_name(&root);
            match fs::rename(&root, &stale) {
                Ok(()) => {
                    tracing::debug!("moved stale temp root to {}", stale.display());
                    scheduler.schedule(stale);
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to move stale temp root {} aside: {}",
                        root.display(),
                        e
                    );
                }
            }
        }
        fs::create_dir_all(&root)?;
        tracing::debug!("temp root ready at {}", root.display());

        Ok(Arc::new(Self {
            root,
            attempts: config.create_attempts,
            scheduler,
            open: AtomicBool::new(true),
        }))
    }

    /// The root directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The background deletion worker.
    pub fn scheduler(&self) -> &Arc<DeleteScheduler> {
        &self.scheduler
    }

    /// Create a provider in a fresh directory `<root>/<kind>/<kind>-<suffix>`.
    pub fn provider(&self, kind: &str) -> VfsResult<TempFileProvider> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(VfsError::provider_closed(format!("temp root {}", self.root.display())));
        }
        let kind = kind.trim();
        if kind.is_empty() || kind.contains(['/', '\\']) || kind == "." || kind == ".." {
            return Err(VfsError::invalid_argument(format!("bad provider kind '{}'", kind)));
        }
        let namer: NameGenerator = Arc::new(unique_name);
        let dir = provider::create_unique_dir(&self.root.join(kind), kind, self.attempts, &namer)?;
        Ok(TempFileProvider::new(dir, Arc::clone(&self.scheduler), self.attempts))
    }

    /// Delete the root and stop the worker. Idempotent.
    ///
    /// If the root cannot be deleted right away it is handed to the worker,
    /// which keeps retrying for up to [`SHUTDOWN_GRACE`]. Whatever is still
    /// left after that is reclaimed by the next `init` on the same root.
    pub fn shutdown(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = recursive_delete(&self.root) {
            tracing::debug!("temp root {} not deleted yet: {}", self.root.display(), e);
            self.scheduler.schedule(self.root.clone());
        }
        if !self.scheduler.drain(SHUTDOWN_GRACE) {
            tracing::warn!(
                "{} temp deletions still outstanding at shutdown",
                self.scheduler.pending()
            );
        }
        self.scheduler.shutdown();
    }
}

/// Sibling name for a root that is about to be deleted.
fn stale_name(root: &Path) -> PathBuf {
    let base = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vfs".to_string());
    let name = unique_name(&format!("{}.to-be-deleted", base));
    match root.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}
