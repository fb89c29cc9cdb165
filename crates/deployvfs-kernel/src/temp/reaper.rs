//! Background deletion of temp directories.
//!
//! Deletion runs on one dedicated thread. A delete that fails (typically
//! because something still holds a handle inside the tree) is re-queued
//! after a fixed delay, forever, until it succeeds or the scheduler shuts
//! down. Callers never see the failure.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::vfs::{VfsError, VfsResult};

const DRAIN_POLL: Duration = Duration::from_millis(10);

enum ReaperCommand {
    Delete { path: PathBuf, attempt: u32 },
    Shutdown,
}

/// Dedicated worker that deletes directory trees with retry.
#[derive(Debug)]
pub struct DeleteScheduler {
    tx: mpsc::UnboundedSender<ReaperCommand>,
    pending: Arc<AtomicUsize>,
    retry_delay: Duration,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DeleteScheduler {
    /// Spawn the worker thread.
    pub fn spawn(retry_delay: Duration) -> VfsResult<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_tx = tx.clone();
        let worker_pending = Arc::clone(&pending);
        let worker = thread::Builder::new()
            .name("vfs-reaper".into())
            .spawn(move || reaper_thread(rx, worker_tx, worker_pending, retry_delay))
            .map_err(VfsError::Io)?;

        Ok(Arc::new(Self {
            tx,
            pending,
            retry_delay,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Queue `path` for recursive deletion.
    pub fn schedule(&self, path: PathBuf) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(ReaperCommand::Delete { path, attempt: 1 }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("delete scheduler is shut down; leaving temp content in place");
        }
    }

    /// Deletions queued or waiting for a retry.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Delay between attempts on the same tree.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Wait until nothing is queued or awaiting a retry, up to `timeout`.
    ///
    /// Returns false if deletions were still outstanding at the deadline.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(DRAIN_POLL.min(self.retry_delay));
        }
        true
    }

    /// Stop the worker. Deletions still waiting for a retry are abandoned.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.tx.send(ReaperCommand::Shutdown);
        if worker.join().is_err() {
            tracing::warn!("vfs-reaper thread panicked");
        }
    }
}

impl Drop for DeleteScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The worker thread main function.
///
/// Runs a single-threaded tokio runtime so retries can wait on timers
/// without blocking newly queued deletes.
fn reaper_thread(
    mut rx: mpsc::UnboundedReceiver<ReaperCommand>,
    tx: mpsc::UnboundedSender<ReaperCommand>,
    pending: Arc<AtomicUsize>,
    retry_delay: Duration,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("vfs-reaper: failed to create runtime: {}", e);
            return;
        }
    };

    let loop_pending = Arc::clone(&pending);
    rt.block_on(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ReaperCommand::Delete { path, attempt } => match recursive_delete(&path) {
                    Ok(()) => {
                        loop_pending.fetch_sub(1, Ordering::SeqCst);
                        tracing::debug!("deleted {} (attempt {})", path.display(), attempt);
                    }
                    Err(e) => {
                        tracing::debug!(
                            "delete of {} failed (attempt {}): {}; retrying in {:?}",
                            path.display(),
                            attempt,
                            e,
                            retry_delay
                        );
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(retry_delay).await;
                            let _ = tx.send(ReaperCommand::Delete {
                                path,
                                attempt: attempt + 1,
                            });
                        });
                    }
                },
                ReaperCommand::Shutdown => break,
            }
        }
    });

    let abandoned = pending.load(Ordering::SeqCst);
    if abandoned > 0 {
        tracing::debug!("vfs-reaper stopped with {} deletions outstanding", abandoned);
    }
}

/// Delete `root` and everything below it, children before parents.
///
/// Keeps going past individual failures so one stuck file does not leave
/// the rest of the tree behind; the first error is returned. A missing
/// `root` counts as deleted.
pub fn recursive_delete(root: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(root) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
        Ok(_) => {}
    }

    let mut first_err: Option<io::Error> = None;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e.into());
                }
                continue;
            }
        };
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            _ => {}
        }
    }

    match first_err {
        Some(e) if root.exists() => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn test_recursive_delete_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("a/b/c")).unwrap();
        std::fs::write(root.join("a/file.txt"), b"x").unwrap();
        std::fs::write(root.join("a/b/c/deep.txt"), b"y").unwrap();

        recursive_delete(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_recursive_delete_missing_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        recursive_delete(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn test_recursive_delete_single_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"data").unwrap();
        recursive_delete(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_scheduler_deletes_in_background() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("stale");
        std::fs::create_dir_all(root.join("x")).unwrap();
        std::fs::write(root.join("x/y"), b"z").unwrap();

        let scheduler = DeleteScheduler::spawn(Duration::from_millis(10)).unwrap();
        scheduler.schedule(root.clone());

        assert!(wait_for(|| !root.exists()));
        assert!(wait_for(|| scheduler.pending() == 0));
        scheduler.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn test_scheduler_retries_until_success() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        let root = locked.join("victim");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("f"), b"z").unwrap();

        // Removing entries of a read-only directory fails until it is unlocked.
        std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o555)).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();
        if std::fs::write(root.join("check"), b"").is_ok() {
            // Permissions are not enforced for this user; nothing to test.
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let scheduler = DeleteScheduler::spawn(Duration::from_millis(20)).unwrap();
        scheduler.schedule(root.clone());
        assert!(!scheduler.drain(Duration::from_millis(100)));
        assert!(root.exists());
        assert_eq!(scheduler.pending(), 1);

        std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(scheduler.drain(Duration::from_secs(5)));
        assert!(!root.exists());
        scheduler.shutdown();
    }

    #[test]
    fn test_drain_with_nothing_pending() {
        let scheduler = DeleteScheduler::spawn(Duration::from_millis(10)).unwrap();
        assert!(scheduler.drain(Duration::ZERO));
        scheduler.shutdown();
    }
}
