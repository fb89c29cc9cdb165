//! Open-handle registry for leak diagnostics.
//!
//! Handles that must be closed explicitly (mount handles) register here when
//! created and deregister when closed. A handle dropped while still open is
//! reported with its creation context. Reports are diagnostics only: the
//! dropped handle still closes itself.

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Where a tracked handle came from.
#[derive(Debug)]
struct Origin {
    kind: &'static str,
    description: String,
    backtrace: Backtrace,
}

/// Snapshot of one open handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenHandle {
    /// Registry id.
    pub id: u64,
    /// Handle kind, e.g. `"mount"`.
    pub kind: &'static str,
    /// Human-readable identity, e.g. the mount point.
    pub description: String,
}

/// Ticket returned by [`LeakRegistry::register`].
#[derive(Debug)]
pub struct LeakToken {
    id: u64,
}

/// Debug registry of open handles.
#[derive(Debug)]
pub struct LeakRegistry {
    enabled: bool,
    next_id: AtomicU64,
    open: DashMap<u64, Origin>,
    leaked: AtomicU64,
}

impl Default for LeakRegistry {
    fn default() -> Self {
        Self::new(cfg!(debug_assertions))
    }
}

impl LeakRegistry {
    /// Create a registry. When disabled, registration is a no-op but leaked
    /// drops are still counted and logged.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(1),
            open: DashMap::new(),
            leaked: AtomicU64::new(0),
        }
    }

    /// Whether creation contexts are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a newly opened handle.
    pub fn register(&self, kind: &'static str, description: impl Into<String>) -> Option<LeakToken> {
        if !self.enabled {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open.insert(
            id,
            Origin {
                kind,
                description: description.into(),
                backtrace: Backtrace::capture(),
            },
        );
        Some(LeakToken { id })
    }

    /// Forget a handle that was closed properly.
    pub fn release(&self, token: Option<LeakToken>) {
        if let Some(token) = token {
            self.open.remove(&token.id);
        }
    }

    /// Report a handle dropped without being closed.
    pub fn report(&self, token: Option<LeakToken>, kind: &'static str, description: &str) {
        self.leaked.fetch_add(1, Ordering::Relaxed);
        match token.and_then(|t| self.open.remove(&t.id)) {
            Some((_, origin)) => {
                tracing::warn!(
                    "{} leaked: {} was dropped without close; created at:\n{}",
                    origin.kind,
                    origin.description,
                    origin.backtrace
                );
            }
            None => {
                tracing::warn!("{} leaked: {} was dropped without close", kind, description);
            }
        }
    }

    /// Handles currently open, ordered by creation.
    pub fn open_handles(&self) -> Vec<OpenHandle> {
        let mut handles: Vec<OpenHandle> = self
            .open
            .iter()
            .map(|entry| OpenHandle {
                id: *entry.key(),
                kind: entry.value().kind,
                description: entry.value().description.clone(),
            })
            .collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    /// Number of handles reported as leaked so far.
    pub fn leaked_count(&self) -> u64 {
        self.leaked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_release() {
        let registry = LeakRegistry::new(true);
        let token = registry.register("mount", "/app");
        assert_eq!(registry.open_handles().len(), 1);
        assert_eq!(registry.open_handles()[0].description, "/app");

        registry.release(token);
        assert!(registry.open_handles().is_empty());
        assert_eq!(registry.leaked_count(), 0);
    }

    #[test]
    fn test_report_leak() {
        let registry = LeakRegistry::new(true);
        let token = registry.register("mount", "/lib");
        registry.report(token, "mount", "/lib");
        assert!(registry.open_handles().is_empty());
        assert_eq!(registry.leaked_count(), 1);
    }

    #[test]
    fn test_disabled_still_counts() {
        let registry = LeakRegistry::new(false);
        let token = registry.register("mount", "/x");
        assert!(token.is_none());
        assert!(registry.open_handles().is_empty());

        registry.report(token, "mount", "/x");
        assert_eq!(registry.leaked_count(), 1);
    }
}
