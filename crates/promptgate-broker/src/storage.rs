//! Shared-file persistence
//!
//! The quota ledger and the response cache are whole-file JSON documents
//! shared by every worker process on the machine. Each mutation is a
//! read-modify-write cycle run under an advisory lock on a sidecar file,
//! with the replacement written to a temp file and atomically renamed into
//! place. This shrinks (but does not eliminate) the cross-process race
//! window; see the crate docs for the remaining select/record race.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Storage seam for the ledger and cache.
///
/// Object-safe so a broker can be wired with disk stores in production and
/// in-memory stores in tests. A future single-owner IPC service would slot
/// in behind this same trait.
pub trait StateStore: Send + Sync {
    /// Current contents, or `None` when the document is missing or
    /// unreadable.
    fn read(&self) -> Option<String>;

    /// Run one read-modify-write cycle under the store's exclusive lock.
    ///
    /// `apply` receives the current contents and returns the replacement;
    /// returning `None` skips the write.
    fn update(&self, apply: &mut dyn FnMut(Option<&str>) -> Option<String>) -> Result<()>;
}

// ============================================================================
// Disk store
// ============================================================================

/// Whole-file JSON document on disk, locked via a `.lock` sidecar.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    /// Create a store for `path`. Nothing is touched on disk until the
    /// first read or update.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    /// Path of the underlying document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock_file(&self) -> std::io::Result<std::fs::File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
    }
}

impl StateStore for JsonFileStore {
    fn read(&self) -> Option<String> {
        // Shared lock so we never observe a half-renamed document; if the
        // lock cannot be taken, fall back to an unlocked read.
        let guard = self.open_lock_file().ok();
        if let Some(ref lock) = guard {
            let _ = lock.lock_shared();
        }
        let contents = fs::read_to_string(&self.path).ok();
        if let Some(lock) = guard {
            let _ = lock.unlock();
        }
        contents
    }

    fn update(&self, apply: &mut dyn FnMut(Option<&str>) -> Option<String>) -> Result<()> {
        let lock = self
            .open_lock_file()
            .map_err(|e| Error::Storage(format!("open lock {:?}: {}", self.lock_path, e)))?;
        lock.lock_exclusive()
            .map_err(|e| Error::Storage(format!("lock {:?}: {}", self.lock_path, e)))?;

        // Re-read under the lock: another process may have written since
        // the caller last looked.
        let current = fs::read_to_string(&self.path).ok();
        let result = match apply(current.as_deref()) {
            Some(next) => {
                let tmp_path = self.path.with_extension("json.tmp");
                fs::write(&tmp_path, &next)
                    .and_then(|()| fs::rename(&tmp_path, &self.path))
                    .map_err(|e| Error::Storage(format!("write {:?}: {}", self.path, e)))
            }
            None => Ok(()),
        };

        let _ = lock.unlock();
        result
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with `contents`.
    #[must_use]
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Some(contents.into())),
        }
    }
}

impl StateStore for MemoryStore {
    fn read(&self) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update(&self, apply: &mut dyn FnMut(Option<&str>) -> Option<String>) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = apply(guard.as_deref()) {
            *guard = Some(next);
        }
        Ok(())
    }
}

/// Log-and-continue wrapper for update failures: the persistence layer
/// never propagates errors to callers.
pub(crate) fn update_best_effort(
    store: &dyn StateStore,
    what: &str,
    apply: &mut dyn FnMut(Option<&str>) -> Option<String>,
) {
    if let Err(e) = store.update(apply) {
        warn!(store = what, error = %e, "state update failed, continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.read(), None);

        store
            .update(&mut |_| Some("{\"a\":1}".to_string()))
            .unwrap();
        assert_eq!(store.read().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn test_memory_store_skip_write() {
        let store = MemoryStore::with_contents("keep");
        store.update(&mut |_| None).unwrap();
        assert_eq!(store.read().as_deref(), Some("keep"));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.read(), None);

        store.update(&mut |_| Some("{}".to_string())).unwrap();
        assert_eq!(store.read().as_deref(), Some("{}"));
    }

    #[test]
    fn test_file_store_update_sees_current_contents() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.update(&mut |_| Some("first".to_string())).unwrap();

        let mut observed = None;
        store
            .update(&mut |cur| {
                observed = cur.map(str::to_string);
                Some("second".to_string())
            })
            .unwrap();
        assert_eq!(observed.as_deref(), Some("first"));
        assert_eq!(store.read().as_deref(), Some("second"));
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/state.json"));
        store.update(&mut |_| Some("x".to_string())).unwrap();
        assert_eq!(store.read().as_deref(), Some("x"));
    }

    #[test]
    fn test_file_store_no_tmp_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.update(&mut |_| Some("x".to_string())).unwrap();
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
