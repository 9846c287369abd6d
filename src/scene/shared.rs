//! Bounded cache of already-open scene files.
//!
//! Linked scenes frequently reference the same target file from many
//! locations; opening it once per process-lifetime-bounded slot avoids
//! repeated index loads. The cache is an explicit, injectable object held
//! by the top-level session, not hidden global state. Evicting an entry
//! never invalidates a reader someone still holds: handles are
//! reference-counted past eviction from the lookup table.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use super::reader::SceneReader;
use crate::util::Result;

/// Filename-keyed cache of open root [`SceneReader`]s, evicting the
/// oldest insertion on overflow.
pub struct SceneFileCache {
    max_entries: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    order: VecDeque<String>,
    map: HashMap<String, SceneReader>,
}

impl SceneFileCache {
    /// Cache holding at most `max_entries` open files.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Fetch the root reader for `path`, opening the file on a miss.
    pub fn get(&self, path: &str) -> Result<SceneReader> {
        {
            let inner = self.inner.lock();
            if let Some(reader) = inner.map.get(path) {
                return Ok(reader.clone());
            }
        }
        // Open outside the lock; a racing open of the same file wastes one
        // handle but never deadlocks.
        let reader = SceneReader::open(path)?;
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.map.get(path) {
            return Ok(existing.clone());
        }
        inner.order.push_back(path.to_string());
        inner.map.insert(path.to_string(), reader.clone());
        while inner.map.len() > self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
                debug!(file = %oldest, "evicted scene file from shared cache");
            }
        }
        Ok(reader)
    }

    /// Drop one entry from the lookup table.
    pub fn evict(&self, path: &str) {
        let mut inner = self.inner.lock();
        inner.map.remove(path);
        inner.order.retain(|p| p != path);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Number of files currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SceneFileCache {
    fn default() -> Self {
        Self::new(16)
    }
}
