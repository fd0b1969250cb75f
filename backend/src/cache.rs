//! On-device string cache: the optimistic reveal layer lives here, and in
//! store-less mode the whole game document does too.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

/// Synchronous string-keyed cache, the shape of browser local storage.
/// Writes are best effort; a failed write is logged by the implementation.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

impl<C: LocalCache + ?Sized> LocalCache for Arc<C> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }
}

/// Process-local cache. Clones share entries, which lets tests look inside a
/// session's cache.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, String>>,
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Cache kept in a JSON file of string values, rewritten on every change.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    entries: DashMap<String, String>,
}

impl FileCache {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = DashMap::new();
        if let Ok(bytes) = std::fs::read(&path) {
            match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(saved) => {
                    for (key, value) in saved {
                        entries.insert(key, value);
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "ignoring unreadable cache file");
                }
            }
        }
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) {
        let snapshot: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let result = serde_json::to_vec_pretty(&snapshot)
            .map_err(std::io::Error::from)
            .and_then(|json| std::fs::write(&self.path, json));
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), %err, "failed to write cache file");
        }
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush();
    }

    fn remove(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.flush();
        }
    }
}
