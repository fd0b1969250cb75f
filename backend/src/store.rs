//! Shared document store: a JSON tree addressed by `/`-separated paths, with
//! point reads, full writes, child merges and change subscriptions.
//!
//! [`MemoryStore`] is the in-process implementation. It can mirror its
//! document to a JSON file, or keep it under a single key of a
//! [`LocalCache`] when there is no shared backend at all.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};

use crate::cache::LocalCache;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store path {0:?}")]
    InvalidPath(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the same write may succeed if the user tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses `a/b/c`. Leading, trailing and doubled slashes are ignored.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.chars().any(|c| matches!(c, '.' | '#' | '$' | '[' | ']')) {
                    Err(StoreError::InvalidPath(raw.to_string()))
                } else {
                    Ok(s.to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }

    pub fn join(&self, other: &StorePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        let rel = Self::parse(segment)?;
        if rel.0.len() != 1 {
            return Err(StoreError::InvalidPath(segment.to_string()));
        }
        Ok(self.join(&rel))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True when one path is an ancestor of (or equal to) the other, i.e. a
    /// write at one can change the value seen at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        let shared = self.0.len().min(other.0.len());
        self.0[..shared] == other.0[..shared]
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Values at a path, starting with the current one. `None` means nothing is
/// stored there. Consecutive identical values are delivered once.
pub type Subscription = BoxStream<'static, Option<Value>>;

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Replaces the value at `path`. `None` or JSON null deletes it.
    async fn set(&self, path: &StorePath, value: Option<Value>) -> Result<(), StoreError>;

    /// Writes each named child of `path` without touching its siblings. Keys
    /// may be relative paths; null values delete. Applied atomically.
    async fn update(&self, path: &StorePath, children: Map<String, Value>)
        -> Result<(), StoreError>;

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError>;

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.set(path, None).await
    }
}

enum Backing {
    Memory,
    File(PathBuf),
    Device {
        cache: Arc<dyn LocalCache>,
        key: String,
    },
}

struct Inner {
    root: RwLock<Value>,
    changes: broadcast::Sender<StorePath>,
    backing: Backing,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_backing(Value::Null, Backing::Memory)
    }

    /// Loads the document from `path` if it exists and rewrites the file after
    /// every change.
    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let root = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(saved) => saved,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "ignoring unreadable store file");
                    Value::Null
                }
            },
            Err(_) => Value::Null,
        };
        Self::with_backing(root, Backing::File(path))
    }

    /// Store-less mode: the whole document lives under `key` in an on-device
    /// cache, so nothing is shared beyond this device.
    pub fn on_device(cache: Arc<dyn LocalCache>, key: impl Into<String>) -> Self {
        let key = key.into();
        let root = cache
            .get(&key)
            .and_then(|raw| match serde_json::from_str::<Value>(&raw) {
                Ok(saved) => Some(saved),
                Err(err) => {
                    tracing::warn!(%key, %err, "ignoring unreadable cached document");
                    None
                }
            })
            .unwrap_or(Value::Null);
        Self::with_backing(root, Backing::Device { cache, key })
    }

    fn with_backing(root: Value, backing: Backing) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                root: RwLock::new(root),
                changes,
                backing,
            }),
        }
    }

    /// Copy of the whole document.
    pub async fn snapshot(&self) -> Value {
        self.inner.root.read().await.clone()
    }

    async fn read_at(&self, path: &StorePath) -> Option<Value> {
        let root = self.inner.root.read().await;
        lookup(&root, path.segments()).cloned()
    }

    async fn persist(&self, root: &Value) {
        match &self.inner.backing {
            Backing::Memory => {}
            Backing::File(path) => match serde_json::to_vec_pretty(root) {
                Ok(json) => {
                    if let Err(err) = tokio::fs::write(path, json).await {
                        tracing::warn!(path = %path.display(), %err, "failed to persist store");
                    }
                }
                Err(err) => tracing::warn!(%err, "failed to encode store"),
            },
            Backing::Device { cache, key } => match serde_json::to_string(root) {
                Ok(json) => cache.set(key, &json),
                Err(err) => tracing::warn!(%err, "failed to encode store"),
            },
        }
    }

    fn notify(&self, path: StorePath) {
        // No receivers is fine.
        let _ = self.inner.changes.send(path);
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        Ok(self.read_at(path).await)
    }

    async fn set(&self, path: &StorePath, value: Option<Value>) -> Result<(), StoreError> {
        let mut root = self.inner.root.write().await;
        write_at(&mut root, path.segments(), value);
        self.persist(&root).await;
        drop(root);

        tracing::debug!(%path, "set");
        self.notify(path.clone());
        Ok(())
    }

    async fn update(
        &self,
        path: &StorePath,
        children: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut writes = Vec::with_capacity(children.len());
        for (key, value) in children {
            let rel = StorePath::parse(&key)?;
            if rel.is_root() {
                return Err(StoreError::InvalidPath(key));
            }
            writes.push((path.join(&rel), value));
        }
        if writes.is_empty() {
            return Ok(());
        }

        let mut root = self.inner.root.write().await;
        for (target, value) in writes {
            write_at(&mut root, target.segments(), Some(value));
        }
        self.persist(&root).await;
        drop(root);

        tracing::debug!(%path, "update");
        self.notify(path.clone());
        Ok(())
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError> {
        // Subscribe before the first read so no change slips in between.
        let watch = Watch {
            rx: self.inner.changes.subscribe(),
            store: self.clone(),
            path: path.clone(),
            last: None,
        };

        let updates = stream::unfold(watch, |mut watch| async move {
            loop {
                if watch.last.is_some() {
                    match watch.rx.recv().await {
                        Ok(changed) if !changed.overlaps(&watch.path) => continue,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => return None,
                    }
                }
                let current = watch.store.read_at(&watch.path).await;
                if watch.last.as_ref() == Some(&current) {
                    continue;
                }
                watch.last = Some(current.clone());
                return Some((current, watch));
            }
        });
        Ok(updates.boxed())
    }
}

struct Watch {
    rx: broadcast::Receiver<StorePath>,
    store: MemoryStore,
    path: StorePath,
    last: Option<Option<Value>>,
}

fn is_vacant(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(|m| m.is_empty())
}

fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.get(segment.as_str()))
        .filter(|v| !is_vacant(v))
}

/// Writes `value` below `node`, creating objects on the way down and pruning
/// any that end up empty.
fn write_at(node: &mut Value, segments: &[String], value: Option<Value>) {
    let value = value.filter(|v| !is_vacant(v));
    let Some((head, rest)) = segments.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        write_at(child, rest, value);
        if is_vacant(child) {
            map.remove(head);
        }
    }
}
