//! Realtime key-path store.
//!
//! The store holds one JSON tree. Clients write by path and subscribers
//! receive the whole tree after every change, never a diff.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{
    broadcast::{
        self,
        error::{RecvError, TryRecvError},
    },
    Mutex,
};
use tracing::{debug, warn};

use super::storage::StorageService;

const FANOUT_CAPACITY: usize = 64;

pub type Tree = Arc<Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("remote store error: {0}")]
    Remote(String),
}

/// Slash separated key path. The empty path addresses the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let segments = trimmed
            .split('/')
            .map(|segment| {
                if segment.is_empty()
                    || segment
                        .chars()
                        .any(|ch| matches!(ch, '.' | '#' | '$' | '[' | ']') || ch.is_control())
                {
                    Err(StoreError::InvalidPath(raw.to_string()))
                } else {
                    Ok(segment.to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for StorePath {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Write half of the store. Writing `null` is the same as removing.
#[async_trait]
pub trait StoreWriter: Send + Sync {
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Applies every entry as one change: subscribers observe all of them
    /// or none. `None` removes the path.
    async fn update(&self, entries: Vec<(String, Option<Value>)>) -> Result<(), StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.update(vec![(path.to_string(), None)]).await
    }
}

#[async_trait]
pub trait RealtimeStore: StoreWriter {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn subscribe(&self) -> Subscription;
}

/// Stream of full trees: the current one first, then one per change.
pub struct Subscription {
    initial: Option<Tree>,
    rx: broadcast::Receiver<Tree>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Tree> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.rx.recv().await {
                Ok(tree) => return Some(tree),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, jumping to newest tree");
                    let mut newest = None;
                    loop {
                        match self.rx.try_recv() {
                            Ok(tree) => newest = Some(tree),
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                        }
                    }
                    if newest.is_some() {
                        return newest;
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process store. Writes are serialised in arrival order and the last
/// one wins; when a [`StorageService`] is attached every change is
/// persisted before it becomes visible.
#[derive(Clone)]
pub struct TreeStore {
    inner: Arc<Inner>,
}

struct Inner {
    tree: Mutex<Tree>,
    tx: broadcast::Sender<Tree>,
    storage: Option<StorageService>,
}

impl TreeStore {
    pub fn in_memory() -> Self {
        Self::with_tree(Value::Null, None)
    }

    pub async fn open(storage: StorageService) -> Result<Self, StoreError> {
        let tree = storage.load_tree().await?;
        Ok(Self::with_tree(tree, Some(storage)))
    }

    fn with_tree(tree: Value, storage: Option<StorageService>) -> Self {
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(Arc::new(tree)),
                tx,
                storage,
            }),
        }
    }

    pub async fn snapshot(&self) -> Tree {
        self.inner.tree.lock().await.clone()
    }

    async fn apply(&self, writes: Vec<(StorePath, Option<Value>)>) -> Result<(), StoreError> {
        let mut current = self.inner.tree.lock().await;
        let mut next = (**current).clone();
        for (path, value) in &writes {
            write_at(&mut next, path, value.clone());
        }
        if next == **current {
            debug!("write left the tree unchanged");
            return Ok(());
        }
        if let Some(storage) = &self.inner.storage {
            storage.persist_change(&current, &next, &writes).await?;
        }
        let next = Arc::new(next);
        *current = next.clone();
        // No receivers is fine: nobody is listening yet.
        let _ = self.inner.tx.send(next);
        Ok(())
    }
}

#[async_trait]
impl StoreWriter for TreeStore {
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let path = StorePath::parse(path)?;
        self.apply(vec![(path, Some(value))]).await
    }

    async fn update(&self, entries: Vec<(String, Option<Value>)>) -> Result<(), StoreError> {
        let writes = entries
            .into_iter()
            .map(|(path, value)| Ok((StorePath::parse(&path)?, value)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        self.apply(writes).await
    }
}

#[async_trait]
impl RealtimeStore for TreeStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let path = StorePath::parse(path)?;
        let tree = self.snapshot().await;
        Ok(read_at(&tree, &path).cloned())
    }

    async fn subscribe(&self) -> Subscription {
        let current = self.inner.tree.lock().await;
        Subscription {
            initial: Some(current.clone()),
            rx: self.inner.tx.subscribe(),
        }
    }
}

pub fn read_at<'a>(tree: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = tree;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    if is_empty(node) {
        None
    } else {
        Some(node)
    }
}

/// Writes `value` at `path`, removing on `None`/`null` and pruning every
/// object left empty.
pub fn write_at(tree: &mut Value, path: &StorePath, value: Option<Value>) {
    match value.map(pruned) {
        None | Some(Value::Null) => remove_at(tree, path.segments()),
        Some(value) => insert_at(tree, path.segments(), value),
    }
    if is_empty(tree) {
        *tree = Value::Null;
    }
}

fn insert_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.clone()).or_insert(Value::Null);
        insert_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    if let Value::Object(map) = node {
        if let Some(child) = map.get_mut(first) {
            remove_at(child, rest);
            if is_empty(child) {
                map.remove(first);
            }
        }
    }
}

fn pruned(mut value: Value) -> Value {
    prune(&mut value);
    value
}

fn prune(value: &mut Value) {
    if let Value::Object(map) = value {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, child| !is_empty(child));
        if map.is_empty() {
            *value = Value::Null;
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
