use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{GroveError, Result};
use crate::hash::Hash;
use crate::store::{BackingStore, Blob, Tree};

/// A stored object plus a readiness flag that gates every fetch of it.
struct Stored<T> {
    value: Arc<T>,
    ready: watch::Sender<bool>,
}

impl<T> Stored<T> {
    fn new(value: T, ready: bool) -> Self {
        let (tx, _) = watch::channel(ready);
        Stored {
            value: Arc::new(value),
            ready: tx,
        }
    }
}

/// In-process backing store.
///
/// Objects may be inserted "not ready": fetches of them stay pending until
/// the object is marked ready, which lets callers exercise the paths where
/// tree or file data arrives late.
#[derive(Default)]
pub struct MemoryBackingStore {
    commits: DashMap<Hash, Stored<Hash>>,
    trees: DashMap<Hash, Stored<Tree>>,
    blobs: DashMap<Hash, Stored<Blob>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_tree(&self, tree: Tree, ready: bool) -> Hash {
        let id = tree.id;
        insert_or_ready(&self.trees, id, tree, ready);
        id
    }

    pub fn put_blob(&self, blob: Blob, ready: bool) -> Hash {
        let id = blob.id;
        insert_or_ready(&self.blobs, id, blob, ready);
        id
    }

    /// Record `commit` as pointing at the root tree `root_tree`.
    pub fn put_commit(&self, commit: Hash, root_tree: Hash, ready: bool) {
        insert_or_ready(&self.commits, commit, root_tree, ready);
    }

    pub fn set_tree_ready(&self, id: &Hash) -> bool {
        mark_ready(&self.trees, id)
    }

    pub fn set_blob_ready(&self, id: &Hash) -> bool {
        mark_ready(&self.blobs, id)
    }

    pub fn set_commit_ready(&self, id: &Hash) -> bool {
        mark_ready(&self.commits, id)
    }

    pub fn set_all_ready(&self) {
        for entry in self.commits.iter() {
            entry.ready.send_replace(true);
        }
        for entry in self.trees.iter() {
            entry.ready.send_replace(true);
        }
        for entry in self.blobs.iter() {
            entry.ready.send_replace(true);
        }
    }

    pub fn has_commit(&self, commit: &Hash) -> bool {
        self.commits.contains_key(commit)
    }

    /// Root tree recorded for `commit`, ready or not.
    pub fn root_tree_of(&self, commit: &Hash) -> Option<Hash> {
        self.commits.get(commit).map(|entry| *entry.value)
    }
}

fn insert_or_ready<T>(map: &DashMap<Hash, Stored<T>>, id: Hash, value: T, ready: bool) {
    let entry = map.entry(id).or_insert_with(|| Stored::new(value, ready));
    if ready {
        entry.ready.send_replace(true);
    }
}

fn mark_ready<T>(map: &DashMap<Hash, Stored<T>>, id: &Hash) -> bool {
    match map.get(id) {
        Some(entry) => {
            entry.ready.send_replace(true);
            true
        }
        None => false,
    }
}

/// Wait until the object is ready and return it.
async fn fetch<T>(map: &DashMap<Hash, Stored<T>>, id: &Hash, kind: &str) -> Result<Arc<T>> {
    // The map guard must be released before awaiting.
    let (value, mut ready) = {
        let entry = map
            .get(id)
            .ok_or_else(|| GroveError::Store(format!("{} {} not found", kind, id)))?;
        (Arc::clone(&entry.value), entry.ready.subscribe())
    };

    if !*ready.borrow() {
        tracing::trace!("waiting for {} {} to become ready", kind, id);
    }
    ready
        .wait_for(|is_ready| *is_ready)
        .await
        .map_err(|_| GroveError::Store(format!("{} {} was dropped before it became ready", kind, id)))?;
    Ok(value)
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn get_root_tree(&self, commit: &Hash) -> Result<Arc<Tree>> {
        if !self.commits.contains_key(commit) {
            return Err(GroveError::CommitNotFound(*commit));
        }
        let root = fetch(&self.commits, commit, "commit").await?;
        self.get_tree(&root).await
    }

    async fn get_tree(&self, id: &Hash) -> Result<Arc<Tree>> {
        fetch(&self.trees, id, "tree").await
    }

    async fn get_blob(&self, id: &Hash) -> Result<Arc<Blob>> {
        fetch(&self.blobs, id, "blob").await
    }
}
