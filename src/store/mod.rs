//! Backing store interface: the source of commit trees and file contents.

pub mod builder;
pub mod manifest;
pub mod memory;

pub use builder::TreeBuilder;
pub use manifest::Manifest;
pub use memory::MemoryBackingStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::hash::Hash;

/// Type of a tree entry as recorded in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Tree,
    Regular,
    Executable,
    Symlink,
}

impl EntryKind {
    /// Permission bits an inode of this kind starts with.
    pub fn initial_mode(self) -> u32 {
        match self {
            EntryKind::Tree | EntryKind::Executable => 0o755,
            EntryKind::Regular => 0o644,
            EntryKind::Symlink => 0o777,
        }
    }

    fn tag(self) -> u8 {
        match self {
            EntryKind::Tree => b'd',
            EntryKind::Regular => b'f',
            EntryKind::Executable => b'x',
            EntryKind::Symlink => b'l',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub id: Hash,
}

/// A directory listing. Entries are sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub id: Hash,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let mut serialized = Vec::new();
        for entry in &entries {
            serialized.push(entry.kind.tag());
            serialized.extend_from_slice(entry.name.as_bytes());
            serialized.push(0);
            serialized.extend_from_slice(entry.id.as_bytes());
        }
        Tree {
            id: Hash::of("tree", &serialized),
            entries,
        }
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// File or symlink contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: Hash,
    pub contents: Vec<u8>,
}

impl Blob {
    pub fn new(contents: impl Into<Vec<u8>>) -> Self {
        let contents = contents.into();
        Blob {
            id: Hash::of("blob", &contents),
            contents,
        }
    }
}

/// Source of commit trees and blobs.
///
/// Every call may be slow or wait on data that is not yet available; callers
/// must never block a thread on the result.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Resolve a commit to its root tree. Unknown commits fail with
    /// `CommitNotFound`.
    async fn get_root_tree(&self, commit: &Hash) -> Result<Arc<Tree>>;

    async fn get_tree(&self, id: &Hash) -> Result<Arc<Tree>>;

    async fn get_blob(&self, id: &Hash) -> Result<Arc<Blob>>;
}
