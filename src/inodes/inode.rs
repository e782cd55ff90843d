use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{GroveError, Result};
use crate::hash::Hash;
use crate::inodes::refs::RefTracker;
use crate::inodes::types::{InodeMetadata, InodeNumber, InodeType};
use crate::store::{BackingStore, Tree};

/// One name in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Assigned the first time the entry is referenced.
    pub ino: Option<InodeNumber>,
    pub kind: InodeType,
    /// Permission bits the child starts with when first loaded.
    pub mode: u32,
    /// Backing tree or blob id. `None` for locally created entries.
    pub source: Option<Hash>,
}

#[derive(Debug, Default)]
pub struct TreeContents {
    pub entries: BTreeMap<String, DirEntry>,
    /// Set once the directory differs from its backing tree.
    pub materialized: bool,
}

#[derive(Debug)]
pub struct TreeInode {
    contents: Mutex<TreeContents>,
}

impl TreeInode {
    pub(crate) fn from_tree(tree: &Tree, saved_children: Option<&HashMap<String, InodeNumber>>) -> Self {
        let entries = tree
            .entries
            .iter()
            .map(|entry| {
                let ino = saved_children.and_then(|c| c.get(&entry.name).copied());
                (
                    entry.name.clone(),
                    DirEntry {
                        ino,
                        kind: entry.kind.into(),
                        mode: entry.kind.initial_mode(),
                        source: Some(entry.id),
                    },
                )
            })
            .collect();
        TreeInode {
            contents: Mutex::new(TreeContents {
                entries,
                materialized: false,
            }),
        }
    }

    pub(crate) fn empty() -> Self {
        TreeInode {
            contents: Mutex::new(TreeContents {
                entries: BTreeMap::new(),
                materialized: true,
            }),
        }
    }

    /// Lock this directory's child map. Never hold the guard across an await.
    pub fn lock(&self) -> MutexGuard<'_, TreeContents> {
        self.contents.lock()
    }

    pub fn entry(&self, name: &str) -> Option<DirEntry> {
        self.contents.lock().entries.get(name).cloned()
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.contents.lock().entries.keys().cloned().collect()
    }
}

#[derive(Debug)]
enum FileState {
    /// Contents still live only in the backing store.
    Backed(Hash),
    Materialized(Vec<u8>),
}

/// Contents of a regular file or the target of a symlink.
#[derive(Debug)]
pub struct FileInode {
    state: Mutex<FileState>,
}

impl FileInode {
    pub(crate) fn backed(blob: Hash) -> Self {
        FileInode {
            state: Mutex::new(FileState::Backed(blob)),
        }
    }

    pub(crate) fn materialized(contents: Vec<u8>) -> Self {
        FileInode {
            state: Mutex::new(FileState::Materialized(contents)),
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(*self.state.lock(), FileState::Materialized(_))
    }

    /// Size if it is known without a backing store fetch.
    pub fn cached_size(&self) -> Option<u64> {
        match &*self.state.lock() {
            FileState::Materialized(data) => Some(data.len() as u64),
            FileState::Backed(_) => None,
        }
    }

    pub async fn read_all(&self, store: &dyn BackingStore) -> Result<Vec<u8>> {
        let blob_id = match &*self.state.lock() {
            FileState::Materialized(data) => return Ok(data.clone()),
            FileState::Backed(id) => *id,
        };
        let blob = store.get_blob(&blob_id).await?;
        Ok(blob.contents.clone())
    }

    /// Resize the file, materializing it first if needed.
    pub async fn truncate(&self, size: u64, store: &dyn BackingStore) -> Result<()> {
        let size = usize::try_from(size)
            .map_err(|_| GroveError::InvalidArgument(format!("size {} is too large", size)))?;
        loop {
            let blob_id = {
                let mut state = self.state.lock();
                match &mut *state {
                    FileState::Materialized(data) => {
                        data.resize(size, 0);
                        return Ok(());
                    }
                    FileState::Backed(id) => *id,
                }
            };
            let blob = store.get_blob(&blob_id).await?;
            let mut state = self.state.lock();
            // Only install the fetched contents if nobody materialized the
            // file while we were waiting.
            if matches!(&*state, FileState::Backed(id) if *id == blob_id) {
                let mut data = blob.contents.clone();
                data.resize(size, 0);
                *state = FileState::Materialized(data);
                return Ok(());
            }
        }
    }
}

#[derive(Debug)]
pub enum InodeKind {
    Tree(TreeInode),
    File(FileInode),
    Symlink(FileInode),
}

pub struct Inode {
    ino: InodeNumber,
    parent: Option<InodeNumber>,
    name: String,
    /// Outstanding kernel lookups not yet forgotten.
    fuse_refcount: AtomicU64,
    /// Live [`InodePtr`]s.
    ptr_count: AtomicUsize,
    metadata: Mutex<InodeMetadata>,
    kind: InodeKind,
}

impl Inode {
    pub(crate) fn new(
        ino: InodeNumber,
        parent: Option<InodeNumber>,
        name: String,
        metadata: InodeMetadata,
        kind: InodeKind,
    ) -> Self {
        Inode {
            ino,
            parent,
            name,
            fuse_refcount: AtomicU64::new(0),
            ptr_count: AtomicUsize::new(0),
            metadata: Mutex::new(metadata),
            kind,
        }
    }

    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    /// `None` only for the root.
    pub fn parent(&self) -> Option<InodeNumber> {
        self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &InodeKind {
        &self.kind
    }

    pub fn inode_type(&self) -> InodeType {
        match self.kind {
            InodeKind::Tree(_) => InodeType::Directory,
            InodeKind::File(_) => InodeType::File,
            InodeKind::Symlink(_) => InodeType::Symlink,
        }
    }

    pub fn as_tree(&self) -> Option<&TreeInode> {
        match &self.kind {
            InodeKind::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileInode> {
        match &self.kind {
            InodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&FileInode> {
        match &self.kind {
            InodeKind::Symlink(link) => Some(link),
            _ => None,
        }
    }

    pub fn is_materialized(&self) -> bool {
        match &self.kind {
            InodeKind::Tree(tree) => tree.lock().materialized,
            InodeKind::File(file) | InodeKind::Symlink(file) => file.is_materialized(),
        }
    }

    pub fn metadata(&self) -> InodeMetadata {
        *self.metadata.lock()
    }

    pub(crate) fn update_metadata<R>(&self, f: impl FnOnce(&mut InodeMetadata) -> R) -> R {
        f(&mut self.metadata.lock())
    }

    pub fn fuse_refcount(&self) -> u64 {
        self.fuse_refcount.load(Ordering::Acquire)
    }

    pub(crate) fn set_fuse_refcount(&self, count: u64) {
        self.fuse_refcount.store(count, Ordering::Release);
    }

    pub fn inc_fuse_refcount(&self) -> u64 {
        self.fuse_refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement by `count`, saturating at zero. Returns the new count.
    pub fn dec_fuse_refcount(&self, count: u64) -> u64 {
        let mut current = self.fuse_refcount.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(count);
            match self.fuse_refcount.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn ptr_count(&self) -> usize {
        self.ptr_count.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("name", &self.name)
            .field("type", &self.inode_type())
            .field("fuse_refcount", &self.fuse_refcount())
            .field("ptr_count", &self.ptr_count())
            .finish()
    }
}

/// Counted handle to a loaded inode.
///
/// While any pointer to an inode exists the inode stays loaded, and while
/// any pointer into a mount exists the mount cannot finish shutting down.
pub struct InodePtr {
    inode: Arc<Inode>,
    tracker: Arc<RefTracker>,
}

impl InodePtr {
    pub(crate) fn new(inode: Arc<Inode>, tracker: Arc<RefTracker>) -> Self {
        inode.ptr_count.fetch_add(1, Ordering::AcqRel);
        tracker.acquire();
        InodePtr { inode, tracker }
    }

    pub fn ptr_eq(&self, other: &InodePtr) -> bool {
        Arc::ptr_eq(&self.inode, &other.inode)
    }

    pub(crate) fn arc(&self) -> &Arc<Inode> {
        &self.inode
    }
}

impl Clone for InodePtr {
    fn clone(&self) -> Self {
        InodePtr::new(Arc::clone(&self.inode), Arc::clone(&self.tracker))
    }
}

impl Drop for InodePtr {
    fn drop(&mut self) {
        self.inode.ptr_count.fetch_sub(1, Ordering::AcqRel);
        self.tracker.release();
    }
}

impl Deref for InodePtr {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        &self.inode
    }
}

impl PartialEq for InodePtr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for InodePtr {}

impl fmt::Debug for InodePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inode, f)
    }
}
