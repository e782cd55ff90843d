use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{GroveError, Result};
use crate::hash::Hash;
use crate::inodes::inode::{DirEntry, FileInode, Inode, InodeKind, InodePtr, TreeInode};
use crate::inodes::refs::RefTracker;
use crate::inodes::types::{InodeMetadata, InodeNumber, InodeTimestamps, InodeType};
use crate::path::validate_component;
use crate::store::{BackingStore, Tree};

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<Inode>>>>;

/// Attributes given to inodes loaded from the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadDefaults {
    pub uid: u32,
    pub gid: u32,
    /// Every timestamp of a freshly loaded inode.
    pub timestamp: SystemTime,
}

/// Identity of an inode the kernel still references but which is not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadedInode {
    pub parent: InodeNumber,
    pub name: String,
    pub fuse_refcount: u64,
}

/// What survives an unload so a reload looks identical.
#[derive(Debug, Clone)]
struct SavedState {
    metadata: InodeMetadata,
    children: HashMap<String, InodeNumber>,
}

#[derive(Default)]
struct MapState {
    loaded: HashMap<InodeNumber, Arc<Inode>>,
    unloaded: HashMap<InodeNumber, UnloadedInode>,
    saved: HashMap<InodeNumber, SavedState>,
    /// In-flight loads, tagged with a load id so a waiter can tell whether
    /// the entry it finds is still its own load.
    loading: HashMap<InodeNumber, (u64, LoadFuture)>,
    next_load_id: u64,
}

/// Maps inode numbers to live inodes.
///
/// Loaded inodes are owned here; callers get counted [`InodePtr`]s. Loads of
/// the same inode number are deduplicated: concurrent callers await one
/// shared future.
///
/// Lock order: a directory's child map may be held while taking the map
/// lock, never the reverse.
pub struct InodeMap {
    state: Mutex<MapState>,
    next_ino: AtomicU64,
    defaults: Mutex<LoadDefaults>,
    store: Arc<dyn BackingStore>,
    tracker: Arc<RefTracker>,
}

impl InodeMap {
    pub fn new(store: Arc<dyn BackingStore>, tracker: Arc<RefTracker>, defaults: LoadDefaults) -> Self {
        InodeMap {
            state: Mutex::new(MapState::default()),
            next_ino: AtomicU64::new(InodeNumber::ROOT.get() + 1),
            defaults: Mutex::new(defaults),
            store,
            tracker,
        }
    }

    pub fn allocate_ino(&self) -> InodeNumber {
        InodeNumber::new(self.next_ino.fetch_add(1, Ordering::Relaxed))
    }

    pub fn defaults(&self) -> LoadDefaults {
        *self.defaults.lock()
    }

    pub fn set_defaults(&self, defaults: LoadDefaults) {
        *self.defaults.lock() = defaults;
    }

    fn ptr(&self, inode: &Arc<Inode>) -> InodePtr {
        InodePtr::new(Arc::clone(inode), Arc::clone(&self.tracker))
    }

    /// Install the root directory built from `tree`, replacing any previous
    /// contents of the map.
    pub fn initialize_root(&self, tree: &Tree) -> InodePtr {
        let defaults = self.defaults();
        let root = Arc::new(Inode::new(
            InodeNumber::ROOT,
            None,
            String::new(),
            InodeMetadata {
                mode: 0o755,
                uid: defaults.uid,
                gid: defaults.gid,
                timestamps: InodeTimestamps::all(defaults.timestamp),
            },
            InodeKind::Tree(TreeInode::from_tree(tree, None)),
        ));
        let mut state = self.state.lock();
        *state = MapState::default();
        state.loaded.insert(InodeNumber::ROOT, Arc::clone(&root));
        self.ptr(&root)
    }

    pub fn root(&self) -> Result<InodePtr> {
        self.lookup_loaded(InodeNumber::ROOT)
            .ok_or_else(|| GroveError::InvalidState("mount has no root inode".to_string()))
    }

    pub fn lookup_loaded(&self, ino: InodeNumber) -> Option<InodePtr> {
        let state = self.state.lock();
        state.loaded.get(&ino).map(|inode| self.ptr(inode))
    }

    pub fn is_loaded(&self, ino: InodeNumber) -> bool {
        self.state.lock().loaded.contains_key(&ino)
    }

    pub fn unloaded_record(&self, ino: InodeNumber) -> Option<UnloadedInode> {
        self.state.lock().unloaded.get(&ino).cloned()
    }

    pub fn loaded_count(&self) -> usize {
        self.state.lock().loaded.len()
    }

    /// Load (or find) the child `name` of the directory `parent`.
    pub async fn get_child(&self, parent: &InodePtr, name: &str) -> Result<InodePtr> {
        let tree = parent
            .as_tree()
            .ok_or_else(|| GroveError::NotADirectory(self.display_path(parent.ino())))?;

        loop {
            let (ino, entry) = {
                let mut contents = tree.lock();
                let entry = contents.entries.get_mut(name).ok_or_else(|| {
                    GroveError::NotFound(self.display_child_path(parent.ino(), name))
                })?;
                let ino = *entry.ino.get_or_insert_with(|| self.allocate_ino());
                (ino, entry.clone())
            };

            let (load_id, future) = {
                let mut state = self.state.lock();
                if let Some(inode) = state.loaded.get(&ino) {
                    return Ok(self.ptr(inode));
                }
                let in_flight = state
                    .loading
                    .get(&ino)
                    .map(|(id, future)| (*id, future.clone()));
                match in_flight {
                    Some(load) => load,
                    None => {
                        let source = entry.source.ok_or_else(|| {
                            GroveError::Store(format!(
                                "inode {} ({}) is not loaded and has no backing object",
                                ino, name
                            ))
                        })?;
                        let saved = state.saved.get(&ino).cloned();
                        let future = self.load_future(ino, parent.ino(), name, &entry, source, saved);
                        let id = state.next_load_id;
                        state.next_load_id += 1;
                        state.loading.insert(ino, (id, future.clone()));
                        (id, future)
                    }
                }
            };

            if let Some(inode) = self.finish_load(ino, load_id, future.await)? {
                return Ok(inode);
            }
            // Unloaded again before this waiter saw it; start over.
            tracing::debug!("inode {} was unloaded during load, retrying", ino);
        }
    }

    /// Record the outcome of load `load_id`. The first waiter to get here
    /// moves the inode into the loaded map; later waiters pick up whatever
    /// is loaded now, which is `None` if the inode was unloaded meanwhile.
    ///
    /// Owner and timestamps are settled here, under the map lock, so a
    /// metadata change that raced the backing store fetch is not lost.
    fn finish_load(
        &self,
        ino: InodeNumber,
        load_id: u64,
        result: Result<Arc<Inode>>,
    ) -> Result<Option<InodePtr>> {
        let mut state = self.state.lock();
        let first = state
            .loading
            .get(&ino)
            .is_some_and(|(id, _)| *id == load_id);
        if first {
            state.loading.remove(&ino);
        }
        let inode = result?;
        if first {
            let metadata = match state.saved.remove(&ino) {
                Some(saved) => saved.metadata,
                None => {
                    let defaults = self.defaults();
                    InodeMetadata {
                        mode: inode.metadata().mode,
                        uid: defaults.uid,
                        gid: defaults.gid,
                        timestamps: InodeTimestamps::all(defaults.timestamp),
                    }
                }
            };
            inode.update_metadata(|current| *current = metadata);
            if let Some(record) = state.unloaded.remove(&ino) {
                inode.set_fuse_refcount(record.fuse_refcount);
            }
            state.loaded.insert(ino, Arc::clone(&inode));
            return Ok(Some(self.ptr(&inode)));
        }
        Ok(state.loaded.get(&ino).map(|current| self.ptr(current)))
    }

    fn load_future(
        &self,
        ino: InodeNumber,
        parent: InodeNumber,
        name: &str,
        entry: &DirEntry,
        source: Hash,
        saved: Option<SavedState>,
    ) -> LoadFuture {
        let store = Arc::clone(&self.store);
        let name = name.to_string();
        let kind = entry.kind;
        // Provisional until finish_load; only the mode is final.
        let metadata = match &saved {
            Some(saved) => saved.metadata,
            None => InodeMetadata {
                mode: entry.mode,
                uid: 0,
                gid: 0,
                timestamps: InodeTimestamps::all(SystemTime::UNIX_EPOCH),
            },
        };

        async move {
            let contents = match kind {
                InodeType::Directory => {
                    let tree = store.get_tree(&source).await?;
                    InodeKind::Tree(TreeInode::from_tree(
                        &tree,
                        saved.as_ref().map(|s| &s.children),
                    ))
                }
                InodeType::File => InodeKind::File(FileInode::backed(source)),
                InodeType::Symlink => InodeKind::Symlink(FileInode::backed(source)),
            };
            tracing::debug!("loaded inode {} ({:?} {})", ino, kind, name);
            Ok(Arc::new(Inode::new(ino, Some(parent), name, metadata, contents)))
        }
        .boxed()
        .shared()
    }

    /// Create a new, locally materialized child of `parent`.
    ///
    /// The name check and insert happen under the directory's lock, so of
    /// several concurrent creators of one name exactly one succeeds and the
    /// rest see `AlreadyExists`.
    pub fn create_child(
        &self,
        parent: &InodePtr,
        name: &str,
        metadata: InodeMetadata,
        kind: InodeKind,
    ) -> Result<InodePtr> {
        validate_component(name)?;
        let tree = parent
            .as_tree()
            .ok_or_else(|| GroveError::NotADirectory(self.display_path(parent.ino())))?;

        let mut contents = tree.lock();
        if contents.entries.contains_key(name) {
            return Err(GroveError::AlreadyExists(
                self.display_child_path(parent.ino(), name),
            ));
        }

        let ino = self.allocate_ino();
        let inode = Arc::new(Inode::new(
            ino,
            Some(parent.ino()),
            name.to_string(),
            metadata,
            kind,
        ));
        contents.entries.insert(
            name.to_string(),
            DirEntry {
                ino: Some(ino),
                kind: inode.inode_type(),
                mode: metadata.mode,
                source: None,
            },
        );
        contents.materialized = true;

        let mut state = self.state.lock();
        state.loaded.insert(ino, Arc::clone(&inode));
        tracing::debug!("created inode {} ({:?} {})", ino, inode.inode_type(), name);
        Ok(self.ptr(&inode))
    }

    /// Find an inode by number, reloading it through its ancestors if it was
    /// unloaded while the kernel still referenced it.
    pub async fn lookup_inode(&self, ino: InodeNumber) -> Result<InodePtr> {
        loop {
            enum Step {
                Walk(InodePtr, Vec<String>),
                Wait(InodeNumber, u64, LoadFuture),
            }

            let step = {
                let state = self.state.lock();
                let mut names = Vec::new();
                let mut current = ino;
                loop {
                    if let Some(inode) = state.loaded.get(&current) {
                        break Step::Walk(self.ptr(inode), names);
                    }
                    if let Some(record) = state.unloaded.get(&current) {
                        names.push(record.name.clone());
                        current = record.parent;
                        continue;
                    }
                    if let Some((id, future)) = state.loading.get(&current) {
                        break Step::Wait(current, *id, future.clone());
                    }
                    return Err(GroveError::InvalidArgument(format!(
                        "unknown inode number {}",
                        ino
                    )));
                }
            };

            match step {
                Step::Wait(loading, load_id, future) => {
                    self.finish_load(loading, load_id, future.await)?;
                }
                Step::Walk(ancestor, names) => {
                    let mut current = ancestor;
                    for name in names.iter().rev() {
                        current = self.get_child(&current, name).await?;
                    }
                    if current.ino() != ino {
                        return Err(GroveError::NotFound(format!("inode {}", ino)));
                    }
                    return Ok(current);
                }
            }
        }
    }

    /// Adjust the kernel reference count of a loaded or unloaded inode.
    /// Returns the remaining count.
    pub fn dec_fuse_refcount(&self, ino: InodeNumber, count: u64) -> u64 {
        let mut state = self.state.lock();
        if let Some(inode) = state.loaded.get(&ino) {
            return inode.dec_fuse_refcount(count);
        }
        let remaining = match state.unloaded.get_mut(&ino) {
            Some(record) => {
                record.fuse_refcount = record.fuse_refcount.saturating_sub(count);
                record.fuse_refcount
            }
            None => {
                tracing::warn!("forget for unknown inode {}", ino);
                return 0;
            }
        };
        if remaining == 0 {
            let referenced = state.unloaded.values().any(|r| r.parent == ino);
            if !referenced {
                state.unloaded.remove(&ino);
                tracing::debug!("forgot unloaded inode {}", ino);
            }
        }
        remaining
    }

    /// Unload every eligible descendant of `parent`, deepest first.
    ///
    /// An inode is eligible when no pointers to it exist, it is not
    /// materialized, and none of its children are loaded. Returns how many
    /// inodes were unloaded.
    pub fn unload_children_now(&self, parent: &InodePtr) -> usize {
        let mut order = Vec::new();
        self.collect_descendants(parent.arc(), &mut order);
        let unloaded = order.iter().filter(|inode| self.try_unload(inode)).count();
        if unloaded > 0 {
            tracing::debug!(
                "unloaded {} of {} inodes under {}",
                unloaded,
                order.len(),
                parent.ino()
            );
        }
        unloaded
    }

    fn collect_descendants(&self, inode: &Arc<Inode>, out: &mut Vec<Arc<Inode>>) {
        let Some(tree) = inode.as_tree() else {
            return;
        };
        let children: Vec<InodeNumber> = tree.lock().entries.values().filter_map(|e| e.ino).collect();
        for ino in children {
            let child = self.state.lock().loaded.get(&ino).cloned();
            if let Some(child) = child {
                self.collect_descendants(&child, out);
                out.push(child);
            }
        }
    }

    fn try_unload(&self, inode: &Arc<Inode>) -> bool {
        let ino = inode.ino();
        let Some(parent) = inode.parent() else {
            return false;
        };

        let tree_guard = inode.as_tree().map(|tree| tree.lock());
        let materialized = match &tree_guard {
            Some(contents) => contents.materialized,
            None => inode.is_materialized(),
        };
        if materialized {
            return false;
        }
        let children: HashMap<String, InodeNumber> = tree_guard
            .as_ref()
            .map(|contents| {
                contents
                    .entries
                    .iter()
                    .filter_map(|(name, entry)| entry.ino.map(|ino| (name.clone(), ino)))
                    .collect()
            })
            .unwrap_or_default();

        let mut state = self.state.lock();
        if inode.ptr_count() > 0 {
            return false;
        }
        if children
            .values()
            .any(|c| state.loaded.contains_key(c) || state.loading.contains_key(c))
        {
            return false;
        }
        match state.loaded.get(&ino) {
            Some(current) if Arc::ptr_eq(current, inode) => {}
            _ => return false,
        }

        state.loaded.remove(&ino);
        let fuse_refcount = inode.fuse_refcount();
        let child_records = children.values().any(|c| state.unloaded.contains_key(c));
        if fuse_refcount > 0 || child_records {
            state.unloaded.insert(
                ino,
                UnloadedInode {
                    parent,
                    name: inode.name().to_string(),
                    fuse_refcount,
                },
            );
        }
        state.saved.insert(
            ino,
            SavedState {
                metadata: inode.metadata(),
                children,
            },
        );
        tracing::debug!("unloaded inode {} ({})", ino, inode.name());
        true
    }

    /// Apply `f` to the metadata of every loaded inode and every saved
    /// unloaded inode.
    pub fn update_all_metadata(&self, f: impl Fn(&mut InodeMetadata)) {
        let mut state = self.state.lock();
        for inode in state.loaded.values() {
            inode.update_metadata(&f);
        }
        for saved in state.saved.values_mut() {
            f(&mut saved.metadata);
        }
    }

    /// Every inode number, loaded or not, the kernel currently references.
    pub fn referenced_inodes(&self) -> Vec<InodeNumber> {
        let state = self.state.lock();
        let mut inos: Vec<InodeNumber> = state
            .loaded
            .values()
            .filter(|inode| inode.fuse_refcount() > 0)
            .map(|inode| inode.ino())
            .chain(
                state
                    .unloaded
                    .iter()
                    .filter(|(_, record)| record.fuse_refcount > 0)
                    .map(|(ino, _)| *ino),
            )
            .collect();
        inos.sort();
        inos
    }

    /// Mount-relative path components of a loaded or unloaded inode.
    pub fn path_of(&self, ino: InodeNumber) -> Option<Vec<String>> {
        let state = self.state.lock();
        let mut components = Vec::new();
        let mut current = ino;
        while current != InodeNumber::ROOT {
            let (parent, name) = match state.loaded.get(&current) {
                Some(inode) => (inode.parent()?, inode.name().to_string()),
                None => {
                    let record = state.unloaded.get(&current)?;
                    (record.parent, record.name.clone())
                }
            };
            components.push(name);
            current = parent;
        }
        components.reverse();
        Some(components)
    }

    fn display_path(&self, ino: InodeNumber) -> String {
        self.path_of(ino)
            .map(|c| c.join("/"))
            .unwrap_or_else(|| format!("<inode {}>", ino))
    }

    fn display_child_path(&self, parent: InodeNumber, name: &str) -> String {
        let parent = self.display_path(parent);
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent, name)
        }
    }

    /// Drop every loaded inode. Used once the mount has shut down.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let loaded = state.loaded.len();
        *state = MapState::default();
        drop(state);
        tracing::debug!("cleared inode map ({} loaded inodes)", loaded);
    }
}
