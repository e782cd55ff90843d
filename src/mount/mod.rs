//! The mount: one checkout projected as a filesystem.
//!
//! A [`Mount`] owns the inode map, the journal and the checkout's parent
//! commits, and drives the lifecycle from initialization through kernel
//! attach to shutdown and destruction. External owners hold it through a
//! [`MountHandle`]; dropping the last handle starts destruction.

mod attrs;
mod dirs;
mod lifecycle;
mod parents;
mod symlink;

pub use lifecycle::ShutdownResult;

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::config::{CheckoutConfig, ParentCommits};
use crate::error::{GroveError, Result};
use crate::hash::Hash;
use crate::inodes::{InodeMap, InodeNumber, InodePtr, LoadDefaults, RefTracker};
use crate::journal::Journal;
use crate::path::{join_components, split_relative};
use crate::privhelper::{FuseChannel, PrivHelper};
use crate::server::ServerState;
use crate::store::BackingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    /// Constructed; `initialize` has not completed.
    Uninitialized,
    /// Root inode loaded; not attached to the kernel.
    Initialized,
    /// Kernel attach in progress.
    Starting,
    Running,
    /// Kernel attach failed. Terminal.
    FuseError,
    ShuttingDown,
    /// Terminal.
    ShutDown,
    /// All owners are gone; freed once outstanding work drains.
    Destroying,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MountState::Uninitialized => "uninitialized",
            MountState::Initialized => "initialized",
            MountState::Starting => "starting",
            MountState::Running => "running",
            MountState::FuseError => "fuse_error",
            MountState::ShuttingDown => "shutting_down",
            MountState::ShutDown => "shut_down",
            MountState::Destroying => "destroying",
        };
        f.write_str(name)
    }
}

pub struct Mount {
    weak_self: Weak<Mount>,
    config: CheckoutConfig,
    server: Arc<ServerState>,
    store: Arc<dyn BackingStore>,
    priv_helper: Arc<dyn PrivHelper>,
    state: Mutex<MountState>,
    parents: Mutex<Option<ParentCommits>>,
    last_checkout_time: Mutex<SystemTime>,
    inodes: InodeMap,
    journal: Journal,
    tracker: Arc<RefTracker>,
    channel: Mutex<Option<Arc<dyn FuseChannel>>>,
}

impl Mount {
    /// Construct an uninitialized mount.
    pub fn create(
        config: CheckoutConfig,
        server: Arc<ServerState>,
        store: Arc<dyn BackingStore>,
        priv_helper: Arc<dyn PrivHelper>,
    ) -> MountHandle {
        let (uid, gid) = server.default_owner();
        let now = server.clock().now();
        let tracker = Arc::new(RefTracker::new());
        let mount = Arc::new_cyclic(|weak_self| Mount {
            weak_self: weak_self.clone(),
            inodes: InodeMap::new(
                Arc::clone(&store),
                Arc::clone(&tracker),
                LoadDefaults {
                    uid,
                    gid,
                    timestamp: now,
                },
            ),
            config,
            server,
            store,
            priv_helper,
            state: Mutex::new(MountState::Uninitialized),
            parents: Mutex::new(None),
            last_checkout_time: Mutex::new(now),
            journal: Journal::new(),
            tracker,
            channel: Mutex::new(None),
        });
        tracing::debug!("created mount for {}", mount.path().display());
        MountHandle::new(mount)
    }

    /// Resolve `commit`, load the root directory and record the initial
    /// journal entry. `last_checkout_time` defaults to the clock's now.
    ///
    /// A commit the store does not know fails with `CommitNotFound` and
    /// leaves the mount uninitialized.
    pub async fn initialize(&self, commit: Hash, last_checkout_time: Option<SystemTime>) -> Result<()> {
        self.expect_state(MountState::Uninitialized, "initialize")?;

        let root_tree = self.store.get_root_tree(&commit).await?;
        let checkout_time = last_checkout_time.unwrap_or_else(|| self.server.clock().now());
        let parents = ParentCommits::new(commit);
        self.config.save_snapshot(&parents, checkout_time)?;
        self.initialize_inodes(&root_tree, parents, checkout_time);
        self.journal
            .record_hash_update(commit, commit, self.server.clock().now());

        if !self.transition(MountState::Uninitialized, MountState::Initialized) {
            return Err(GroveError::InvalidState(format!(
                "mount state changed to {} during initialization",
                self.state()
            )));
        }
        tracing::info!(
            "initialized mount {} at commit {}",
            self.path().display(),
            commit
        );
        Ok(())
    }

    /// Initialize from the parents and checkout time persisted in the
    /// checkout's client directory.
    pub async fn initialize_from_config(&self) -> Result<()> {
        self.expect_state(MountState::Uninitialized, "initialize")?;
        let snapshot = self.config.load_snapshot()?.ok_or_else(|| {
            GroveError::Config(format!(
                "no snapshot found in {}",
                self.config.client_dir().display()
            ))
        })?;
        let commit = snapshot.parents.parent1;

        let root_tree = self.store.get_root_tree(&commit).await?;
        let checkout_time = SystemTime::from(snapshot.last_checkout_time);
        self.initialize_inodes(&root_tree, snapshot.parents, checkout_time);
        self.journal
            .record_hash_update(commit, commit, self.server.clock().now());

        if !self.transition(MountState::Uninitialized, MountState::Initialized) {
            return Err(GroveError::InvalidState(format!(
                "mount state changed to {} during initialization",
                self.state()
            )));
        }
        tracing::info!(
            "initialized mount {} from saved snapshot at commit {}",
            self.path().display(),
            commit
        );
        Ok(())
    }

    fn initialize_inodes(&self, root_tree: &crate::store::Tree, parents: ParentCommits, checkout_time: SystemTime) {
        let mut defaults = self.inodes.defaults();
        defaults.timestamp = checkout_time;
        self.inodes.set_defaults(defaults);
        drop(self.inodes.initialize_root(root_tree));
        *self.parents.lock() = Some(parents);
        *self.last_checkout_time.lock() = checkout_time;
    }

    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    pub fn path(&self) -> &Path {
        self.config.mount_path()
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub fn server_state(&self) -> &Arc<ServerState> {
        &self.server
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn inode_map(&self) -> &InodeMap {
        &self.inodes
    }

    pub fn backing_store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Number of [`InodePtr`]s into this mount that are still alive.
    pub fn outstanding_inode_refs(&self) -> usize {
        self.tracker.count()
    }

    pub fn root_inode(&self) -> Result<InodePtr> {
        self.inodes.root()
    }

    /// Look up the inode at a mount-relative path, loading directories as
    /// needed. Symlinks along the way are not followed.
    pub async fn get_inode(&self, path: &str) -> Result<InodePtr> {
        let mut current = self.root_inode()?;
        for name in split_relative(path)? {
            current = self.inodes.get_child(&current, &name).await?;
        }
        Ok(current)
    }

    pub async fn lookup_inode(&self, ino: InodeNumber) -> Result<InodePtr> {
        self.inodes.lookup_inode(ino).await
    }

    /// Kernel lookup: find `name` under `parent` and take a kernel
    /// reference on it.
    pub async fn fuse_lookup(&self, parent: InodeNumber, name: &str) -> Result<InodePtr> {
        let parent = self.inodes.lookup_inode(parent).await?;
        let child = self.inodes.get_child(&parent, name).await?;
        child.inc_fuse_refcount();
        Ok(child)
    }

    /// Kernel forget: drop `count` kernel references to `ino`.
    pub fn fuse_forget(&self, ino: InodeNumber, count: u64) {
        self.inodes.dec_fuse_refcount(ino, count);
    }

    /// Mount-relative path of a loaded inode. The root is the empty string.
    pub fn path_of(&self, inode: &InodePtr) -> Result<String> {
        self.inodes
            .path_of(inode.ino())
            .map(|components| join_components(&components))
            .ok_or_else(|| GroveError::NotFound(format!("inode {}", inode.ino())))
    }

    pub async fn read_all(&self, inode: &InodePtr) -> Result<Vec<u8>> {
        match inode.as_file() {
            Some(file) => file.read_all(self.store.as_ref()).await,
            None if inode.as_tree().is_some() => {
                Err(GroveError::IsADirectory(self.path_of(inode)?))
            }
            None => Err(GroveError::InvalidArgument(format!(
                "{} is not a regular file",
                self.path_of(inode)?
            ))),
        }
    }

    pub async fn readlink(&self, inode: &InodePtr) -> Result<String> {
        let link = inode.as_symlink().ok_or_else(|| {
            GroveError::InvalidArgument(format!(
                "{} is not a symlink",
                self.path_of(inode).unwrap_or_default()
            ))
        })?;
        let target = link.read_all(self.store.as_ref()).await?;
        String::from_utf8(target).map_err(|_| {
            GroveError::InvalidArgument(format!(
                "symlink {} has a non UTF-8 target",
                self.path_of(inode).unwrap_or_default()
            ))
        })
    }

    fn arc(&self) -> Result<Arc<Mount>> {
        self.weak_self
            .upgrade()
            .ok_or_else(|| GroveError::InvalidState("mount is being destroyed".to_string()))
    }

    /// Compare-and-set the lifecycle state.
    fn transition(&self, from: MountState, to: MountState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        tracing::debug!("mount {}: {} -> {}", self.path().display(), from, to);
        true
    }

    fn expect_state(&self, expected: MountState, operation: &str) -> Result<()> {
        let state = self.state();
        if state != expected {
            return Err(GroveError::InvalidState(format!(
                "cannot {} mount {} in state {}",
                operation,
                self.path().display(),
                state
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("path", &self.path())
            .field("state", &self.state())
            .field("parents", &*self.parents.lock())
            .finish()
    }
}

struct MountOwner {
    mount: Arc<Mount>,
}

impl Drop for MountOwner {
    fn drop(&mut self) {
        Mount::destroy(Arc::clone(&self.mount));
    }
}

/// Owning handle to a mount. Cloning shares ownership; when the last clone
/// is dropped the mount is destroyed.
#[derive(Clone)]
pub struct MountHandle {
    owner: Arc<MountOwner>,
}

impl MountHandle {
    fn new(mount: Arc<Mount>) -> Self {
        MountHandle {
            owner: Arc::new(MountOwner { mount }),
        }
    }

    /// Observe the mount without keeping it alive.
    pub fn downgrade(&self) -> Weak<Mount> {
        Arc::downgrade(&self.owner.mount)
    }
}

impl Deref for MountHandle {
    type Target = Mount;

    fn deref(&self) -> &Mount {
        &self.owner.mount
    }
}

impl fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.owner.mount, f)
    }
}
