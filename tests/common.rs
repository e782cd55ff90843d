use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::sync::{oneshot, watch};

use grovefs::inodes::InodeType;
use grovefs::store::{MemoryBackingStore, TreeBuilder};
use grovefs::{
    CheckoutConfig, Config, FakeClock, FuseChannel, GroveError, Hash, InodeNumber, InodePtr,
    Mount, MountHandle, PrivHelper, Result, ServerState,
};

/// How long tests wait for something that should happen promptly.
#[allow(dead_code)]
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// How long tests wait before concluding that something is not happening.
#[allow(dead_code)]
pub const SHORT_WAIT: Duration = Duration::from_millis(50);

/// Commit id for a short test name: `commit("1")` is `0000…0001`.
pub fn commit(name: &str) -> Hash {
    Hash::from_partial_hex(name).expect("Invalid test commit name")
}

/// Poll `condition` until it holds, panicking after [`TIMEOUT`].
#[allow(dead_code)]
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting until {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// True if `future` is still pending after [`SHORT_WAIT`].
#[allow(dead_code)]
pub async fn stays_pending<F: Future + Unpin>(future: &mut F) -> bool {
    tokio::time::timeout(SHORT_WAIT, future).await.is_err()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeFusePhase {
    Waiting,
    Initialized,
    Closed,
}

/// A kernel channel driven by the test: the handshake completes when the
/// test calls [`FakeFuse::send_init_reply`] and fails on [`FakeFuse::close`].
#[derive(Debug)]
pub struct FakeFuse {
    phase: watch::Sender<FakeFusePhase>,
    invalidations: Mutex<Vec<InodeNumber>>,
    fail_invalidations: AtomicBool,
}

impl Default for FakeFuse {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl FakeFuse {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(FakeFusePhase::Waiting);
        FakeFuse {
            phase,
            invalidations: Mutex::new(Vec::new()),
            fail_invalidations: AtomicBool::new(false),
        }
    }

    pub fn send_init_reply(&self) {
        self.phase.send_replace(FakeFusePhase::Initialized);
    }

    pub fn close(&self) {
        self.phase.send_replace(FakeFusePhase::Closed);
    }

    pub fn invalidated(&self) -> Vec<InodeNumber> {
        self.invalidations.lock().clone()
    }

    pub fn invalidated_inode(&self, ino: InodeNumber) -> bool {
        self.invalidations.lock().contains(&ino)
    }

    /// Make every later invalidation fail.
    pub fn fail_invalidations(&self) {
        self.fail_invalidations.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FuseChannel for FakeFuse {
    async fn initialize(&self) -> Result<()> {
        let mut phase = self.phase.subscribe();
        let phase = *phase
            .wait_for(|p| *p != FakeFusePhase::Waiting)
            .await
            .map_err(|_| GroveError::Channel("fake fuse dropped".to_string()))?;
        match phase {
            FakeFusePhase::Initialized => Ok(()),
            _ => Err(GroveError::Channel(
                "FUSE device closed before init".to_string(),
            )),
        }
    }

    fn invalidate_inode(&self, ino: InodeNumber) -> Result<()> {
        if self.fail_invalidations.load(Ordering::SeqCst) {
            return Err(GroveError::Channel(format!(
                "invalidation of inode {} rejected",
                ino
            )));
        }
        self.invalidations.lock().push(ino);
        Ok(())
    }
}

type MountReply = std::result::Result<Arc<FakeFuse>, String>;

enum MountDelegate {
    Fuse(Arc<FakeFuse>),
    Fail(String),
    Pending(oneshot::Receiver<MountReply>),
}

/// Privileged helper whose mount requests are answered by per-path
/// delegates registered by the test. Each delegate answers one request.
#[derive(Default)]
pub struct FakePrivHelper {
    delegates: Mutex<HashMap<PathBuf, MountDelegate>>,
    unmounts: Mutex<Vec<PathBuf>>,
}

#[allow(dead_code)]
impl FakePrivHelper {
    pub fn register_fuse(&self, mount_path: &Path, fuse: Arc<FakeFuse>) {
        self.delegates
            .lock()
            .insert(mount_path.to_path_buf(), MountDelegate::Fuse(fuse));
    }

    pub fn register_failure(&self, mount_path: &Path, message: &str) {
        self.delegates.lock().insert(
            mount_path.to_path_buf(),
            MountDelegate::Fail(message.to_string()),
        );
    }

    /// Leave the next mount of `mount_path` pending until the returned
    /// sender supplies a channel or an error message.
    pub fn register_pending(&self, mount_path: &Path) -> oneshot::Sender<MountReply> {
        let (tx, rx) = oneshot::channel();
        self.delegates
            .lock()
            .insert(mount_path.to_path_buf(), MountDelegate::Pending(rx));
        tx
    }

    pub fn unmount_count(&self, mount_path: &Path) -> usize {
        self.unmounts
            .lock()
            .iter()
            .filter(|p| p.as_path() == mount_path)
            .count()
    }
}

#[async_trait]
impl PrivHelper for FakePrivHelper {
    async fn fuse_mount(&self, mount_path: &Path) -> Result<Arc<dyn FuseChannel>> {
        let delegate = self.delegates.lock().remove(mount_path);
        let reply = match delegate {
            Some(MountDelegate::Fuse(fuse)) => Ok(fuse),
            Some(MountDelegate::Fail(message)) => Err(message),
            Some(MountDelegate::Pending(rx)) => rx
                .await
                .unwrap_or_else(|_| Err("mount request abandoned".to_string())),
            None => Err(format!("no mount delegate for {}", mount_path.display())),
        };
        match reply {
            Ok(fuse) => Ok(fuse as Arc<dyn FuseChannel>),
            Err(message) => Err(GroveError::MountFailure(message)),
        }
    }

    async fn fuse_unmount(&self, mount_path: &Path) -> Result<()> {
        self.unmounts.lock().push(mount_path.to_path_buf());
        Ok(())
    }
}

/// Observes whether a mount has been freed.
///
/// A mount holds a reference to its server state, so the server state's
/// reference count drops once the mount is gone.
pub struct MountDestroyDetector {
    mount: Weak<Mount>,
    server: Arc<ServerState>,
    original_server_count: usize,
}

#[allow(dead_code)]
impl MountDestroyDetector {
    pub fn new(mount: &MountHandle, server: &Arc<ServerState>) -> Self {
        let server = Arc::clone(server);
        let original_server_count = Arc::strong_count(&server);
        MountDestroyDetector {
            mount: mount.downgrade(),
            server,
            original_server_count,
        }
    }

    pub fn mount(&self) -> Option<Arc<Mount>> {
        self.mount.upgrade()
    }

    pub fn mount_is_alive(&self) -> bool {
        self.mount.strong_count() > 0
            && Arc::strong_count(&self.server) == self.original_server_count
    }

    pub fn mount_is_deleted(&self) -> bool {
        self.mount.strong_count() == 0
            && Arc::strong_count(&self.server) < self.original_server_count
    }
}

/// A mount over an in-memory backing store, with a fake clock, a fake
/// privileged helper and a temporary client directory.
#[allow(dead_code)]
pub struct TestMount {
    pub temp_dir: TempDir,
    pub store: Arc<MemoryBackingStore>,
    pub clock: Arc<FakeClock>,
    pub server: Arc<ServerState>,
    pub priv_helper: Arc<FakePrivHelper>,
    pub builder: TreeBuilder,
    mount: Option<MountHandle>,
}

#[allow(dead_code)]
impl TestMount {
    /// Store, clock and helpers, without a commit or a mount.
    pub fn empty() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let clock = Arc::new(FakeClock::default());
        let server = Arc::new(ServerState::new(Config::default(), clock.clone()));
        TestMount {
            temp_dir,
            store: Arc::new(MemoryBackingStore::new()),
            clock,
            server,
            priv_helper: Arc::new(FakePrivHelper::default()),
            builder: TreeBuilder::new(),
            mount: None,
        }
    }

    /// Mount `builder` as commit "1" with every object ready.
    pub async fn new(builder: TreeBuilder) -> Self {
        Self::with_builder(builder, true).await
    }

    /// Mount `builder` as commit "1". When `ready` is false only the commit
    /// and the root tree are available; the test readies the rest through
    /// [`TestMount::builder`].
    pub async fn with_builder(builder: TreeBuilder, ready: bool) -> Self {
        let mut test_mount = Self::empty();
        test_mount.builder = builder;
        test_mount
            .builder
            .finalize(test_mount.store.clone(), ready)
            .expect("Failed to finalize tree");
        test_mount
            .builder
            .commit(commit("1"), true)
            .expect("Failed to add commit");
        if !ready {
            test_mount
                .builder
                .set_ready("")
                .expect("Failed to ready root tree");
        }
        test_mount
            .initialize(commit("1"), None)
            .await
            .expect("Failed to initialize mount");
        test_mount
    }

    /// Store `builder` as commit "1" and construct a mount without
    /// initializing it.
    pub fn create_without_initializing(builder: TreeBuilder) -> Self {
        let mut test_mount = Self::empty();
        test_mount.builder = builder;
        test_mount
            .builder
            .finalize(test_mount.store.clone(), true)
            .expect("Failed to finalize tree");
        test_mount
            .builder
            .commit(commit("1"), true)
            .expect("Failed to add commit");
        test_mount.create_mount();
        test_mount
    }

    /// Finalize `builder` into this mount's store as a ready `commit`.
    pub fn add_commit(&self, name: &str, builder: &mut TreeBuilder) -> Hash {
        builder
            .finalize(self.store.clone(), true)
            .expect("Failed to finalize tree");
        builder
            .commit(commit(name), true)
            .expect("Failed to add commit");
        commit(name)
    }

    pub fn mount_path(&self) -> PathBuf {
        self.temp_dir.path().join("mount")
    }

    pub fn client_dir(&self) -> PathBuf {
        self.temp_dir.path().join("client")
    }

    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig::new(self.mount_path(), self.client_dir())
    }

    fn create_mount(&mut self) {
        let mount = Mount::create(
            self.checkout_config(),
            self.server.clone(),
            self.store.clone(),
            self.priv_helper.clone(),
        );
        self.mount = Some(mount);
    }

    /// Initialize at `commit`, constructing the mount first if needed.
    pub async fn initialize(&mut self, commit: Hash, last_checkout_time: Option<SystemTime>) -> Result<()> {
        if self.mount.is_none() {
            self.create_mount();
        }
        self.mount().initialize(commit, last_checkout_time).await
    }

    pub fn mount(&self) -> &MountHandle {
        self.mount.as_ref().expect("Mount has not been created")
    }

    /// Give up this test's ownership of the mount.
    pub fn take_mount(&mut self) -> MountHandle {
        self.mount.take().expect("Mount has not been created")
    }

    pub fn destroy_detector(&self) -> MountDestroyDetector {
        MountDestroyDetector::new(self.mount(), &self.server)
    }

    pub fn register_fake_fuse(&self, fuse: Arc<FakeFuse>) {
        self.priv_helper.register_fuse(&self.mount_path(), fuse);
    }

    /// Start FUSE against `fuse`, complete its handshake and wait until the
    /// mount is running.
    pub async fn start_fuse_and_wait(&self, fuse: Arc<FakeFuse>) {
        self.register_fake_fuse(fuse.clone());
        let start = self.mount().start_fuse();
        fuse.send_init_reply();
        tokio::time::timeout(TIMEOUT, start)
            .await
            .expect("Timed out starting FUSE")
            .expect("Failed to start FUSE");
    }

    pub async fn get_inode(&self, path: &str) -> InodePtr {
        self.mount()
            .get_inode(path)
            .await
            .unwrap_or_else(|e| panic!("Failed to look up {}: {}", path, e))
    }

    pub async fn get_file(&self, path: &str) -> InodePtr {
        let inode = self.get_inode(path).await;
        assert_eq!(inode.inode_type(), InodeType::File, "{} is not a file", path);
        inode
    }

    pub async fn get_tree(&self, path: &str) -> InodePtr {
        let inode = self.get_inode(path).await;
        assert_eq!(
            inode.inode_type(),
            InodeType::Directory,
            "{} is not a directory",
            path
        );
        inode
    }

    pub async fn has_file_at(&self, path: &str) -> bool {
        matches!(self.mount().get_inode(path).await, Ok(inode) if inode.inode_type() == InodeType::File)
    }

    pub async fn read_file(&self, path: &str) -> String {
        let file = self.get_file(path).await;
        let contents = self
            .mount()
            .read_all(&file)
            .await
            .expect("Failed to read file");
        String::from_utf8(contents).expect("File is not UTF-8")
    }
}

/// Builder populated with `(path, contents)` files.
#[allow(dead_code)]
pub fn builder_with_files(files: &[(&str, &str)]) -> TreeBuilder {
    let mut builder = TreeBuilder::new();
    for (path, contents) in files {
        builder
            .set_file(path, *contents)
            .expect("Failed to add file to tree");
    }
    builder
}
