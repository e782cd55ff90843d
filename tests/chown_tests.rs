mod common;

use common::{builder_with_files, stays_pending, FakeFuse, TestMount, TIMEOUT};
use grovefs::{GroveError, InodeNumber};
use std::sync::Arc;

const UID: u32 = 1024;
const GID: u32 = 2048;

struct ChownFixture {
    test_mount: TestMount,
    fuse: Arc<FakeFuse>,
}

impl ChownFixture {
    async fn new() -> Self {
        let test_mount = TestMount::new(builder_with_files(&[("file.txt", "contents")])).await;
        let fuse = Arc::new(FakeFuse::new());
        test_mount.start_fuse_and_wait(fuse.clone()).await;
        ChownFixture { test_mount, fuse }
    }

    /// Look the file up the way the kernel does, leaving one kernel
    /// reference and no inode pointers.
    async fn load(&self) -> InodeNumber {
        let file = self
            .test_mount
            .mount()
            .fuse_lookup(InodeNumber::ROOT, "file.txt")
            .await
            .expect("Failed to look up file.txt");
        file.ino()
    }

    fn unload_children(&self) -> usize {
        let mount = self.test_mount.mount();
        let root = mount.root_inode().expect("Failed to get root");
        mount.inode_map().unload_children_now(&root)
    }

    async fn expect_chown_succeeded(&self) {
        let file = self.test_mount.get_file("file.txt").await;
        let attr = self
            .test_mount
            .mount()
            .getattr(&file)
            .await
            .expect("Failed to getattr");
        assert_eq!(attr.uid, UID);
        assert_eq!(attr.gid, GID);
    }
}

#[tokio::test]
async fn test_unloaded_inode_with_zero_refcount_is_not_invalidated() {
    let fixture = ChownFixture::new().await;
    let map = fixture.test_mount.mount().inode_map();

    let ino = fixture.load().await;
    assert!(fixture.test_mount.mount().lookup_inode(ino).await.is_ok());
    map.dec_fuse_refcount(ino, 1);
    assert_eq!(fixture.unload_children(), 1);
    assert!(map.unloaded_record(ino).is_none());

    fixture
        .test_mount
        .mount()
        .chown(UID, GID)
        .expect("Failed to chown");
    assert!(!fixture.fuse.invalidated_inode(ino));

    fixture.expect_chown_succeeded().await;
}

#[tokio::test]
async fn test_unloaded_inode_with_positive_refcount_is_invalidated() {
    let fixture = ChownFixture::new().await;
    let map = fixture.test_mount.mount().inode_map();

    let ino = fixture.load().await;
    assert!(fixture.test_mount.mount().lookup_inode(ino).await.is_ok());
    assert_eq!(fixture.unload_children(), 1);
    assert!(!map.is_loaded(ino));
    assert_eq!(
        map.unloaded_record(ino).map(|record| record.fuse_refcount),
        Some(1)
    );

    fixture
        .test_mount
        .mount()
        .chown(UID, GID)
        .expect("Failed to chown");
    assert!(fixture.fuse.invalidated_inode(ino));

    fixture.expect_chown_succeeded().await;
    // Reloading keeps the kernel's inode number.
    assert_eq!(fixture.test_mount.get_file("file.txt").await.ino(), ino);
}

#[tokio::test]
async fn test_loaded_inode_is_invalidated() {
    let fixture = ChownFixture::new().await;

    let ino = fixture.load().await;
    let file = fixture
        .test_mount
        .mount()
        .lookup_inode(ino)
        .await
        .expect("Failed to look up inode");
    assert_eq!(fixture.unload_children(), 0);

    fixture
        .test_mount
        .mount()
        .chown(UID, GID)
        .expect("Failed to chown");
    assert!(fixture.fuse.invalidated_inode(ino));
    assert_eq!(file.metadata().uid, UID);
    assert_eq!(file.metadata().gid, GID);
}

#[tokio::test]
async fn test_chown_reports_invalidation_failure_after_updating_metadata() {
    let fixture = ChownFixture::new().await;
    let ino = fixture.load().await;
    fixture.fuse.fail_invalidations();

    let err = fixture
        .test_mount
        .mount()
        .chown(UID, GID)
        .expect_err("Invalidation failure should be reported");
    assert!(matches!(err, GroveError::Channel(_)));
    assert!(!fixture.fuse.invalidated_inode(ino));
    fixture.expect_chown_succeeded().await;
}

#[tokio::test]
async fn test_chown_without_channel_updates_metadata() {
    let test_mount = TestMount::new(builder_with_files(&[("dir/file.txt", "contents")])).await;
    let dir = test_mount.get_tree("dir").await;

    test_mount.mount().chown(UID, GID).expect("Failed to chown");
    assert_eq!(dir.metadata().uid, UID);
    let file = test_mount.get_file("dir/file.txt").await;
    assert_eq!(file.metadata().gid, GID);
}

#[tokio::test]
async fn test_set_owner_changes_take_effect() {
    let test_mount = TestMount::new(builder_with_files(&[("dir/file.txt", "contents")])).await;
    test_mount.mount().set_owner(UID, GID);

    let file = test_mount.get_file("dir/file.txt").await;
    let attr = test_mount
        .mount()
        .getattr(&file)
        .await
        .expect("Failed to getattr");
    assert_eq!(attr.uid, UID);
    assert_eq!(attr.gid, GID);
}

#[tokio::test]
async fn test_chown_applies_to_inode_loaded_concurrently() {
    let test_mount =
        TestMount::with_builder(builder_with_files(&[("dir/file.txt", "contents")]), false).await;
    let mount = test_mount.mount().clone();
    let mut lookup = tokio::spawn(async move { mount.get_inode("dir").await });
    assert!(
        stays_pending(&mut lookup).await,
        "dir should wait for its tree"
    );

    test_mount.mount().chown(UID, GID).expect("Failed to chown");
    test_mount
        .builder
        .set_ready("dir")
        .expect("Failed to ready dir");

    let dir = tokio::time::timeout(TIMEOUT, lookup)
        .await
        .expect("Timed out loading dir")
        .expect("Lookup task panicked")
        .expect("Failed to load dir");
    assert_eq!(dir.metadata().uid, UID);
    assert_eq!(dir.metadata().gid, GID);
}
