mod common;

use common::{builder_with_files, commit, TestMount};
use grovefs::{Clock, ParentCommits};
use std::time::{Duration, SystemTime};

#[tokio::test]
async fn test_reset_parent_keeps_working_copy() {
    let mut test_mount = TestMount::empty();

    let mut builder1 = builder_with_files(&[
        ("src/main.c", "int main() { return 0; }\n"),
        ("src/test.c", "testy tests"),
        ("doc/readme.txt", "all the words"),
    ]);
    let mut builder2 = builder1.clone();
    test_mount.add_commit("1", &mut builder1);
    builder2
        .replace_file("src/test.c", "even more testy tests")
        .expect("replace_file");
    builder2
        .set_file("src/extra.h", "extra stuff")
        .expect("set_file");
    test_mount.add_commit("2", &mut builder2);

    test_mount
        .initialize(commit("1"), None)
        .await
        .expect("Failed to initialize");
    let mount = test_mount.mount();
    assert_eq!(
        mount.parent_commits().expect("parents"),
        ParentCommits::new(commit("1"))
    );
    assert_eq!(
        mount.config().parent_commits().expect("saved parents"),
        Some(ParentCommits::new(commit("1")))
    );
    let latest = mount.journal().latest().expect("journal entry");
    assert_eq!(latest.from_hash, commit("1"));
    assert_eq!(latest.to_hash, commit("1"));
    assert_eq!(test_mount.read_file("src/test.c").await, "testy tests");
    let file = test_mount.get_file("src/test.c").await;
    assert_eq!(file.metadata().mode, 0o644);
    drop(file);
    assert!(!test_mount.has_file_at("src/extra.h").await);

    mount.reset_parent(commit("2")).expect("Failed to reset parent");
    assert_eq!(
        mount.parent_commits().expect("parents"),
        ParentCommits::new(commit("2"))
    );
    assert_eq!(
        mount.config().parent_commits().expect("saved parents"),
        Some(ParentCommits::new(commit("2")))
    );
    let latest = mount.journal().latest().expect("journal entry");
    assert_eq!(latest.from_hash, commit("1"));
    assert_eq!(latest.to_hash, commit("2"));
    assert_eq!(mount.journal().len(), 2);

    assert_eq!(test_mount.read_file("src/test.c").await, "testy tests");
    assert!(!test_mount.has_file_at("src/extra.h").await);
}

#[tokio::test]
async fn test_reset_parent_notifies_journal_subscribers() {
    let test_mount = TestMount::new(builder_with_files(&[("a.txt", "a")])).await;
    let mut deltas = test_mount.mount().journal().subscribe();

    test_mount
        .mount()
        .reset_parent(commit("abc"))
        .expect("Failed to reset parent");
    let delta = deltas.recv().await.expect("journal delta");
    assert_eq!(delta.from_hash, commit("1"));
    assert_eq!(delta.to_hash, commit("abc"));
    assert_eq!(delta.time, test_mount.clock.now());
}

#[tokio::test]
async fn test_reset_parent_fails_cleanly_when_snapshot_cannot_be_written() {
    let test_mount = TestMount::new(builder_with_files(&[("a.txt", "a")])).await;
    let client_dir = test_mount.client_dir();
    std::fs::remove_dir_all(&client_dir).expect("remove client dir");
    // A regular file where the client directory should be.
    std::fs::write(&client_dir, "not a directory").expect("write file");

    test_mount
        .mount()
        .reset_parent(commit("2"))
        .expect_err("Saving parents should fail");
    assert_eq!(
        test_mount.mount().parent_commits().expect("parents"),
        ParentCommits::new(commit("1"))
    );
    assert_eq!(test_mount.mount().journal().len(), 1);
}

#[tokio::test]
async fn test_reset_parent_rewrites_lost_snapshot_with_checkout_time() {
    let mut test_mount = TestMount::empty();
    let mut builder = builder_with_files(&[("a.txt", "a")]);
    test_mount.add_commit("1", &mut builder);
    let checkout_time = SystemTime::UNIX_EPOCH + Duration::from_secs(4242);
    test_mount
        .initialize(commit("1"), Some(checkout_time))
        .await
        .expect("Failed to initialize");

    let snapshot_path = test_mount.mount().config().snapshot_path();
    std::fs::remove_file(&snapshot_path).expect("remove snapshot");
    test_mount.clock.advance(Duration::from_secs(3600));

    test_mount
        .mount()
        .reset_parent(commit("2"))
        .expect("Failed to reset parent");
    let snapshot = test_mount
        .mount()
        .config()
        .load_snapshot()
        .expect("Failed to load snapshot")
        .expect("Snapshot should be rewritten");
    assert_eq!(snapshot.parents, ParentCommits::new(commit("2")));
    assert_eq!(SystemTime::from(snapshot.last_checkout_time), checkout_time);
}

#[tokio::test]
async fn test_last_checkout_time_applies_to_loaded_inodes() {
    let mut test_mount = TestMount::empty();
    let mut builder = builder_with_files(&[("dir/foo.txt", "Fooooo!!")]);
    test_mount.add_commit("1", &mut builder);

    let checkout_time =
        SystemTime::UNIX_EPOCH + Duration::from_secs(50000) + Duration::from_nanos(10000);
    test_mount
        .initialize(commit("1"), Some(checkout_time))
        .await
        .expect("Failed to initialize");
    assert_eq!(test_mount.mount().last_checkout_time(), checkout_time);

    for path in ["dir/foo.txt", "dir"] {
        let timestamps = test_mount.get_inode(path).await.metadata().timestamps;
        assert_eq!(timestamps.atime, checkout_time, "{}", path);
        assert_eq!(timestamps.mtime, checkout_time, "{}", path);
        assert_eq!(timestamps.ctime, checkout_time, "{}", path);
    }
}

#[tokio::test]
async fn test_creating_file_sets_timestamps_to_now() {
    let mut test_mount = TestMount::empty();
    let mut builder = builder_with_files(&[("initial/file.txt", "was here")]);
    test_mount.add_commit("1", &mut builder);
    let last_checkout_time = test_mount.clock.now();
    test_mount
        .initialize(commit("1"), Some(last_checkout_time))
        .await
        .expect("Failed to initialize");

    test_mount.clock.advance(Duration::from_secs(10 * 60));

    let root = test_mount.mount().root_inode().expect("root");
    test_mount
        .mount()
        .create_file(&root, "newfile.txt", 0o660)
        .expect("Failed to create file");
    let file = test_mount.get_file("newfile.txt").await;
    let metadata = file.metadata();
    let now = test_mount.clock.now();
    assert_ne!(now, last_checkout_time);
    assert_eq!(metadata.timestamps.atime, now);
    assert_eq!(metadata.timestamps.mtime, now);
    assert_eq!(metadata.timestamps.ctime, now);
    assert_eq!(metadata.mode, 0o660);

    let err = test_mount
        .mount()
        .create_file(&root, "newfile.txt", 0o660)
        .expect_err("Name is taken");
    assert_eq!(err.errno(), libc::EEXIST);
}

#[tokio::test]
async fn test_initialize_from_saved_snapshot() {
    let mut first = TestMount::empty();
    let mut builder = builder_with_files(&[("a.txt", "a")]);
    first.add_commit("1", &mut builder);
    let checkout_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1234);
    first
        .initialize(commit("1"), Some(checkout_time))
        .await
        .expect("Failed to initialize");

    let server = first.server.clone();
    let resumed = grovefs::Mount::create(
        first.checkout_config(),
        server,
        first.store.clone(),
        first.priv_helper.clone(),
    );
    resumed
        .initialize_from_config()
        .await
        .expect("Failed to initialize from snapshot");
    assert_eq!(
        resumed.parent_commits().expect("parents"),
        ParentCommits::new(commit("1"))
    );
    assert_eq!(resumed.last_checkout_time(), checkout_time);
}
