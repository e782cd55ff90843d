use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{GroveError, Result};
use crate::hash::Hash;

const SNAPSHOT_FILE: &str = "snapshot.toml";
const LOCK_FILE: &str = "snapshot.lock";

/// The commit(s) a working copy is based on. Two parents during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentCommits {
    pub parent1: Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent2: Option<Hash>,
}

impl ParentCommits {
    pub fn new(parent1: Hash) -> Self {
        ParentCommits {
            parent1,
            parent2: None,
        }
    }

    pub fn merge(parent1: Hash, parent2: Hash) -> Self {
        ParentCommits {
            parent1,
            parent2: Some(parent2),
        }
    }
}

impl From<Hash> for ParentCommits {
    fn from(hash: Hash) -> Self {
        ParentCommits::new(hash)
    }
}

/// On-disk form of the checkout's working-copy state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotState {
    #[serde(flatten)]
    pub parents: ParentCommits,
    pub last_checkout_time: DateTime<Utc>,
}

/// Per-checkout configuration: where the checkout is mounted and where its
/// persistent state lives.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    mount_path: PathBuf,
    client_dir: PathBuf,
}

impl CheckoutConfig {
    pub fn new(mount_path: impl Into<PathBuf>, client_dir: impl Into<PathBuf>) -> Self {
        CheckoutConfig {
            mount_path: mount_path.into(),
            client_dir: client_dir.into(),
        }
    }

    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    pub fn client_dir(&self) -> &Path {
        &self.client_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.client_dir.join(SNAPSHOT_FILE)
    }

    /// Read the persisted snapshot, if one has been written.
    pub fn load_snapshot(&self) -> Result<Option<SnapshotState>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }

        let lock = self.open_lock()?;
        lock.lock_shared()
            .map_err(|e| GroveError::Config(format!("Failed to acquire read lock: {}", e)))?;

        let result = std::fs::read_to_string(&path)
            .map_err(|e| GroveError::Config(format!("Failed to read {}: {}", path.display(), e)))
            .and_then(|content| {
                toml::from_str::<SnapshotState>(&content).map_err(|e| {
                    GroveError::Config(format!("Failed to parse {}: {}", path.display(), e))
                })
            });

        if let Err(e) = lock.unlock() {
            tracing::warn!("Failed to release read lock: {}", e);
        }

        result.map(Some)
    }

    pub fn parent_commits(&self) -> Result<Option<ParentCommits>> {
        Ok(self.load_snapshot()?.map(|s| s.parents))
    }

    /// Persist parents and the last checkout time.
    ///
    /// The snapshot is written to a temporary file and renamed into place so
    /// a crash never leaves a truncated snapshot behind.
    pub fn save_snapshot(&self, parents: &ParentCommits, last_checkout_time: SystemTime) -> Result<()> {
        std::fs::create_dir_all(&self.client_dir).map_err(|e| {
            GroveError::Config(format!(
                "Failed to create client directory {}: {}",
                self.client_dir.display(),
                e
            ))
        })?;

        let state = SnapshotState {
            parents: *parents,
            last_checkout_time: last_checkout_time.into(),
        };
        let content = toml::to_string_pretty(&state)
            .map_err(|e| GroveError::Config(format!("Failed to serialize snapshot: {}", e)))?;

        let lock = self.open_lock()?;
        lock.lock_exclusive()
            .map_err(|e| GroveError::Config(format!("Failed to acquire write lock: {}", e)))?;

        let path = self.snapshot_path();
        let tmp_path = self.client_dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        let result = std::fs::write(&tmp_path, content)
            .and_then(|_| std::fs::rename(&tmp_path, &path))
            .map_err(|e| GroveError::Config(format!("Failed to write {}: {}", path.display(), e)));

        if let Err(e) = lock.unlock() {
            tracing::warn!("Failed to release write lock: {}", e);
        }

        result
    }

    /// Replace the parents while keeping the recorded checkout time.
    /// `last_checkout_time` is recorded when no snapshot exists yet.
    pub fn save_parents(&self, parents: &ParentCommits, last_checkout_time: SystemTime) -> Result<()> {
        let last_checkout_time = self
            .load_snapshot()?
            .map_or(last_checkout_time, |s| SystemTime::from(s.last_checkout_time));
        self.save_snapshot(parents, last_checkout_time)
    }

    fn open_lock(&self) -> Result<std::fs::File> {
        std::fs::create_dir_all(&self.client_dir).map_err(|e| {
            GroveError::Config(format!(
                "Failed to create client directory {}: {}",
                self.client_dir.display(),
                e
            ))
        })?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.client_dir.join(LOCK_FILE))
            .map_err(|e| GroveError::Config(format!("Failed to open snapshot lock: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hash(s: &str) -> Hash {
        Hash::from_partial_hex(s).unwrap()
    }

    #[test]
    fn test_snapshot_round_trip_keeps_nanoseconds() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckoutConfig::new("/mnt/repo", dir.path().join("client"));
        assert!(config.load_snapshot().unwrap().is_none());

        let when = SystemTime::UNIX_EPOCH + Duration::new(50_000, 10_000);
        config
            .save_snapshot(&ParentCommits::merge(hash("1"), hash("2")), when)
            .unwrap();

        let snapshot = config.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.parents, ParentCommits::merge(hash("1"), hash("2")));
        assert_eq!(SystemTime::from(snapshot.last_checkout_time), when);
    }

    #[test]
    fn test_save_parents_preserves_checkout_time() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckoutConfig::new("/mnt/repo", dir.path());

        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1234);
        config.save_snapshot(&hash("1").into(), when).unwrap();
        config
            .save_parents(&hash("2").into(), SystemTime::UNIX_EPOCH)
            .unwrap();

        let snapshot = config.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.parents, ParentCommits::new(hash("2")));
        assert_eq!(SystemTime::from(snapshot.last_checkout_time), when);
    }

    #[test]
    fn test_save_parents_without_snapshot_uses_given_time() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckoutConfig::new("/mnt/repo", dir.path());

        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(99);
        config.save_parents(&hash("3").into(), when).unwrap();

        let snapshot = config.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.parents, ParentCommits::new(hash("3")));
        assert_eq!(SystemTime::from(snapshot.last_checkout_time), when);
    }

    #[test]
    fn test_corrupt_snapshot_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckoutConfig::new("/mnt/repo", dir.path());
        std::fs::write(config.snapshot_path(), "parent1 = 12").unwrap();

        assert!(matches!(config.load_snapshot(), Err(GroveError::Config(_))));
    }
}
