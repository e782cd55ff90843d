use std::time::SystemTime;

use crate::config::ParentCommits;
use crate::error::{GroveError, Result};
use crate::hash::Hash;
use crate::mount::Mount;

impl Mount {
    pub fn parent_commits(&self) -> Result<ParentCommits> {
        self.parents.lock().ok_or_else(|| {
            GroveError::InvalidState(format!(
                "mount {} has not been initialized",
                self.path().display()
            ))
        })
    }

    /// Point the working copy at `commit` without touching its contents.
    pub fn reset_parent(&self, commit: Hash) -> Result<()> {
        self.reset_parents(ParentCommits::new(commit))
    }

    /// Replace the parent commits, persist them and record the transition
    /// in the journal. If persisting fails nothing changes.
    pub fn reset_parents(&self, parents: ParentCommits) -> Result<()> {
        let mut current = self.parents.lock();
        let old = current.ok_or_else(|| {
            GroveError::InvalidState(format!(
                "mount {} has not been initialized",
                self.path().display()
            ))
        })?;

        self.config
            .save_parents(&parents, self.last_checkout_time())?;
        *current = Some(parents);
        self.journal.record_hash_update(
            old.parent1,
            parents.parent1,
            self.server_state().clock().now(),
        );
        tracing::info!(
            "reset parent of {}: {} -> {}",
            self.path().display(),
            old.parent1,
            parents.parent1
        );
        Ok(())
    }

    /// When the working copy was last checked out. Every inode loaded from
    /// the backing store carries this as all of its timestamps.
    pub fn last_checkout_time(&self) -> SystemTime {
        *self.last_checkout_time.lock()
    }
}
