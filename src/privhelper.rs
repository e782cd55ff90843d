//! Collaborators that attach a mount to the kernel.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::inodes::InodeNumber;

/// An open kernel filesystem channel.
#[async_trait]
pub trait FuseChannel: Send + Sync {
    /// Run the kernel handshake. Resolves once the kernel has sent its init
    /// request; fails if the channel closes first.
    async fn initialize(&self) -> Result<()>;

    /// Drop any attributes or data the kernel has cached for `ino`.
    fn invalidate_inode(&self, ino: InodeNumber) -> Result<()>;
}

/// Performs the privileged mount and unmount operations.
#[async_trait]
pub trait PrivHelper: Send + Sync {
    /// Mount a filesystem at `mount_path` and return its channel. Fails with
    /// `MountFailure` when the mount is rejected.
    async fn fuse_mount(&self, mount_path: &Path) -> Result<Arc<dyn FuseChannel>>;

    async fn fuse_unmount(&self, mount_path: &Path) -> Result<()>;
}
