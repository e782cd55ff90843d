use crate::error::{GroveError, Result};
use crate::inodes::{Attr, InodeKind, InodePtr, SetAttr, SetAttrMask};
use crate::mount::Mount;

impl Mount {
    /// Full attribute record of `inode`. The size of a file that has not
    /// been materialized comes from its backing blob.
    pub async fn getattr(&self, inode: &InodePtr) -> Result<Attr> {
        let (size, nlink) = match inode.kind() {
            InodeKind::Tree(tree) => (tree.lock().entries.len() as u64, 2),
            InodeKind::File(file) | InodeKind::Symlink(file) => {
                let size = match file.cached_size() {
                    Some(size) => size,
                    None => file.read_all(self.backing_store().as_ref()).await?.len() as u64,
                };
                (size, 1)
            }
        };
        let metadata = inode.metadata();
        Ok(Attr {
            ino: inode.ino(),
            mode: inode.inode_type().format_bits() | metadata.mode,
            uid: metadata.uid,
            gid: metadata.gid,
            size,
            nlink,
            atime: metadata.timestamps.atime,
            mtime: metadata.timestamps.mtime,
            ctime: metadata.timestamps.ctime,
        })
    }

    /// Apply the fields selected in `desired.mask` and return the resulting
    /// attributes. Mode changes keep only the permission bits; the file type
    /// never changes. `ctime` is always stamped from the clock.
    pub async fn setattr(&self, inode: &InodePtr, desired: &SetAttr) -> Result<Attr> {
        let now = self.server_state().clock().now();

        if desired.mask.contains(SetAttrMask::SIZE) {
            match inode.kind() {
                InodeKind::File(file) => {
                    file.truncate(desired.size, self.backing_store().as_ref())
                        .await?
                }
                InodeKind::Tree(_) => return Err(GroveError::IsADirectory(self.path_of(inode)?)),
                InodeKind::Symlink(_) => {
                    return Err(GroveError::InvalidArgument(format!(
                        "cannot change the size of symlink {}",
                        self.path_of(inode)?
                    )))
                }
            }
        }

        inode.update_metadata(|metadata| {
            if desired.mask.contains(SetAttrMask::MODE) {
                metadata.mode = desired.mode & 0o7777;
            }
            if desired.mask.contains(SetAttrMask::UID) {
                metadata.uid = desired.uid;
            }
            if desired.mask.contains(SetAttrMask::GID) {
                metadata.gid = desired.gid;
            }
            if desired.mask.contains(SetAttrMask::ATIME) {
                metadata.timestamps.atime = desired.atime;
            }
            if desired.mask.contains(SetAttrMask::MTIME) {
                metadata.timestamps.mtime = desired.mtime;
            } else if desired.mask.contains(SetAttrMask::SIZE) {
                metadata.timestamps.mtime = now;
            }
            metadata.timestamps.ctime = now;
        });
        tracing::debug!("setattr {:?} on inode {}", desired.mask, inode.ino());

        self.getattr(inode).await
    }

    /// Give the whole checkout a new owner.
    ///
    /// Every loaded inode and the saved metadata of every unloaded one are
    /// updated, inodes loaded later get the new owner, and the kernel is told
    /// to drop cached attributes of every inode it still references. Every
    /// invalidation is attempted; the first failure is returned.
    pub fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        self.set_owner(uid, gid);
        self.inode_map().update_all_metadata(|metadata| {
            metadata.uid = uid;
            metadata.gid = gid;
        });

        let referenced = self.inode_map().referenced_inodes();
        tracing::info!(
            "chown {} to {}:{}, invalidating {} inodes",
            self.path().display(),
            uid,
            gid,
            referenced.len()
        );
        let Some(channel) = self.channel() else {
            return Ok(());
        };
        let mut first_error = None;
        for ino in referenced {
            if let Err(e) = channel.invalidate_inode(ino) {
                tracing::warn!("failed to invalidate inode {}: {}", ino, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Change the owner given to inodes loaded from now on. Inodes already
    /// loaded keep their owner; see [`Mount::chown`].
    pub fn set_owner(&self, uid: u32, gid: u32) {
        let mut defaults = self.inode_map().defaults();
        defaults.uid = uid;
        defaults.gid = gid;
        self.inode_map().set_defaults(defaults);
    }
}
