use crate::error::{GroveError, Result};
use crate::inodes::{
    FileInode, InodeKind, InodeMetadata, InodePtr, InodeTimestamps, TreeInode,
};
use crate::mount::Mount;
use crate::path::{join_components, split_relative};

const DIRECTORY_MODE: u32 = 0o755;
const SYMLINK_MODE: u32 = 0o777;

impl Mount {
    /// Create every missing directory along `path`.
    ///
    /// Concurrent callers with overlapping paths are safe: each missing
    /// directory is created exactly once and every caller ends up with the
    /// same inode. If a component exists but is not a directory the call
    /// fails with `NotADirectory` and nothing below it is created.
    pub async fn ensure_directory_exists(&self, path: &str) -> Result<InodePtr> {
        let components = split_relative(path)?;
        let mut current = self.root_inode()?;
        for (depth, name) in components.iter().enumerate() {
            let metadata = self.new_metadata(DIRECTORY_MODE);
            let child = match self.inode_map().create_child(
                &current,
                name,
                metadata,
                InodeKind::Tree(TreeInode::empty()),
            ) {
                Ok(created) => created,
                Err(GroveError::AlreadyExists(_)) => {
                    self.inode_map().get_child(&current, name).await?
                }
                Err(e) => return Err(e),
            };
            if child.as_tree().is_none() {
                return Err(GroveError::NotADirectory(join_components(
                    &components[..=depth],
                )));
            }
            current = child;
        }
        Ok(current)
    }

    /// Create an empty regular file.
    pub fn create_file(&self, parent: &InodePtr, name: &str, mode: u32) -> Result<InodePtr> {
        self.inode_map().create_child(
            parent,
            name,
            self.new_metadata(mode & 0o7777),
            InodeKind::File(FileInode::materialized(Vec::new())),
        )
    }

    pub fn mkdir(&self, parent: &InodePtr, name: &str, mode: u32) -> Result<InodePtr> {
        self.inode_map().create_child(
            parent,
            name,
            self.new_metadata(mode & 0o7777),
            InodeKind::Tree(TreeInode::empty()),
        )
    }

    pub fn symlink(&self, parent: &InodePtr, name: &str, target: &str) -> Result<InodePtr> {
        self.inode_map().create_child(
            parent,
            name,
            self.new_metadata(SYMLINK_MODE),
            InodeKind::Symlink(FileInode::materialized(target.as_bytes().to_vec())),
        )
    }

    /// Metadata for a locally created inode: current owner defaults and all
    /// timestamps at the clock's now.
    fn new_metadata(&self, mode: u32) -> InodeMetadata {
        let defaults = self.inode_map().defaults();
        InodeMetadata {
            mode,
            uid: defaults.uid,
            gid: defaults.gid,
            timestamps: InodeTimestamps::all(self.server_state().clock().now()),
        }
    }
}
