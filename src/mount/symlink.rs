use std::collections::{HashSet, VecDeque};

use crate::error::{GroveError, Result};
use crate::inodes::{InodeNumber, InodePtr, InodeType};
use crate::mount::Mount;
use crate::path::{join_components, resolve_link_target};

/// A symlink waiting to be expanded during resolution.
struct PendingLink {
    inode: InodePtr,
    /// Components of the directory holding the link.
    dir: Vec<String>,
    path: String,
}

impl Mount {
    /// Follow symlinks from `inode` until reaching something that is not a
    /// symlink. A non-symlink is returned unchanged.
    ///
    /// Each target is interpreted relative to the directory holding its
    /// link, and symlinks met along the way are followed too. Fails with
    /// `NotFound` for a dangling link, `CrossDevice` for a target above the
    /// mount root, `PermissionDenied` for an absolute target and
    /// `TooManyLinks` when a link is reached twice.
    ///
    /// Waits (without blocking a thread) for link targets and directories
    /// the backing store has not produced yet.
    pub async fn resolve_symlink(&self, inode: InodePtr) -> Result<InodePtr> {
        if inode.inode_type() != InodeType::Symlink {
            return Ok(inode);
        }

        let mut components = self
            .inode_map()
            .path_of(inode.ino())
            .ok_or_else(|| GroveError::NotFound(format!("inode {}", inode.ino())))?;
        let path = join_components(&components);
        components.pop();

        let mut visited: HashSet<InodeNumber> = HashSet::new();
        let mut pending = Some(PendingLink {
            inode,
            dir: components,
            path,
        });
        let mut link_path = String::new();
        let mut current = self.root_inode()?;
        let mut walked: Vec<String> = Vec::new();
        let mut remaining: VecDeque<String> = VecDeque::new();

        loop {
            if let Some(link) = pending.take() {
                if !visited.insert(link.inode.ino()) {
                    return Err(GroveError::TooManyLinks(link.path));
                }
                let target = self.readlink(&link.inode).await?;
                tracing::trace!("resolving {} -> {}", link.path, target);

                // The target replaces the link; anything left to walk after
                // the link is walked after the target.
                let mut next: VecDeque<String> =
                    resolve_link_target(&link.dir, &target, &link.path)?.into();
                next.extend(remaining.drain(..));
                remaining = next;
                current = self.root_inode()?;
                walked.clear();
                link_path = link.path;
            }

            let Some(name) = remaining.pop_front() else {
                return Ok(current);
            };
            let child = match self.inode_map().get_child(&current, &name).await {
                Ok(child) => child,
                Err(GroveError::NotFound(_)) => return Err(GroveError::NotFound(link_path)),
                Err(e) => return Err(e),
            };

            if child.inode_type() == InodeType::Symlink {
                let dir = walked.clone();
                walked.push(name);
                pending = Some(PendingLink {
                    inode: child,
                    dir,
                    path: join_components(&walked),
                });
            } else {
                walked.push(name);
                current = child;
            }
        }
    }
}
