//! Inode objects and the map that owns them.

pub mod inode;
pub mod inode_map;
pub mod refs;
pub mod types;

pub use inode::{DirEntry, FileInode, Inode, InodeKind, InodePtr, TreeContents, TreeInode};
pub use inode_map::{InodeMap, LoadDefaults, UnloadedInode};
pub use refs::RefTracker;
pub use types::{
    Attr, InodeMetadata, InodeNumber, InodeTimestamps, InodeType, SetAttr, SetAttrMask,
};
