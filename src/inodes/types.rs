use bitflags::bitflags;
use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

use crate::store::EntryKind;

/// Process-lifetime identity of an inode. Stable across unload and reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InodeNumber(u64);

impl InodeNumber {
    /// FUSE reserves 1 (FUSE_ROOT_ID) for the root directory.
    pub const ROOT: InodeNumber = InodeNumber(1);

    pub const fn new(value: u64) -> Self {
        InodeNumber(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<InodeNumber> for u64 {
    fn from(ino: InodeNumber) -> u64 {
        ino.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeType {
    Directory,
    File,
    Symlink,
}

impl InodeType {
    /// The `S_IFMT` bits for this type.
    pub fn format_bits(self) -> u32 {
        match self {
            InodeType::Directory => libc::S_IFDIR as u32,
            InodeType::File => libc::S_IFREG as u32,
            InodeType::Symlink => libc::S_IFLNK as u32,
        }
    }
}

impl From<EntryKind> for InodeType {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Tree => InodeType::Directory,
            EntryKind::Regular | EntryKind::Executable => InodeType::File,
            EntryKind::Symlink => InodeType::Symlink,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeTimestamps {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl InodeTimestamps {
    pub fn all(time: SystemTime) -> Self {
        InodeTimestamps {
            atime: time,
            mtime: time,
            ctime: time,
        }
    }
}

/// Ownership, permissions and timestamps of an inode. `mode` holds only the
/// permission bits; the file type comes from the inode's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeMetadata {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub timestamps: InodeTimestamps,
}

bitflags! {
    /// Fields selected by a [`SetAttr`] request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SetAttrMask: u32 {
        const MODE = 1 << 0;
        const UID = 1 << 1;
        const GID = 1 << 2;
        const SIZE = 1 << 3;
        const ATIME = 1 << 4;
        const MTIME = 1 << 5;
    }
}

/// A setattr request. Only fields whose bit is set in `mask` are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetAttr {
    pub mask: SetAttrMask,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
}

impl Default for SetAttr {
    fn default() -> Self {
        SetAttr {
            mask: SetAttrMask::empty(),
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
        }
    }
}

impl SetAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mask |= SetAttrMask::MODE;
        self.mode = mode;
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.mask |= SetAttrMask::UID;
        self.uid = uid;
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.mask |= SetAttrMask::GID;
        self.gid = gid;
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.mask |= SetAttrMask::SIZE;
        self.size = size;
        self
    }

    pub fn atime(mut self, atime: SystemTime) -> Self {
        self.mask |= SetAttrMask::ATIME;
        self.atime = atime;
        self
    }

    pub fn mtime(mut self, mtime: SystemTime) -> Self {
        self.mask |= SetAttrMask::MTIME;
        self.mtime = mtime;
        self
    }
}

/// Full attribute record of an inode, as reported to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub ino: InodeNumber,
    /// File type bits combined with permission bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Attr {
    pub fn kind(&self) -> InodeType {
        match self.mode & libc::S_IFMT as u32 {
            m if m == libc::S_IFDIR as u32 => InodeType::Directory,
            m if m == libc::S_IFLNK as u32 => InodeType::Symlink,
            _ => InodeType::File,
        }
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setattr_builder_sets_mask_bits() {
        let desired = SetAttr::new().mode(0o644).gid(20);
        assert_eq!(desired.mask, SetAttrMask::MODE | SetAttrMask::GID);
        assert_eq!(desired.mode, 0o644);
        assert_eq!(desired.gid, 20);
        assert!(!desired.mask.contains(SetAttrMask::UID));
    }

    #[test]
    fn test_attr_kind_from_mode() {
        let attr = Attr {
            ino: InodeNumber::ROOT,
            mode: libc::S_IFDIR as u32 | 0o755,
            uid: 0,
            gid: 0,
            size: 0,
            nlink: 2,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(attr.kind(), InodeType::Directory);
        assert_eq!(attr.permissions(), 0o755);
    }
}
