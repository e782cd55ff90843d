use fuser::{FileAttr, FileType, TimeOrNow};
use std::time::SystemTime;

use crate::inodes::{Attr, InodeType, SetAttr};

const BLOCK_SIZE: u32 = 4096;

impl From<InodeType> for FileType {
    fn from(kind: InodeType) -> Self {
        match kind {
            InodeType::Directory => FileType::Directory,
            InodeType::File => FileType::RegularFile,
            InodeType::Symlink => FileType::Symlink,
        }
    }
}

pub(crate) fn attr_to_fileattr(attr: &Attr) -> FileAttr {
    FileAttr {
        ino: attr.ino.get(),
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: SystemTime::UNIX_EPOCH,
        kind: attr.kind().into(),
        perm: attr.permissions() as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn resolve_time(time: TimeOrNow, now: SystemTime) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => now,
    }
}

/// Optional fields of a kernel setattr request.
#[derive(Debug, Default)]
pub(crate) struct SetAttrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<TimeOrNow>,
    pub mtime: Option<TimeOrNow>,
}

impl SetAttrRequest {
    pub(crate) fn into_setattr(self, now: SystemTime) -> SetAttr {
        let mut desired = SetAttr::new();
        if let Some(mode) = self.mode {
            desired = desired.mode(mode);
        }
        if let Some(uid) = self.uid {
            desired = desired.uid(uid);
        }
        if let Some(gid) = self.gid {
            desired = desired.gid(gid);
        }
        if let Some(size) = self.size {
            desired = desired.size(size);
        }
        if let Some(atime) = self.atime {
            desired = desired.atime(resolve_time(atime, now));
        }
        if let Some(mtime) = self.mtime {
            desired = desired.mtime(resolve_time(mtime, now));
        }
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inodes::{InodeNumber, SetAttrMask};
    use std::time::Duration;

    #[test]
    fn test_attr_conversion_splits_mode() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(5);
        let attr = Attr {
            ino: InodeNumber::new(7),
            mode: libc::S_IFDIR as u32 | 0o7673,
            uid: 1,
            gid: 2,
            size: 3,
            nlink: 2,
            atime: t,
            mtime: t,
            ctime: t,
        };
        let converted = attr_to_fileattr(&attr);
        assert_eq!(converted.kind, FileType::Directory);
        assert_eq!(converted.perm, 0o7673);
        assert_eq!(converted.ino, 7);
        assert_eq!(converted.blocks, 1);
    }

    #[test]
    fn test_time_now_uses_supplied_clock() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(99);
        let request = SetAttrRequest {
            mtime: Some(TimeOrNow::Now),
            uid: Some(42),
            ..Default::default()
        };
        let desired = request.into_setattr(now);
        assert_eq!(desired.mask, SetAttrMask::MTIME | SetAttrMask::UID);
        assert_eq!(desired.mtime, now);
        assert_eq!(desired.uid, 42);
    }
}
